//! Coordinator-side reply sink (pub/sub variant)
//!
//! Agents connect to `base + 1` and push `{"topic": "<channel id>", "payload":
//! <response>}` frames. Every decoded reply is routed to the
//! [`ReplyCorrelator`]; malformed frames and replies nobody waits for are
//! logged and dropped without affecting other replies.

use std::net::SocketAddr;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, trace, warn};

use super::address::ResolvedAddress;
use super::correlator::ReplyCorrelator;
use super::error::{BridgeError, BridgeResult};
use super::frame::{FrameReader, is_blank};
use super::lifecycle::{
    ACCEPT_BACKOFF, ExitGuard, ExitWatch, Lifecycle, SocketState, exit_signal,
};
use super::protocol::{Envelope, Response};

/// Decode one reply frame into its topic and response
pub fn decode_reply(frame: &[u8]) -> BridgeResult<(String, Response)> {
    let envelope: Envelope<Value> = serde_json::from_slice(frame)?;
    let response: Response = serde_json::from_value(envelope.payload)?;
    Ok((envelope.topic, response))
}

/// Bind the reply port and start routing replies into `correlator`
#[instrument(skip(correlator), fields(addr = %address))]
pub async fn spawn_reply_listener(
    address: ResolvedAddress,
    correlator: ReplyCorrelator,
) -> BridgeResult<ReplyListenerHandle> {
    let lifecycle = Lifecycle::new();

    let listener = TcpListener::bind((address.host.as_str(), address.port))
        .await
        .map_err(|source| BridgeError::Bind {
            addr: address.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr()?;
    lifecycle.advance(SocketState::Bound);
    info!("reply listener bound to {local_addr}");

    let (exit_guard, exit) = exit_signal();
    let actor = ReplyListenerActor {
        listener,
        correlator,
        lifecycle: lifecycle.clone(),
        connections: JoinSet::new(),
        _exit: exit_guard,
    };

    lifecycle.advance(SocketState::Serving);
    tokio::spawn(actor.run());

    Ok(ReplyListenerHandle {
        lifecycle,
        local_addr,
        exit,
    })
}

struct ReplyListenerActor {
    listener: TcpListener,
    correlator: ReplyCorrelator,
    lifecycle: Lifecycle,
    connections: JoinSet<()>,
    _exit: ExitGuard,
}

impl ReplyListenerActor {
    #[instrument(skip(self), name = "reply_listener")]
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.lifecycle.closed() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("agent connected from {peer} to push replies");
                        self.connections.spawn(route_replies(stream, peer, self.correlator.clone()));
                    }
                    Err(e) => {
                        warn!("failed to accept agent connection: {e}");
                        self.lifecycle.pause(ACCEPT_BACKOFF).await;
                    }
                },

                Some(_) = self.connections.join_next(), if !self.connections.is_empty() => {}
            }
        }

        self.connections.shutdown().await;
        drop(self.listener);
        debug!("reply listener stopped");
    }
}

async fn route_replies(stream: TcpStream, peer: SocketAddr, correlator: ReplyCorrelator) {
    let mut frames = FrameReader::new(stream);

    loop {
        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!("failed to read replies from {peer}: {e}");
                break;
            }
        };

        if is_blank(&frame) {
            continue;
        }

        match decode_reply(&frame) {
            Ok((topic, response)) => {
                trace!("reply {} for {topic} from {peer}", response.body.kind_str());
                correlator.on_reply_received(&topic, response);
            }
            Err(e) => warn!("dropping reply from {peer}: {e}"),
        }
    }

    trace!("agent {peer} stopped pushing replies");
}

/// Handle to a running reply listener
#[derive(Debug, Clone)]
pub struct ReplyListenerHandle {
    lifecycle: Lifecycle,
    local_addr: SocketAddr,
    exit: ExitWatch,
}

impl ReplyListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SocketState {
        self.lifecycle.state()
    }

    pub fn stop(&self) -> bool {
        let stopped = self.lifecycle.close();
        if stopped {
            info!("stopping reply listener on {}", self.local_addr);
        }
        stopped
    }

    pub async fn stopped(&self) {
        self.exit.wait().await
    }
}
