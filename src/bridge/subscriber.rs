//! Agent-side command subscriber (pub/sub variant)
//!
//! Connects to the coordinator's command port, subscribes to its own channel id
//! and executes every command published under that topic. Replies are pushed to
//! the coordinator's reply port as `{"topic", "payload"}` envelopes.
//!
//! The coordinator may not be up yet, or may restart: the subscriber keeps
//! reconnecting at a fixed interval and re-sends its subscription each time.
//! Commands published while it was disconnected are lost.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument, trace, warn};

use super::address::PubSubPorts;
use super::frame::{FrameReader, is_blank, write_frame};
use super::lifecycle::{ExitGuard, ExitWatch, Lifecycle, SocketState, exit_signal};
use super::protocol::{Envelope, Request, Response, SubscriptionFrame};
use super::requester::DEFAULT_RECONNECT_INTERVAL;
use crate::dispatch::dispatch;
use crate::metrics::MetricsSource;

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Topic to subscribe to
    pub channel_id: String,

    /// Host of the coordinator
    pub host: String,

    pub ports: PubSubPorts,

    pub reconnect_interval: Duration,
}

impl SubscriberConfig {
    pub fn new(channel_id: impl Into<String>, host: impl Into<String>, ports: PubSubPorts) -> Self {
        Self {
            channel_id: channel_id.into(),
            host: host.into(),
            ports,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Start subscribing in the background
pub fn spawn_subscriber(config: SubscriberConfig, source: Arc<dyn MetricsSource>) -> SubscriberHandle {
    let lifecycle = Lifecycle::new();
    let (exit_guard, exit) = exit_signal();
    let subscribed = Arc::new(watch::Sender::new(false));

    let actor = SubscriberActor {
        config,
        source,
        lifecycle: lifecycle.clone(),
        subscribed: subscribed.clone(),
        replies: None,
        _exit: exit_guard,
    };
    tokio::spawn(actor.run());

    SubscriberHandle {
        lifecycle,
        subscribed,
        exit,
    }
}

struct SubscriberActor {
    config: SubscriberConfig,
    source: Arc<dyn MetricsSource>,
    lifecycle: Lifecycle,

    /// Set while the current command connection carries our subscription
    subscribed: Arc<watch::Sender<bool>>,

    /// Connection to the reply port, opened on the first reply
    replies: Option<TcpStream>,

    _exit: ExitGuard,
}

impl SubscriberActor {
    #[instrument(skip(self), name = "subscriber", fields(channel = %self.config.channel_id))]
    async fn run(mut self) {
        let lifecycle = self.lifecycle.clone();

        'session: loop {
            let stream = tokio::select! {
                biased;
                _ = lifecycle.closed() => break,
                stream = self.connect() => stream,
            };

            let (reader, mut writer) = stream.into_split();
            let subscription = SubscriptionFrame::Subscribe(self.config.channel_id.clone());
            match write_frame(&mut writer, &subscription).await {
                Ok(()) => {
                    lifecycle.advance(SocketState::Serving);
                    self.subscribed.send_replace(true);
                    info!("subscribed to commands for {}", self.config.channel_id);
                }
                Err(e) => warn!("failed to subscribe: {e}"),
            }

            let mut frames = FrameReader::new(reader);
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = lifecycle.closed() => break 'session,
                    frame = frames.next_frame() => frame,
                };

                match frame {
                    Ok(Some(frame)) if is_blank(&frame) => {}
                    Ok(Some(frame)) => {
                        tokio::select! {
                            biased;
                            _ = lifecycle.closed() => break 'session,
                            _ = self.handle(&frame) => {}
                        }
                    }
                    Ok(None) => {
                        warn!("coordinator closed the command connection");
                        break;
                    }
                    Err(e) => {
                        warn!("failed to read commands: {e}");
                        break;
                    }
                }
            }

            self.subscribed.send_replace(false);

            tokio::select! {
                biased;
                _ = lifecycle.closed() => break,
                _ = sleep(self.config.reconnect_interval) => {}
            }
        }

        self.subscribed.send_replace(false);
        debug!("subscriber stopped");
    }

    /// Connect to the command port, retrying until it succeeds
    async fn connect(&self) -> TcpStream {
        let addr = (self.config.host.as_str(), self.config.ports.commands);
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    self.lifecycle.advance(SocketState::Bound);
                    return stream;
                }
                Err(e) => trace!("coordinator not reachable yet: {e}"),
            }
            sleep(self.config.reconnect_interval).await;
        }
    }

    async fn handle(&mut self, frame: &[u8]) {
        let envelope: Envelope<Value> = match serde_json::from_slice(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping command without a usable envelope: {e}");
                return;
            }
        };

        if envelope.topic != self.config.channel_id {
            debug!("ignoring command for {}", envelope.topic);
            return;
        }

        let response = match Request::from_value(envelope.payload) {
            Ok(request) => dispatch(self.source.as_ref(), &request).await,
            Err(e) => {
                warn!("rejecting command: {e}");
                Response::error(e.to_string())
            }
        };

        self.push_reply(Envelope {
            topic: envelope.topic,
            payload: response,
        })
        .await;
    }

    /// Push a reply, reconnecting once if the cached connection is gone
    async fn push_reply(&mut self, reply: Envelope<Response>) {
        for attempt in 0..2 {
            let stream = match self.replies.take() {
                Some(stream) => stream,
                None => {
                    let addr = (self.config.host.as_str(), self.config.ports.replies);
                    match TcpStream::connect(addr).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!("failed to connect to the reply port: {e}");
                            return;
                        }
                    }
                }
            };
            let stream = self.replies.insert(stream);

            match write_frame(stream, &reply).await {
                Ok(()) => return,
                Err(e) => {
                    debug!("failed to push reply (attempt {}): {e}", attempt + 1);
                    self.replies = None;
                }
            }
        }

        warn!("dropping reply for {}", reply.topic);
    }
}

/// Handle to a running subscriber
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    lifecycle: Lifecycle,
    subscribed: Arc<watch::Sender<bool>>,
    exit: ExitWatch,
}

impl SubscriberHandle {
    pub fn state(&self) -> SocketState {
        self.lifecycle.state()
    }

    /// Whether the subscription was sent on the current command connection.
    ///
    /// Drops back to `false` while the coordinator is unreachable.
    pub fn is_subscribed(&self) -> bool {
        !self.lifecycle.is_closed() && *self.subscribed.borrow()
    }

    pub fn stop(&self) -> bool {
        let stopped = self.lifecycle.close();
        if stopped {
            info!("stopping subscriber");
        }
        stopped
    }

    pub async fn closed(&self) {
        self.lifecycle.closed().await
    }

    pub async fn stopped(&self) {
        self.exit.wait().await
    }
}
