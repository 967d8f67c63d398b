//! Agent-side responder
//!
//! Binds the port derived from the agent's channel id and answers requests from
//! the coordinator. Connections are accepted concurrently, but every request
//! goes through one work queue owned by the serving task:
//!
//! ```text
//! connection ──frame──▶ work queue ──▶ decode ──▶ dispatch ──▶ reply ──▶ connection
//! connection ──frame──▶      │
//!                            └─ one request at a time, in arrival order
//! ```
//!
//! A malformed frame or an unknown request type is answered with an `error`
//! response and the loop carries on. Only a failed bind is fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

use super::address::ResolvedAddress;
use super::error::{BridgeError, BridgeResult};
use super::frame::{FrameReader, is_blank, write_frame};
use super::lifecycle::{
    ACCEPT_BACKOFF, ExitGuard, ExitWatch, Lifecycle, SocketState, exit_signal,
};
use super::protocol::{Request, Response};
use crate::dispatch::dispatch;
use crate::metrics::MetricsSource;

/// Number of requests that may wait for the serving task
const WORK_QUEUE_SIZE: usize = 64;

/// A raw request frame plus the connection waiting for its answer
struct Job {
    frame: Vec<u8>,
    peer: SocketAddr,
    respond_to: oneshot::Sender<Response>,
}

/// Responder before it starts serving
pub struct Responder {
    address: ResolvedAddress,
    source: Arc<dyn MetricsSource>,
    lifecycle: Lifecycle,
    listener: Option<TcpListener>,
}

impl Responder {
    pub fn new(address: ResolvedAddress, source: Arc<dyn MetricsSource>) -> Self {
        Self {
            address,
            source,
            lifecycle: Lifecycle::new(),
            listener: None,
        }
    }

    /// Responder for `channel_id` on the derived port
    pub fn for_channel(
        host: impl Into<String>,
        channel_id: &str,
        source: Arc<dyn MetricsSource>,
    ) -> Self {
        Self::new(ResolvedAddress::for_channel(host, channel_id), source)
    }

    pub fn address(&self) -> &ResolvedAddress {
        &self.address
    }

    pub fn state(&self) -> SocketState {
        self.lifecycle.state()
    }

    /// Bind the listening socket.
    ///
    /// Fails with [`BridgeError::Bind`] if the port is taken. There is no
    /// fallback to another port: the coordinator would not find us there.
    #[instrument(skip(self), fields(addr = %self.address))]
    pub async fn bind(&mut self) -> BridgeResult<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }
        if self.lifecycle.is_closed() {
            return Err(BridgeError::Closed);
        }

        let listener = TcpListener::bind((self.address.host.as_str(), self.address.port))
            .await
            .map_err(|source| BridgeError::Bind {
                addr: self.address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        self.listener = Some(listener);
        self.lifecycle.advance(SocketState::Bound);
        info!("responder bound to {local_addr}");

        Ok(local_addr)
    }

    /// Start serving, binding first if that has not happened yet
    pub async fn serve(mut self) -> BridgeResult<ResponderHandle> {
        let local_addr = self.bind().await?;
        let listener = self.listener.take().ok_or(BridgeError::Closed)?;

        let (work_tx, work_rx) = mpsc::channel(WORK_QUEUE_SIZE);
        let (exit_guard, exit) = exit_signal();

        let actor = ResponderActor {
            listener,
            source: self.source,
            lifecycle: self.lifecycle.clone(),
            work_tx,
            work_rx,
            connections: JoinSet::new(),
            _exit: exit_guard,
        };

        self.lifecycle.advance(SocketState::Serving);
        tokio::spawn(actor.run());

        Ok(ResponderHandle {
            lifecycle: self.lifecycle,
            local_addr,
            exit,
        })
    }
}

struct ResponderActor {
    listener: TcpListener,
    source: Arc<dyn MetricsSource>,
    lifecycle: Lifecycle,
    work_tx: mpsc::Sender<Job>,
    work_rx: mpsc::Receiver<Job>,
    connections: JoinSet<()>,

    /// Dropped last, tells [`ResponderHandle::stopped`] that the port is free
    _exit: ExitGuard,
}

impl ResponderActor {
    #[instrument(skip(self), name = "responder")]
    async fn run(mut self) {
        debug!("starting responder loop");

        loop {
            tokio::select! {
                biased;

                _ = self.lifecycle.closed() => {
                    debug!("responder stopped");
                    break;
                }

                Some(job) = self.work_rx.recv() => {
                    // a stop while a request is in flight abandons it
                    tokio::select! {
                        _ = self.lifecycle.closed() => break,
                        _ = Self::handle(self.source.as_ref(), job) => {}
                    }
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!("accepted connection from {peer}");
                        self.connections.spawn(serve_connection(stream, peer, self.work_tx.clone()));
                    }
                    Err(e) => {
                        warn!("failed to accept connection: {e}");
                        self.lifecycle.pause(ACCEPT_BACKOFF).await;
                    }
                },

                Some(finished) = self.connections.join_next(), if !self.connections.is_empty() => {
                    match finished {
                        Err(e) if e.is_panic() => error!("connection task panicked: {e}"),
                        _ => {}
                    }
                }
            }
        }

        self.lifecycle.close();
        self.connections.shutdown().await;
        drop(self.listener);

        debug!("responder released its port");
    }

    async fn handle(source: &dyn MetricsSource, job: Job) {
        let response = match Request::decode(&job.frame) {
            Ok(request) => {
                debug!("handling {} from {}", request.kind(), job.peer);
                dispatch(source, &request).await
            }
            Err(e) => {
                warn!("rejecting request from {}: {e}", job.peer);
                Response::error(e.to_string())
            }
        };

        if job.respond_to.send(response).is_err() {
            debug!("connection {} closed before its reply was ready", job.peer);
        }
    }
}

/// Read frames from one connection and hand them to the serving task.
///
/// A connection never has more than one request outstanding.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, jobs: mpsc::Sender<Job>) {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(reader);

    loop {
        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("connection from {peer} closed");
                break;
            }
            Err(e) => {
                debug!("failed to read from {peer}: {e}");
                break;
            }
        };

        if is_blank(&frame) {
            continue;
        }

        let (respond_to, reply) = oneshot::channel();
        let job = Job {
            frame,
            peer,
            respond_to,
        };
        if jobs.send(job).await.is_err() {
            break;
        }

        let Ok(response) = reply.await else {
            break;
        };

        if let Err(e) = write_frame(&mut writer, &response).await {
            debug!("failed to reply to {peer}: {e}");
            break;
        }
    }
}

/// Handle to a serving responder.
///
/// Clones share the same responder. [`ResponderHandle::stop`] is synchronous
/// and idempotent, so it is safe to call from a signal handler.
#[derive(Debug, Clone)]
pub struct ResponderHandle {
    lifecycle: Lifecycle,
    local_addr: SocketAddr,
    exit: ExitWatch,
}

impl ResponderHandle {
    /// Bind and serve in one step
    pub async fn spawn(
        address: ResolvedAddress,
        source: Arc<dyn MetricsSource>,
    ) -> BridgeResult<Self> {
        Responder::new(address, source).serve().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SocketState {
        self.lifecycle.state()
    }

    pub fn is_serving(&self) -> bool {
        self.state() == SocketState::Serving
    }

    /// Ask the responder to stop. Returns `true` for the call that stopped it.
    pub fn stop(&self) -> bool {
        let stopped = self.lifecycle.close();
        if stopped {
            info!("stopping responder on {}", self.local_addr);
        }
        stopped
    }

    /// Resolves once a stop was requested
    pub async fn closed(&self) {
        self.lifecycle.closed().await
    }

    /// Resolves once the serving task has exited and the port is released
    pub async fn stopped(&self) {
        self.exit.wait().await
    }
}
