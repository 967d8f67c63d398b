//! Coordinator-side command publisher (pub/sub variant)
//!
//! Binds the configured command port and accepts subscriber connections from
//! agents. A subscriber announces its topics with `{"subscribe": "<channel id>"}`
//! frames; a published command is written only to connections subscribed to
//! exactly that topic. Publishing is fire and forget: there is no delivery
//! confirmation, and a command published before the subscriber's filter
//! arrived is simply not seen by it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, trace, warn};

use super::address::ResolvedAddress;
use super::error::{BridgeError, BridgeResult};
use super::frame::{FrameReader, is_blank};
use super::lifecycle::{
    ACCEPT_BACKOFF, ExitGuard, ExitWatch, Lifecycle, SocketState, exit_signal,
};
use super::protocol::{Envelope, Request, SubscriptionFrame};

/// Commands buffered per subscriber before it starts lagging
const BROADCAST_CAPACITY: usize = 256;

/// One published frame, serialized once for all subscribers
#[derive(Debug)]
struct Published {
    topic: String,
    line: Vec<u8>,
}

/// Subscription bookkeeping shared by all connection tasks
#[derive(Debug, Default)]
struct Subscriptions {
    topics: Mutex<HashMap<String, usize>>,
    connections: AtomicUsize,
}

impl Subscriptions {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, topic: &str) {
        *self.topics().entry(topic.to_string()).or_default() += 1;
    }

    fn remove(&self, topic: &str) {
        let mut topics = self.topics();
        if let Some(count) = topics.get_mut(topic) {
            *count -= 1;
            if *count == 0 {
                topics.remove(topic);
            }
        }
    }

    fn count(&self, topic: &str) -> usize {
        self.topics().get(topic).copied().unwrap_or(0)
    }
}

/// Publisher before it starts serving
pub struct Publisher {
    address: ResolvedAddress,
    lifecycle: Lifecycle,
    listener: Option<TcpListener>,
}

impl Publisher {
    pub fn new(address: ResolvedAddress) -> Self {
        Self {
            address,
            lifecycle: Lifecycle::new(),
            listener: None,
        }
    }

    pub fn state(&self) -> SocketState {
        self.lifecycle.state()
    }

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
        info!("command publisher bound to {local_addr}");

        Ok(local_addr)
    }

    pub async fn serve(mut self) -> BridgeResult<PublisherHandle> {
        let local_addr = self.bind().await?;
        let listener = self.listener.take().ok_or(BridgeError::Closed)?;

        let (frames, _) = broadcast::channel(BROADCAST_CAPACITY);
        let subscriptions = Arc::new(Subscriptions::default());
        let (exit_guard, exit) = exit_signal();

        let actor = PublisherActor {
            listener,
            lifecycle: self.lifecycle.clone(),
            frames: frames.clone(),
            subscriptions: Arc::clone(&subscriptions),
            connections: JoinSet::new(),
            _exit: exit_guard,
        };

        self.lifecycle.advance(SocketState::Serving);
        tokio::spawn(actor.run());

        Ok(PublisherHandle {
            lifecycle: self.lifecycle,
            local_addr,
            frames,
            subscriptions,
            exit,
        })
    }
}

struct PublisherActor {
    listener: TcpListener,
    lifecycle: Lifecycle,
    frames: broadcast::Sender<Arc<Published>>,
    subscriptions: Arc<Subscriptions>,
    connections: JoinSet<()>,
    _exit: ExitGuard,
}

impl PublisherActor {
    #[instrument(skip(self), name = "publisher")]
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.lifecycle.closed() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("subscriber connected from {peer}");
                        self.connections.spawn(serve_subscriber(
                            stream,
                            peer,
                            self.frames.subscribe(),
                            Arc::clone(&self.subscriptions),
                        ));
                    }
                    Err(e) => {
                        warn!("failed to accept subscriber: {e}");
                        self.lifecycle.pause(ACCEPT_BACKOFF).await;
                    }
                },

                Some(_) = self.connections.join_next(), if !self.connections.is_empty() => {}
            }
        }

        self.connections.shutdown().await;
        drop(self.listener);
        debug!("command publisher stopped");
    }
}

/// Removes the topics of a subscriber once its task ends, aborted or not
struct SubscriberGuard {
    subscriptions: Arc<Subscriptions>,
    topics: HashSet<String>,
}

impl SubscriberGuard {
    fn new(subscriptions: Arc<Subscriptions>) -> Self {
        subscriptions.connections.fetch_add(1, Ordering::SeqCst);
        Self {
            subscriptions,
            topics: HashSet::new(),
        }
    }

    fn apply(&mut self, frame: SubscriptionFrame) {
        match frame {
            SubscriptionFrame::Subscribe(topic) => {
                if !self.topics.contains(&topic) {
                    self.subscriptions.add(&topic);
                    self.topics.insert(topic);
                }
            }
            SubscriptionFrame::Unsubscribe(topic) => {
                if self.topics.remove(&topic) {
                    self.subscriptions.remove(&topic);
                }
            }
        }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        for topic in &self.topics {
            self.subscriptions.remove(topic);
        }
        self.subscriptions.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut published: broadcast::Receiver<Arc<Published>>,
    subscriptions: Arc<Subscriptions>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(reader);
    let mut guard = SubscriberGuard::new(subscriptions);

    loop {
        tokio::select! {
            frame = frames.next_frame() => match frame {
                Ok(Some(frame)) if is_blank(&frame) => {}
                Ok(Some(frame)) => match serde_json::from_slice::<SubscriptionFrame>(&frame) {
                    Ok(subscription) => {
                        trace!("{peer}: {subscription:?}");
                        guard.apply(subscription);
                    }
                    Err(e) => warn!("ignoring malformed subscription frame from {peer}: {e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    debug!("failed to read from subscriber {peer}: {e}");
                    break;
                }
            },

            message = published.recv() => match message {
                Ok(message) => {
                    if !guard.topics.contains(&message.topic) {
                        continue;
                    }
                    if let Err(e) = writer.write_all(&message.line).await {
                        debug!("failed to write to subscriber {peer}: {e}");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("subscriber {peer} lagged behind, {skipped} commands dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!("subscriber {peer} disconnected");
}

/// Handle to a serving publisher. Clones share the same socket.
#[derive(Debug, Clone)]
pub struct PublisherHandle {
    lifecycle: Lifecycle,
    local_addr: SocketAddr,
    frames: broadcast::Sender<Arc<Published>>,
    subscriptions: Arc<Subscriptions>,
    exit: ExitWatch,
}

impl PublisherHandle {
    /// Bind and serve in one step
    pub async fn spawn(address: ResolvedAddress) -> BridgeResult<Self> {
        Publisher::new(address).serve().await
    }

    /// Publish `request` under the topic `channel_id`.
    ///
    /// Returns the number of subscribers of that topic at the time of
    /// publishing. Zero is not an error.
    #[instrument(skip(self, request), fields(kind = %request.kind()))]
    pub fn publish(&self, channel_id: &str, request: &Request) -> BridgeResult<usize> {
        if self.lifecycle.is_closed() {
            return Err(BridgeError::Closed);
        }

        let envelope = Envelope {
            topic: channel_id.to_string(),
            payload: request,
        };
        let mut line = serde_json::to_vec(&envelope)?;
        line.push(b'\n');

        let message = Arc::new(Published {
            topic: channel_id.to_string(),
            line,
        });

        // no connected subscriber at all is fine
        let _ = self.frames.send(message);

        let subscribers = self.subscriptions.count(channel_id);
        trace!("published to {subscribers} subscribers of {channel_id}");

        Ok(subscribers)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.count(topic) > 0
    }

    /// Number of connected subscribers, whatever their topics
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.connections.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SocketState {
        self.lifecycle.state()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn stop(&self) -> bool {
        let stopped = self.lifecycle.close();
        if stopped {
            info!("stopping command publisher on {}", self.local_addr);
        }
        stopped
    }

    /// Resolves once the serving task has exited and the port is released
    pub async fn stopped(&self) {
        self.exit.wait().await
    }
}
