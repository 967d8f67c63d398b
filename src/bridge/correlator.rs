//! Reply correlation for the pub/sub variant
//!
//! Replies come back on a socket shared by every channel, tagged only with the
//! channel id. The correlator keeps a FIFO of pending entries per channel:
//!
//! - the earliest pending entry for a channel consumes the next reply for that
//!   channel (first match wins); later requests for the same channel queue up
//!   behind it and never steal its reply
//! - an entry is removed when its reply arrives or when its waiter gives up,
//!   whichever happens first
//! - a reply nobody is waiting for is logged and dropped

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::error::{BridgeError, BridgeResult};
use super::protocol::Response;

struct PendingEntry {
    id: u64,
    issued_at: Instant,
    slot: oneshot::Sender<Response>,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<HashMap<String, VecDeque<PendingEntry>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, VecDeque<PendingEntry>>> {
        // entries stay consistent even if a holder panicked
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, channel_id: &str, id: u64) {
        let mut pending = self.pending();
        if let Some(queue) = pending.get_mut(channel_id) {
            queue.retain(|entry| entry.id != id);
            if queue.is_empty() {
                pending.remove(channel_id);
            }
        }
    }
}

/// Matches replies to pending requests by channel id.
///
/// Cheap to clone; all clones share the same table.
#[derive(Clone, Default)]
pub struct ReplyCorrelator {
    inner: Arc<Inner>,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next reply for `channel_id`.
    ///
    /// Register before sending the request, otherwise a fast reply can arrive
    /// before anyone waits for it.
    pub fn register(&self, channel_id: &str) -> PendingReply {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();

        let mut pending = self.inner.pending();
        let queue = pending.entry(channel_id.to_string()).or_default();
        queue.push_back(PendingEntry {
            id,
            issued_at: Instant::now(),
            slot,
        });
        trace!("registered pending reply #{id} for {channel_id} ({} queued)", queue.len());

        PendingReply {
            correlator: Arc::clone(&self.inner),
            channel_id: channel_id.to_string(),
            id,
            rx,
        }
    }

    /// Register and wait in one step
    pub async fn await_reply(&self, channel_id: &str, timeout: Duration) -> BridgeResult<Response> {
        self.register(channel_id).wait(timeout).await
    }

    /// Route a reply to the earliest waiter for `channel_id`.
    ///
    /// Returns `false` if nobody was waiting; the reply is then discarded.
    pub fn on_reply_received(&self, channel_id: &str, response: Response) -> bool {
        let mut pending = self.inner.pending();

        let Some(queue) = pending.get_mut(channel_id) else {
            warn!("discarding reply for {channel_id}: no pending request");
            return false;
        };

        let mut response = response;
        let mut delivered = false;
        while let Some(entry) = queue.pop_front() {
            match entry.slot.send(response) {
                Ok(()) => {
                    debug!(
                        "delivered reply #{} for {channel_id} after {:?}",
                        entry.id,
                        entry.issued_at.elapsed()
                    );
                    delivered = true;
                    break;
                }
                // waiter went away between timing out and removing its entry
                Err(returned) => response = returned,
            }
        }

        if queue.is_empty() {
            pending.remove(channel_id);
        }

        if !delivered {
            warn!("discarding reply for {channel_id}: all waiters are gone");
        }

        delivered
    }

    /// Number of requests still waiting for a reply on `channel_id`
    pub fn pending_count(&self, channel_id: &str) -> usize {
        self.inner.pending().get(channel_id).map_or(0, VecDeque::len)
    }

    /// Drop every pending entry. Waiters resolve with [`BridgeError::Closed`].
    pub fn clear(&self) {
        self.inner.pending().clear();
    }
}

/// One registered waiter. Dropping it removes the pending entry.
pub struct PendingReply {
    correlator: Arc<Inner>,
    channel_id: String,
    id: u64,
    rx: oneshot::Receiver<Response>,
}

impl PendingReply {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Wait for the reply, racing it against `timeout`
    pub async fn wait(mut self, timeout: Duration) -> BridgeResult<Response> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => Err(BridgeError::Timeout {
                channel_id: self.channel_id.clone(),
                after: timeout,
            }),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.remove(&self.channel_id, self.id);
    }
}
