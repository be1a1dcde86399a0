//! Latest-snapshot cell plus bounded fan-out to push subscribers.
//!
//! Publication is an atomic reference swap; pull readers always get the
//! most recent complete snapshot. Each push subscriber owns a small bounded
//! buffer — when it falls behind, its oldest undelivered snapshot is
//! discarded so the producer never waits on a slow consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use lookout_protocol::TracksSnapshot;

const SUBSCRIBER_BUFFER: usize = 4;

pub struct Broadcaster {
    latest: Mutex<Option<Arc<TracksSnapshot>>>,
    subscribers: Mutex<Vec<SubscriberHandle>>,
    next_subscriber_id: AtomicU64,
}

struct SubscriberHandle {
    id: u64,
    tx: Sender<Arc<TracksSnapshot>>,
    /// Drain side for the drop-oldest policy; the channel is MPMC, so the
    /// broadcaster can discard what the subscriber has not yet read.
    drain: Receiver<Arc<TracksSnapshot>>,
}

/// A push subscriber's receiving end. Dropping it detaches the subscriber
/// at the next publication.
pub struct Subscription {
    id: u64,
    rx: Receiver<Arc<TracksSnapshot>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&self) -> Option<Arc<TracksSnapshot>> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<Arc<TracksSnapshot>> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Latest published snapshot; `None` until the first frame lands.
    pub fn current(&self) -> Option<Arc<TracksSnapshot>> {
        self.lock(&self.latest).clone()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = bounded(SUBSCRIBER_BUFFER);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.lock(&self.subscribers).push(SubscriberHandle {
            id,
            tx,
            drain: rx.clone(),
        });
        debug!(subscriber = id, "Push subscriber registered");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock(&self.subscribers).retain(|sub| sub.id != id);
        debug!(subscriber = id, "Push subscriber removed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock(&self.subscribers).len()
    }

    /// Swap in the new snapshot and fan it out. Never blocks on a
    /// subscriber: full buffers lose their oldest entry, dead subscribers
    /// are pruned.
    pub fn publish(&self, snapshot: TracksSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.lock(&self.latest) = Some(Arc::clone(&snapshot));

        let mut subscribers = self.lock(&self.subscribers);
        subscribers.retain(|sub| match sub.tx.try_send(Arc::clone(&snapshot)) {
            Ok(()) => true,
            Err(TrySendError::Full(undelivered)) => {
                let _ = sub.drain.try_recv();
                let _ = sub.tx.try_send(undelivered);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(subscriber = sub.id, "Pruning disconnected subscriber");
                false
            }
        });
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
