use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

const WATCH_CHANNEL_CAPACITY: usize = 1;

/// A live subscription slot. `token` exists only so a `WatchGuard` can
/// later prove, without holding a `Sender` of its own, that it is the
/// one that's still current -- holding a second `Sender` clone in the
/// guard would keep the channel open even after the map's own entry is
/// replaced, and the evicted subscriber's `recv()` would then hang
/// instead of observing the eviction.
struct Slot {
    tx: mpsc::Sender<String>,
    token: Arc<()>,
}

/// Per-id change notification. Each id has at most one live subscriber;
/// subscribing again for the same id evicts whoever was already
/// watching it by closing their channel out from under them.
pub struct WatchDispatcher {
    channels: RwLock<HashMap<Uuid, Slot>>,
    miss_total: AtomicU64,
}

impl WatchDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(WatchDispatcher {
            channels: RwLock::new(HashMap::new()),
            miss_total: AtomicU64::new(0),
        })
    }

    /// Start watching `id`. Returns a receiver that yields the payload
    /// of every subsequent `publish` for this id, and a guard that,
    /// when dropped, removes this subscription from the dispatcher --
    /// but only if nothing newer has already replaced it.
    ///
    /// A receiver that previously held this id's slot observes its
    /// sender being dropped here, which ends its stream with `None`
    /// rather than a value: that is the eviction signal.
    pub fn subscribe(self: &Arc<Self>, id: Uuid) -> (mpsc::Receiver<String>, WatchGuard) {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let token = Arc::new(());
        {
            let mut channels = self.channels.write().expect("watch lock poisoned");
            channels.insert(
                id,
                Slot {
                    tx,
                    token: Arc::clone(&token),
                },
            );
        }
        let guard = WatchGuard {
            dispatcher: Arc::clone(self),
            id,
            token,
        };
        (rx, guard)
    }

    /// Deliver `payload` to whoever currently watches `id`, if anyone.
    /// Never blocks: a full channel just counts as a miss. Returns
    /// `true` if the publish was dropped because the one subscriber's
    /// channel was already full, so callers can mirror the count into
    /// their own metrics without this crate depending on a particular
    /// metrics backend.
    pub fn publish(&self, id: &Uuid, payload: String) -> bool {
        let channels = self.channels.read().expect("watch lock poisoned");
        if let Some(slot) = channels.get(id) {
            if slot.tx.try_send(payload).is_err() {
                self.miss_total.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    pub fn miss_total(&self) -> u64 {
        self.miss_total.load(Ordering::Relaxed)
    }

    pub fn active_watches(&self) -> usize {
        self.channels.read().expect("watch lock poisoned").len()
    }
}

/// Releases a watch subscription on drop, but only if the dispatcher's
/// slot for this id still points at this guard's channel -- a newer
/// subscriber for the same id must not be evicted by an older one's
/// cleanup.
pub struct WatchGuard {
    dispatcher: Arc<WatchDispatcher>,
    id: Uuid,
    token: Arc<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let mut channels = self.dispatcher.channels.write().expect("watch lock poisoned");
        if let Some(current) = channels.get(&self.id) {
            if Arc::ptr_eq(&current.token, &self.token) {
                channels.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_delivered_to_current_subscriber() {
        let dispatcher = WatchDispatcher::new();
        let id = Uuid::new_v4();
        let (mut rx, _guard) = dispatcher.subscribe(id);

        dispatcher.publish(&id, "payload-1".to_string());
        assert_eq!(rx.recv().await, Some("payload-1".to_string()));
    }

    #[tokio::test]
    async fn resubscribing_evicts_previous_watcher() {
        let dispatcher = WatchDispatcher::new();
        let id = Uuid::new_v4();
        let (mut old_rx, _old_guard) = dispatcher.subscribe(id);
        let (_new_rx, _new_guard) = dispatcher.subscribe(id);

        // The old receiver observes its sender dropped from the map,
        // so recv() resolves to None rather than hanging or panicking.
        assert_eq!(old_rx.recv().await, None);
    }

    #[tokio::test]
    async fn publish_to_full_channel_counts_a_miss_without_blocking() {
        let dispatcher = WatchDispatcher::new();
        let id = Uuid::new_v4();
        let (_rx, _guard) = dispatcher.subscribe(id);

        dispatcher.publish(&id, "first".to_string());
        dispatcher.publish(&id, "second".to_string());

        assert_eq!(dispatcher.miss_total(), 1);
    }

    #[tokio::test]
    async fn dropping_a_stale_guard_does_not_evict_a_newer_subscriber() {
        let dispatcher = WatchDispatcher::new();
        let id = Uuid::new_v4();
        let (old_rx, old_guard) = dispatcher.subscribe(id);
        let (mut new_rx, _new_guard) = dispatcher.subscribe(id);

        drop(old_rx);
        drop(old_guard);

        dispatcher.publish(&id, "still-here".to_string());
        assert_eq!(new_rx.recv().await, Some("still-here".to_string()));
    }
}
