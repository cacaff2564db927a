//! Per-channel "last seen" watermarks.
//!
//! Readers share the lock; any mutation, including the sweep's removal,
//! takes it exclusively. Lock poisoning is recovered so every operation
//! stays total.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::events::ChannelId;

/// Concurrently accessed map from channel id to its last update time.
#[derive(Debug, Default)]
pub struct WatermarkStore {
    entries: RwLock<HashMap<ChannelId, Instant>>,
}

impl WatermarkStore {
    /// Creates a store in which every given channel is tracked from `now`.
    pub fn new<I>(channel_ids: I, now: Instant) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ChannelId>,
    {
        let entries = channel_ids
            .into_iter()
            .map(|id| (id.into(), now))
            .collect();

        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Records activity for a channel, inserting it if absent.
    pub fn upsert(&self, channel_id: &str, time: Instant) {
        self.write().insert(channel_id.to_string(), time);
    }

    /// Stops tracking a channel. Returns false if it was not tracked.
    pub fn remove(&self, channel_id: &str) -> bool {
        self.write().remove(channel_id).is_some()
    }

    /// Copies the current entries for inspection.
    pub fn snapshot_for_sweep(&self) -> Vec<(ChannelId, Instant)> {
        self.read()
            .iter()
            .map(|(id, time)| (id.clone(), *time))
            .collect()
    }

    /// Removes every channel whose watermark is older than `now - timeout`
    /// and returns the removed ids.
    ///
    /// Candidates are found under the shared lock, then re-checked under
    /// the exclusive lock before removal: a refresh that lands in between
    /// keeps its channel tracked.
    pub fn expire(&self, now: Instant, timeout: Duration) -> Vec<ChannelId> {
        let candidates: Vec<ChannelId> = self
            .read()
            .iter()
            .filter(|(_, last)| is_stale(**last, now, timeout))
            .map(|(id, _)| id.clone())
            .collect();

        if candidates.is_empty() {
            return candidates;
        }

        let mut entries = self.write();
        candidates
            .into_iter()
            .filter(|id| {
                let stale = entries
                    .get(id)
                    .map_or(false, |last| is_stale(*last, now, timeout));
                if stale {
                    entries.remove(id);
                }
                stale
            })
            .collect()
    }

    /// Returns the last update time of a channel, if tracked.
    pub fn last_update(&self, channel_id: &str) -> Option<Instant> {
        self.read().get(channel_id).copied()
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.read().contains_key(channel_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChannelId, Instant>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChannelId, Instant>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Strictly older than the threshold.
fn is_stale(last: Instant, now: Instant, timeout: Duration) -> bool {
    now.checked_duration_since(last)
        .map_or(false, |age| age > timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TIMEOUT: Duration = Duration::from_secs(180);

    #[test]
    fn test_new_tracks_all_channels() {
        let now = Instant::now();
        let store = WatermarkStore::new(["a", "b"], now);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last_update("a"), Some(now));
        assert_eq!(store.last_update("b"), Some(now));
    }

    #[test]
    fn test_upsert_refreshes_and_inserts() {
        let start = Instant::now();
        let store = WatermarkStore::new(["a"], start);
        let later = start + Duration::from_secs(10);

        store.upsert("a", later);
        store.upsert("unknown", later);

        assert_eq!(store.len(), 2);
        assert_eq!(store.last_update("a"), Some(later));
        assert!(store.contains("unknown"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = WatermarkStore::new(["a"], Instant::now());
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_expire_removes_only_stale_channels() {
        let start = Instant::now();
        let store = WatermarkStore::new(["a", "b"], start);
        store.upsert("b", start + Duration::from_secs(60));

        let now = start + TIMEOUT + Duration::from_secs(1);
        let expired = store.expire(now, TIMEOUT);

        assert_eq!(expired, vec!["a".to_string()]);
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
    }

    #[test]
    fn test_expire_threshold_is_strict() {
        let start = Instant::now();
        let store = WatermarkStore::new(["a"], start);

        assert!(store.expire(start + TIMEOUT, TIMEOUT).is_empty());
        assert!(store.contains("a"));

        let expired = store.expire(start + TIMEOUT + Duration::from_millis(1), TIMEOUT);
        assert_eq!(expired.len(), 1);
    }

    #[test]
    fn test_expire_ignores_future_watermarks() {
        let start = Instant::now();
        let store = WatermarkStore::new(["a"], start + Duration::from_secs(5));
        assert!(store.expire(start, Duration::ZERO).is_empty());
    }

    #[test]
    fn test_snapshot_for_sweep_copies_entries() {
        let now = Instant::now();
        let store = WatermarkStore::new(["a", "b"], now);
        let mut snapshot = store.snapshot_for_sweep();
        snapshot.sort();
        assert_eq!(
            snapshot,
            vec![("a".to_string(), now), ("b".to_string(), now)]
        );
    }

    #[test]
    fn test_concurrent_refresh_and_expire() {
        let start = Instant::now();
        let ids: Vec<String> = (0..64).map(|i| format!("ch{}", i)).collect();
        let (refreshed, silent) = ids.split_at(32);
        let store = WatermarkStore::new(ids.clone(), start);
        let now = start + TIMEOUT * 2;

        let expired = std::thread::scope(|scope| {
            scope.spawn(|| {
                for id in refreshed {
                    store.upsert(id, now);
                }
            });
            let sweeper = scope.spawn(|| store.expire(now, TIMEOUT));
            sweeper.join().unwrap()
        });

        let unique: HashSet<&String> = expired.iter().collect();
        assert_eq!(unique.len(), expired.len(), "a channel expired twice: {:?}", expired);

        // Silent channels are always expired and stay gone.
        for id in silent {
            assert!(unique.contains(id), "{} was not expired", id);
            assert!(!store.contains(id));
        }

        // A refreshed channel keeps its fresh watermark whether the sweep
        // saw it before or after the refresh.
        for id in refreshed {
            assert_eq!(store.last_update(id), Some(now));
        }

        assert_eq!(store.len(), refreshed.len());
        assert!(store.expire(now, TIMEOUT).is_empty());
    }
}
