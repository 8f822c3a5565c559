//! Time-indexed history of invalidated keys.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::StoreResult;
use crate::keys::InvalidationKeys;
use crate::store::BackingStore;

/// One invalidation as stored in the history set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRecord {
    pub key: String,
    pub timestamp_ms: i64,
}

/// Sorted-set history a subscriber replays after (re)connecting.
///
/// Each key is scored with the time it was invalidated. Re-invalidating a key
/// moves its score forward, so the set holds one entry per key.
#[derive(Clone)]
pub struct InvalidationLog {
    store: Arc<dyn BackingStore>,
    keys: InvalidationKeys,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl InvalidationLog {
    pub fn new(
        store: Arc<dyn BackingStore>,
        keys: InvalidationKeys,
        retention: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            keys,
            retention,
            clock,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Record `keys` as invalidated at `at_ms`.
    pub async fn append(&self, keys: &[&str], at_ms: i64) -> StoreResult<()> {
        let members: Vec<(String, i64)> = keys.iter().map(|k| (k.to_string(), at_ms)).collect();
        self.store.sorted_add(self.keys.history(), &members).await
    }

    /// Records scored at or after `timestamp_ms`, oldest first.
    pub async fn read_since(&self, timestamp_ms: i64) -> StoreResult<Vec<InvalidationRecord>> {
        let rows = self
            .store
            .sorted_range_from(self.keys.history(), timestamp_ms)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(key, timestamp_ms)| InvalidationRecord { key, timestamp_ms })
            .collect())
    }

    /// Records inside the retention window ending now.
    pub async fn read_recent(&self) -> StoreResult<Vec<InvalidationRecord>> {
        self.read_since(self.window_start(self.clock.now_ms())).await
    }

    /// Re-arm the history key's expiry and drop records older than the
    /// retention window. Returns how many records were removed.
    pub async fn trim(&self, now_ms: i64) -> StoreResult<u64> {
        self.store.expire(self.keys.history(), self.retention).await?;
        self.store
            .sorted_remove_below(self.keys.history(), self.window_start(now_ms))
            .await
    }

    fn window_start(&self, now_ms: i64) -> i64 {
        now_ms - self.retention.as_millis() as i64
    }
}
