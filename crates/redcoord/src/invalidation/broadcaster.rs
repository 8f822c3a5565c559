//! Publishing side of the invalidation broadcast.

use std::sync::Arc;

use redcoord_config::InvalidationSettings;

use super::log::InvalidationLog;
use crate::clock::Clock;
use crate::keys::InvalidationKeys;
use crate::store::BackingStore;

/// What one [`Broadcaster::invalidate`] call accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Keys passed in.
    pub requested: usize,
    /// Blank keys and keys containing whitespace, which the space-joined
    /// message framing cannot carry.
    pub skipped: usize,
    pub batches: usize,
    /// Keys written to the history set.
    pub logged: usize,
    /// Keys carried by successful publishes.
    pub published: usize,
    /// History records dropped by the closing trim.
    pub trimmed: u64,
}

/// Removes keys from every subscribed process's local cache.
///
/// Keys are sent in batches: each batch is first recorded in the history set
/// and then published, so a subscriber that misses the message can still find
/// the keys when it replays history.
#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn BackingStore>,
    keys: InvalidationKeys,
    log: InvalidationLog,
    batch_size: usize,
}

impl Broadcaster {
    pub fn new(
        store: Arc<dyn BackingStore>,
        keys: InvalidationKeys,
        settings: &InvalidationSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let log = InvalidationLog::new(
            Arc::clone(&store),
            keys.clone(),
            settings.retention(),
            clock,
        );
        Self {
            store,
            keys,
            log,
            batch_size: settings.batch_size.max(1),
        }
    }

    pub fn log(&self) -> &InvalidationLog {
        &self.log
    }

    pub async fn invalidate<K: AsRef<str>>(&self, keys: &[K]) -> InvalidationReport {
        let mut report = InvalidationReport {
            requested: keys.len(),
            ..Default::default()
        };

        let valid: Vec<&str> = keys
            .iter()
            .map(AsRef::as_ref)
            .filter(|key| {
                let ok = !key.is_empty() && !key.contains(char::is_whitespace);
                if !ok {
                    tracing::warn!(key = ?key, "skipping key that cannot be broadcast");
                }
                ok
            })
            .collect();
        report.skipped = keys.len() - valid.len();

        if valid.is_empty() {
            return report;
        }

        for batch in valid.chunks(self.batch_size) {
            report.batches += 1;

            // History first: a subscriber replaying it must see every key
            // that was published
            match self.log.append(batch, self.log.now_ms()).await {
                Ok(()) => report.logged += batch.len(),
                Err(e) => {
                    tracing::warn!(error = %e, keys = batch.len(), "failed to record invalidation history");
                }
            }

            let payload = batch.join(" ");
            match self.store.publish(self.keys.channel(), &payload).await {
                Ok(receivers) => {
                    report.published += batch.len();
                    crate::metrics::record_invalidation_published(batch.len());
                    tracing::debug!(keys = batch.len(), receivers, "invalidation published");
                }
                Err(e) => {
                    tracing::warn!(error = %e, keys = batch.len(), "failed to publish invalidation");
                }
            }
        }

        match self.log.trim(self.log.now_ms()).await {
            Ok(trimmed) => report.trimmed = trimmed,
            Err(e) => tracing::warn!(error = %e, "failed to trim invalidation history"),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn broadcaster(clock: Arc<ManualClock>) -> (Arc<MemoryStore>, Broadcaster) {
        let mem = Arc::new(MemoryStore::new("mem"));
        let b = Broadcaster::new(
            mem.clone(),
            InvalidationKeys::default(),
            &InvalidationSettings::default(),
            clock,
        );
        (mem, b)
    }

    #[tokio::test]
    async fn ninety_keys_publish_three_batches() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mem, b) = broadcaster(clock);
        let keys: Vec<String> = (0..90).map(|i| format!("user:{i}")).collect();

        let report = b.invalidate(&keys).await;
        assert_eq!(report.batches, 3);
        assert_eq!(report.logged, 90);
        assert_eq!(report.published, 90);
        assert_eq!(report.skipped, 0);

        let published = mem.published();
        assert_eq!(published.len(), 3);
        for (channel, payload) in &published {
            assert_eq!(channel, "memory_sub:message");
            assert_eq!(payload.split(' ').count(), 30);
        }
        assert!(published[0].1.starts_with("user:0 user:1 "));
        assert_eq!(mem.sorted_len("memory_sub:history"), 90);
    }

    #[tokio::test]
    async fn skips_keys_that_break_framing() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mem, b) = broadcaster(clock);

        let report = b.invalidate(&["a", "", "two words", "b", "tab\tkey"]).await;
        assert_eq!(report.requested, 5);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.published, 2);
        assert_eq!(mem.published()[0].1, "a b");
    }

    #[tokio::test]
    async fn empty_input_touches_nothing() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mem, b) = broadcaster(clock);

        let report = b.invalidate::<&str>(&[]).await;
        assert_eq!(report, InvalidationReport::default());
        assert!(mem.published().is_empty());
    }

    #[tokio::test]
    async fn trims_history_older_than_retention() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mem, b) = broadcaster(clock.clone());

        b.invalidate(&["old"]).await;
        clock.advance(std::time::Duration::from_secs(61));
        let report = b.invalidate(&["new"]).await;

        assert_eq!(report.trimmed, 1);
        let keys: Vec<_> = b
            .log()
            .read_since(0)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, ["new"]);
        assert_eq!(mem.sorted_len("memory_sub:history"), 1);
    }

    #[tokio::test]
    async fn store_failure_is_reported_not_raised() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mem, b) = broadcaster(clock);
        mem.set_offline(true);

        let report = b.invalidate(&["a", "b"]).await;
        assert_eq!(report.batches, 1);
        assert_eq!(report.logged, 0);
        assert_eq!(report.published, 0);
    }
}
