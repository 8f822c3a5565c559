//! Lease-based distributed mutual exclusion.
//!
//! A lock is a single store key whose value is a random owner token, written
//! with `SET NX PX <lease>`. While held, a renewal task re-arms the lease every
//! renewal interval so the key outlives slow critical sections. A crashed
//! holder stops renewing, and its key lapses within one lease.
//!
//! Renewal ends on its own when the holder has kept the lock for its
//! `max_hold` ceiling, so a wedged holder cannot keep a key forever.
//!
//! ```ignore
//! let lock = DistributedLock::new(store, LockSettings::default());
//! let mut handle = lock.acquire("nightly-report", Duration::from_secs(5)).await;
//! if handle.success() {
//!     run_report().await;
//!     handle.release().await;
//! }
//! ```

mod blocking;
mod handle;
mod renewal;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use redcoord_config::LockSettings;
use tokio::runtime::Handle;
use tokio::time::Instant;

pub use blocking::{BlockingLock, BlockingLockGuard};
pub use handle::LockHandle;

use crate::store::BackingStore;
use renewal::LeaseTarget;

/// Acquires named leases on a shared [`BackingStore`].
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn BackingStore>,
    settings: LockSettings,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn BackingStore>, settings: LockSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Acquire `key` with the configured default hold ceiling.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> LockHandle {
        self.acquire_with_max_hold(key, timeout, self.settings.default_max_hold())
            .await
    }

    /// Try to acquire `key`, retrying until `timeout` elapses.
    ///
    /// A zero `timeout` retries until the lock is obtained. Store errors are
    /// logged and count as a failed attempt; this never returns an error, the
    /// outcome is [`LockHandle::success`].
    pub async fn acquire_with_max_hold(
        &self,
        key: &str,
        timeout: Duration,
        max_hold: Duration,
    ) -> LockHandle {
        let token = new_token();
        if let Err(reason) = check_request(key, max_hold) {
            tracing::warn!(key, reason, "rejecting lock request");
            return LockHandle::failed(key, token);
        }

        let started = Instant::now();
        loop {
            let attempt_at = Instant::now();
            if self.attempt(key, &token).await {
                return self.on_acquired(Handle::current(), key, token, attempt_at, max_hold);
            }

            match self.next_wait(started.elapsed(), timeout) {
                Some(wait) => tokio::time::sleep(wait).await,
                None => break,
            }
        }

        crate::metrics::record_lock_contended();
        tracing::debug!(key, timeout_ms = timeout.as_millis() as u64, "lock not acquired");
        LockHandle::failed(key, token)
    }

    /// A single `SET NX` attempt. Errors are reported as "not acquired".
    pub(crate) async fn attempt(&self, key: &str, token: &str) -> bool {
        match self
            .store
            .set_if_absent(key, token, self.settings.lease())
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(key, error = %e, "lock attempt failed");
                false
            }
        }
    }

    pub(crate) fn on_acquired(
        &self,
        runtime: Handle,
        key: &str,
        token: String,
        acquired_at: Instant,
        max_hold: Duration,
    ) -> LockHandle {
        crate::metrics::record_lock_acquired();
        tracing::debug!(key, max_hold_ms = max_hold.as_millis() as u64, "lock acquired");

        let target = LeaseTarget {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            token,
            acquired_at,
            lease: self.settings.lease(),
            max_hold,
        };
        LockHandle::acquired(runtime, target, self.settings.renewal_interval())
    }

    /// How long to sleep before the next attempt, or `None` once the deadline
    /// has passed. The last sleep is clipped so one final attempt lands on
    /// the deadline.
    pub(crate) fn next_wait(&self, elapsed: Duration, timeout: Duration) -> Option<Duration> {
        let wait = self.retry_delay();
        if timeout.is_zero() {
            return Some(wait);
        }
        if elapsed >= timeout {
            return None;
        }
        Some(wait.min(timeout - elapsed))
    }

    fn retry_delay(&self) -> Duration {
        let base = self.settings.retry_interval();
        let jitter = self.settings.retry_jitter();
        if jitter.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
        base + Duration::from_millis(extra)
    }
}

pub(crate) fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub(crate) fn check_request(key: &str, max_hold: Duration) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("lock key is empty");
    }
    if max_hold.is_zero() {
        return Err("max hold must be positive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, DistributedLock) {
        let mem = Arc::new(MemoryStore::new("mem"));
        let store: Arc<dyn BackingStore> = mem.clone();
        (mem, DistributedLock::new(store, LockSettings::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_writes_token_and_keeps_it_alive() {
        let (mem, lock) = setup();

        let mut handle = lock.acquire("job", Duration::from_secs(1)).await;
        assert!(handle.success());
        assert!(handle.is_renewing());
        assert_eq!(handle.token().len(), 32);

        // Well past one lease; renewal must have kept the key
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mem.get("job").await.unwrap().as_deref(), Some(handle.token()));

        assert!(handle.release().await);
        assert_eq!(mem.get("job").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquirer_times_out() {
        let (_mem, lock) = setup();

        let first = lock.acquire("job", Duration::from_secs(1)).await;
        assert!(first.success());

        let started = Instant::now();
        let second = lock.acquire("job", Duration::from_millis(1000)).await;
        assert!(!second.success());
        assert!(!second.is_renewing());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1000));
        assert!(waited < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_lock_after_release() {
        let (_mem, lock) = setup();
        let mut first = lock.acquire("job", Duration::from_secs(1)).await;
        assert!(first.success());

        let contender = lock.clone();
        let waiter =
            tokio::spawn(async move { contender.acquire("job", Duration::from_secs(1)).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(first.release().await);

        let second = waiter.await.unwrap();
        assert!(second.success());
        assert_ne!(second.token(), first.token());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_waits_until_free() {
        let (_mem, lock) = setup();
        let mut first = lock.acquire("job", Duration::from_secs(1)).await;

        let contender = lock.clone();
        let waiter = tokio::spawn(async move { contender.acquire("job", Duration::ZERO).await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!waiter.is_finished());
        first.release().await;

        assert!(waiter.await.unwrap().success());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_lease_is_taken_over() {
        let (mem, lock) = setup();
        // A holder that crashed right after acquiring: no renewal
        mem.set_if_absent("job", "crashed", Duration::from_millis(2000))
            .await
            .unwrap();

        let started = Instant::now();
        let handle = lock.acquire("job", Duration::from_secs(5)).await;
        assert!(handle.success());
        assert!(started.elapsed() <= Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_stops_at_hold_ceiling() {
        let (mem, lock) = setup();
        let handle = lock
            .acquire_with_max_hold("job", Duration::from_secs(1), Duration::from_secs(3))
            .await;
        assert!(handle.success());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(handle.is_renewing());

        // Last refresh lands at 1s (1s + 2s lease reaches the 3s ceiling)
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(!handle.is_renewing());
        assert_eq!(mem.get("job").await.unwrap(), None);

        let next = lock.acquire("job", Duration::from_millis(100)).await;
        assert!(next.success());
    }

    #[tokio::test(start_paused = true)]
    async fn release_never_deletes_another_owner() {
        let (mem, lock) = setup();
        let mut handle = lock.acquire("job", Duration::from_secs(1)).await;
        assert!(handle.success());

        // Simulate expiry followed by a takeover
        mem.delete("job").await.unwrap();
        mem.set_if_absent("job", "other", Duration::from_secs(2))
            .await
            .unwrap();

        assert!(!handle.release().await);
        assert!(!handle.release().await);
        assert_eq!(mem.get("job").await.unwrap().as_deref(), Some("other"));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_stops_when_ownership_is_lost() {
        let (mem, lock) = setup();
        let handle = lock.acquire("job", Duration::from_secs(1)).await;

        mem.delete("job").await.unwrap();
        mem.set_if_absent("job", "other", Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!handle.is_renewing());
        assert_eq!(mem.ttl("job").map(|t| t <= Duration::from_secs(2)), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_survives_transient_store_errors() {
        let (mem, lock) = setup();
        let handle = lock.acquire("job", Duration::from_secs(1)).await;

        mem.set_offline(true);
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(handle.is_renewing());
        mem.set_offline(false);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.is_renewing());
        assert_eq!(mem.get("job").await.unwrap().as_deref(), Some(handle.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn store_errors_count_as_failed_attempts() {
        let (mem, lock) = setup();
        mem.set_offline(true);

        let handle = lock.acquire("job", Duration::from_millis(300)).await;
        assert!(!handle.success());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_invalid_requests() {
        let (_mem, lock) = setup();

        assert!(!lock.acquire("", Duration::from_secs(1)).await.success());
        assert!(
            !lock
                .acquire_with_max_hold("job", Duration::from_secs(1), Duration::ZERO)
                .await
                .success()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_releases_in_background() {
        let (mem, lock) = setup();
        {
            let handle = lock.acquire("job", Duration::from_secs(1)).await;
            assert!(handle.success());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mem.get("job").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquirers_are_exclusive() {
        let (_mem, lock) = setup();

        let a = lock.clone();
        let b = lock.clone();
        let (ha, hb) = tokio::join!(
            a.acquire("job", Duration::from_millis(1000)),
            b.acquire("job", Duration::from_millis(1000)),
        );
        assert!(ha.success() ^ hb.success());
    }

    #[tokio::test]
    async fn contended_acquire_yields_between_attempts() {
        let (_mem, lock) = setup();
        let held = lock.acquire("job", Duration::from_secs(1)).await;
        assert!(held.success());

        let mut waiting = tokio_test::task::spawn(lock.acquire("job", Duration::from_secs(1)));
        tokio_test::assert_pending!(waiting.poll());

        let mut free = tokio_test::task::spawn(lock.acquire("other", Duration::from_secs(1)));
        let handle = tokio_test::assert_ready!(free.poll());
        assert!(handle.success());
    }

    #[test]
    fn next_wait_clips_to_deadline() {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryStore::new("mem"));
        let lock = DistributedLock::new(store, LockSettings::default());

        assert_eq!(
            lock.next_wait(Duration::ZERO, Duration::from_secs(1)),
            Some(Duration::from_millis(64))
        );
        assert_eq!(
            lock.next_wait(Duration::from_millis(980), Duration::from_secs(1)),
            Some(Duration::from_millis(20))
        );
        assert_eq!(lock.next_wait(Duration::from_secs(1), Duration::from_secs(1)), None);
        assert_eq!(
            lock.next_wait(Duration::from_secs(60), Duration::ZERO),
            Some(Duration::from_millis(64))
        );
    }

    #[test]
    fn jitter_stays_in_range() {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryStore::new("mem"));
        let settings = LockSettings {
            retry_jitter_ms: 20,
            ..LockSettings::default()
        };
        let lock = DistributedLock::new(store, settings);
        for _ in 0..50 {
            let wait = lock.retry_delay();
            assert!(wait >= Duration::from_millis(64));
            assert!(wait <= Duration::from_millis(84));
        }
    }
}
