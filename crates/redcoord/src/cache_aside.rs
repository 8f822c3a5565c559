//! Single-flight cache fill guarded by a [`DistributedLock`].

use std::future::Future;
use std::time::Duration;

use crate::error::{CoordError, Result};
use crate::lock::DistributedLock;

/// How long a loader waits for another process that is already filling the
/// same entry.
pub const LOAD_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Return the cached value if usable, otherwise load it under `lock_key` so
/// that only one process across the cluster runs `load` at a time.
///
/// The cache is checked again after the lock is taken, since the previous
/// holder has usually just filled it. A loaded value that `is_usable` rejects
/// is neither written back nor returned. Fails with
/// [`CoordError::LockTimeout`] if the lock cannot be obtained within
/// [`LOAD_LOCK_TIMEOUT`].
pub async fn get_or_load<T, Get, GetFut, Set, SetFut, Load, LoadFut>(
    lock: &DistributedLock,
    lock_key: &str,
    get_cached: Get,
    is_usable: impl Fn(&T) -> bool,
    set_cached: Set,
    load: Load,
) -> Result<Option<T>>
where
    T: Clone,
    Get: Fn() -> GetFut,
    GetFut: Future<Output = Option<T>>,
    Set: FnOnce(T) -> SetFut,
    SetFut: Future<Output = ()>,
    Load: FnOnce() -> LoadFut,
    LoadFut: Future<Output = Option<T>>,
{
    if lock_key.is_empty() {
        return Err(CoordError::invalid_argument("lock key is empty"));
    }

    if let Some(value) = get_cached().await.filter(|v| is_usable(v)) {
        return Ok(Some(value));
    }

    let mut handle = lock.acquire(lock_key, LOAD_LOCK_TIMEOUT).await;
    if !handle.success() {
        return Err(CoordError::lock_timeout(lock_key));
    }

    if let Some(value) = get_cached().await.filter(|v| is_usable(v)) {
        tracing::debug!(key = lock_key, "cache filled by another loader");
        handle.release().await;
        return Ok(Some(value));
    }

    let loaded = load().await.filter(|v| is_usable(v));
    if let Some(value) = loaded.as_ref() {
        set_cached(value.clone()).await;
    }
    handle.release().await;
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use redcoord_config::LockSettings;

    use super::*;
    use crate::store::{BackingStore, MemoryStore};

    fn lock() -> DistributedLock {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryStore::new("mem"));
        DistributedLock::new(store, LockSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn cached_value_skips_loader() {
        let lock = lock();
        let loads = AtomicUsize::new(0);
        let loads = &loads;

        let value = get_or_load(
            &lock,
            "fill:user:1",
            || async { Some(7) },
            |_| true,
            |_| async {},
            move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Some(1)
            },
        )
        .await
        .unwrap();

        assert_eq!(value, Some(7));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_load_once() {
        let lock = lock();
        let cache: Mutex<Option<u32>> = Mutex::new(None);
        let loads = AtomicUsize::new(0);
        let (cache, loads) = (&cache, &loads);

        let call = || {
            get_or_load(
                &lock,
                "fill:user:1",
                move || async move { *cache.lock() },
                |_| true,
                move |v| async move { *cache.lock() = Some(v) },
                move || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Some(42)
                },
            )
        };

        let (a, b) = tokio::join!(call(), call());
        assert_eq!(a.unwrap(), Some(42));
        assert_eq!(b.unwrap(), Some(42));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_value_is_neither_stored_nor_returned() {
        let lock = lock();
        let stored = AtomicUsize::new(0);
        let stored = &stored;

        let value = get_or_load(
            &lock,
            "fill:user:1",
            || async { None },
            |v: &i32| *v > 0,
            move |_| async move {
                stored.fetch_add(1, Ordering::SeqCst);
            },
            || async { Some(-1) },
        )
        .await
        .unwrap();

        assert_eq!(value, None);
        assert_eq!(stored.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_lock_times_out() {
        let lock = lock();
        let holder = lock
            .acquire_with_max_hold("fill:user:1", Duration::from_secs(1), Duration::from_secs(60))
            .await;
        assert!(holder.success());

        let result = get_or_load(
            &lock,
            "fill:user:1",
            || async { None::<u32> },
            |_| true,
            |_| async {},
            || async { Some(1) },
        )
        .await;

        assert!(matches!(result, Err(CoordError::LockTimeout { .. })));
    }
}
