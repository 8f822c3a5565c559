//! A synchronous front end for callers outside the async runtime.

use std::ops::Deref;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use super::{DistributedLock, LockHandle};

/// Drives a [`DistributedLock`] from plain threads.
///
/// Each attempt is run on `runtime` with `block_on`, and the thread sleeps
/// between attempts. Renewal still runs as a task on `runtime`, so the runtime
/// must outlive every guard. Calling these methods from inside an async
/// context panics, as `block_on` does.
#[derive(Clone)]
pub struct BlockingLock {
    inner: DistributedLock,
    runtime: Handle,
}

impl BlockingLock {
    pub fn new(inner: DistributedLock, runtime: Handle) -> Self {
        Self { inner, runtime }
    }

    pub fn acquire(&self, key: &str, timeout: Duration) -> BlockingLockGuard {
        self.acquire_with_max_hold(key, timeout, self.inner.settings().default_max_hold())
    }

    pub fn acquire_with_max_hold(
        &self,
        key: &str,
        timeout: Duration,
        max_hold: Duration,
    ) -> BlockingLockGuard {
        let token = super::new_token();
        if let Err(reason) = super::check_request(key, max_hold) {
            tracing::warn!(key, reason, "rejecting lock request");
            return self.guard(LockHandle::failed(key, token));
        }

        let started = Instant::now();
        loop {
            let attempt_at = tokio::time::Instant::now();
            if self.runtime.block_on(self.inner.attempt(key, &token)) {
                let handle = self.inner.on_acquired(
                    self.runtime.clone(),
                    key,
                    token,
                    attempt_at,
                    max_hold,
                );
                return self.guard(handle);
            }

            match self.inner.next_wait(started.elapsed(), timeout) {
                Some(wait) => std::thread::sleep(wait),
                None => break,
            }
        }

        crate::metrics::record_lock_contended();
        tracing::debug!(key, timeout_ms = timeout.as_millis() as u64, "lock not acquired");
        self.guard(LockHandle::failed(key, token))
    }

    fn guard(&self, handle: LockHandle) -> BlockingLockGuard {
        BlockingLockGuard {
            handle,
            runtime: self.runtime.clone(),
        }
    }
}

/// A [`LockHandle`] released synchronously.
pub struct BlockingLockGuard {
    handle: LockHandle,
    runtime: Handle,
}

impl BlockingLockGuard {
    pub fn release(&mut self) -> bool {
        self.runtime.block_on(self.handle.release())
    }
}

impl Deref for BlockingLockGuard {
    type Target = LockHandle;

    fn deref(&self) -> &LockHandle {
        &self.handle
    }
}

impl Drop for BlockingLockGuard {
    fn drop(&mut self) {
        // Inside a runtime the inner handle's drop releases in the background
        if self.handle.success() && !self.handle.is_released() && Handle::try_current().is_err() {
            self.release();
        }
    }
}
