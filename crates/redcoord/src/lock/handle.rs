use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;

use super::renewal::{LeaseTarget, RenewalTask};
use crate::store::BackingStore;

/// The outcome of an acquire attempt.
///
/// A successful handle owns the lease: its renewal task keeps the key alive
/// until [`LockHandle::release`] runs, ownership is lost, or the hold ceiling
/// is reached. Dropping an unreleased handle releases it in the background.
pub struct LockHandle {
    key: String,
    token: String,
    success: bool,
    acquired_at: Option<Instant>,
    max_hold: Duration,
    renewal: Option<RenewalTask>,
    store: Option<Arc<dyn BackingStore>>,
    runtime: Option<Handle>,
    released: bool,
}

impl LockHandle {
    pub(crate) fn failed(key: &str, token: String) -> Self {
        Self {
            key: key.to_string(),
            token,
            success: false,
            acquired_at: None,
            max_hold: Duration::ZERO,
            renewal: None,
            store: None,
            runtime: None,
            released: false,
        }
    }

    pub(crate) fn acquired(runtime: Handle, target: LeaseTarget, renewal_interval: Duration) -> Self {
        let key = target.key.clone();
        let token = target.token.clone();
        let store = Arc::clone(&target.store);
        let acquired_at = target.acquired_at;
        let max_hold = target.max_hold;
        let renewal = RenewalTask::spawn(&runtime, target, renewal_interval);

        Self {
            key,
            token,
            success: true,
            acquired_at: Some(acquired_at),
            max_hold,
            renewal: Some(renewal),
            store: Some(store),
            runtime: Some(runtime),
            released: false,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The random owner token written as the key's value.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn acquired_at(&self) -> Option<Instant> {
        self.acquired_at
    }

    pub fn max_hold(&self) -> Duration {
        self.max_hold
    }

    /// Whether the renewal task is still extending the lease.
    pub fn is_renewing(&self) -> bool {
        self.renewal.as_ref().is_some_and(RenewalTask::is_active)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop renewal and delete the key if it still holds this handle's token.
    ///
    /// Returns `true` only when this call removed the key. Safe to call any
    /// number of times; a key that has expired or been taken over by another
    /// owner is left untouched.
    pub async fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        if let Some(renewal) = self.renewal.take() {
            renewal.stop().await;
        }
        if !self.success {
            return false;
        }
        let Some(store) = self.store.as_ref() else {
            return false;
        };

        match store.delete_if_equals(&self.key, &self.token).await {
            Ok(true) => {
                crate::metrics::record_lock_released();
                tracing::debug!(key = %self.key, "lock released");
                true
            }
            Ok(false) => {
                tracing::debug!(key = %self.key, "lock already expired or owned by another holder");
                false
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to release lock, lease will lapse");
                false
            }
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("success", &self.success)
            .field("renewing", &self.is_renewing())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released || !self.success {
            return;
        }
        self.released = true;

        let renewal = self.renewal.take();
        let (Some(store), Some(runtime)) = (self.store.take(), self.runtime.take()) else {
            return;
        };
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        runtime.spawn(async move {
            if let Some(renewal) = renewal {
                renewal.stop().await;
            }
            match store.delete_if_equals(&key, &token).await {
                Ok(true) => {
                    crate::metrics::record_lock_released();
                    tracing::debug!(key = %key, "lock released on drop");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to release dropped lock, lease will lapse");
                }
            }
        });
    }
}
