//! Background lease renewal owned by a [`LockHandle`](super::LockHandle).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::StoreResult;
use crate::store::BackingStore;

/// What a single renewal tick found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenewalOutcome {
    /// TTL refreshed; keep ticking.
    Extended,
    /// TTL refreshed for the last time; the hold ceiling is near.
    CeilingReached,
    /// The stored value is no longer our token.
    Lost,
}

#[derive(Clone)]
pub(crate) struct LeaseTarget {
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) key: String,
    pub(crate) token: String,
    pub(crate) acquired_at: Instant,
    pub(crate) lease: Duration,
    pub(crate) max_hold: Duration,
}

impl LeaseTarget {
    pub(crate) async fn renew_once(&self) -> StoreResult<RenewalOutcome> {
        let current = self.store.get(&self.key).await?;
        if current.as_deref() != Some(self.token.as_str()) {
            return Ok(RenewalOutcome::Lost);
        }
        self.store.refresh_ttl(&self.key, self.lease).await?;

        if self.acquired_at.elapsed() + self.lease < self.max_hold {
            Ok(RenewalOutcome::Extended)
        } else {
            Ok(RenewalOutcome::CeilingReached)
        }
    }
}

/// A repeating renewal task.
///
/// [`RenewalTask::stop`] resolves only once the task has exited, so no tick
/// can touch the store after it returns.
pub(crate) struct RenewalTask {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
    active: Arc<AtomicBool>,
}

impl RenewalTask {
    pub(crate) fn spawn(runtime: &Handle, target: LeaseTarget, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);

        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    // Shutdown wins over a due tick
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match target.renew_once().await {
                    Ok(RenewalOutcome::Extended) => {
                        tracing::trace!(key = %target.key, "lease renewed");
                    }
                    Ok(RenewalOutcome::CeilingReached) => {
                        tracing::info!(
                            key = %target.key,
                            max_hold_ms = target.max_hold.as_millis() as u64,
                            "lock reached its hold ceiling, letting the lease lapse"
                        );
                        break;
                    }
                    Ok(RenewalOutcome::Lost) => {
                        tracing::debug!(key = %target.key, "lock ownership lost, renewal stopped");
                        break;
                    }
                    Err(e) => {
                        crate::metrics::record_renewal_error();
                        tracing::warn!(key = %target.key, error = %e, "lease renewal failed, retrying next tick");
                    }
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        Self {
            handle,
            shutdown,
            active,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancel the task and wait for any in-flight tick to finish.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}
