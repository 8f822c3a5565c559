//! Counters for lock and invalidation activity.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the host
//! process installs a recorder.

use metrics::counter;

pub fn record_lock_acquired() {
    counter!("redcoord_lock_acquired_total").increment(1);
}

pub fn record_lock_contended() {
    counter!("redcoord_lock_contended_total").increment(1);
}

pub fn record_lock_released() {
    counter!("redcoord_lock_released_total").increment(1);
}

pub fn record_renewal_error() {
    counter!("redcoord_lock_renewal_errors_total").increment(1);
}

pub fn record_invalidation_published(keys: usize) {
    counter!("redcoord_invalidation_batches_total").increment(1);
    counter!("redcoord_invalidation_keys_total").increment(keys as u64);
}

pub fn record_eviction(source: &'static str) {
    counter!("redcoord_evictions_total", "source" => source).increment(1);
}
