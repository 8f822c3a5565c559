//! Cross-process cache invalidation with gap recovery.
//!
//! [`Broadcaster::invalidate`] records keys in a sorted-set history and
//! publishes them on a pub/sub channel. Every process runs a
//! [`SubscriberAgent`] that evicts published keys from its local cache and,
//! whenever its connection is (re)established, replays the history for the
//! retention window so that messages missed while disconnected still land.
//!
//! Delivery is at-least-once and eviction is idempotent.

mod broadcaster;
mod evictor;
mod log;
mod registry;
mod subscriber;

pub use broadcaster::{Broadcaster, InvalidationReport};
pub use evictor::{CachedEntry, EvictFn, LocalCache, LocalCacheEvictor};
pub use log::{InvalidationLog, InvalidationRecord};
pub use registry::SubscriberRegistry;
pub use subscriber::{AgentHandle, AgentState, SubscriberAgent, apply_message};
