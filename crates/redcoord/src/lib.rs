//! Redis-backed coordination primitives for a fleet of processes sharing one
//! store.
//!
//! - [`lock`]: a lease-based distributed mutex with automatic renewal and a
//!   hold ceiling
//! - [`invalidation`]: broadcast of invalidated cache keys, with a short
//!   history so subscribers can recover messages missed while disconnected
//! - [`cache_aside`]: single-flight cache fill built on the lock
//!
//! Both primitives talk to a [`BackingStore`](store::BackingStore). Production
//! code uses [`RedisStore`](store::RedisStore), usually obtained through the
//! process-wide [`ConnectionRegistry`](store::ConnectionRegistry); tests and
//! single-node deployments can use [`MemoryStore`](store::MemoryStore).

pub mod cache_aside;
pub mod clock;
pub mod error;
pub mod invalidation;
pub mod keys;
pub mod lock;
pub mod metrics;
pub mod store;

pub use cache_aside::get_or_load;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoordError, Result, StoreError, StoreResult};
pub use invalidation::{
    AgentHandle, AgentState, Broadcaster, InvalidationLog, InvalidationRecord,
    InvalidationReport, LocalCache, LocalCacheEvictor, SubscriberAgent, SubscriberRegistry,
};
pub use keys::InvalidationKeys;
pub use lock::{BlockingLock, BlockingLockGuard, DistributedLock, LockHandle};
pub use store::{
    BackingStore, ConnectionRegistry, MemoryStore, NamedClient, RedisStore, StoreProvider,
};

pub use redcoord_config as config;
