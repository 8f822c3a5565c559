//! Process-wide registry of pooled store connections.
//!
//! At most one store exists per client name. Callers naming the same client
//! share it for as long as the configured URL stays the same; when the URL
//! changes the stale store is closed and replaced on the next lookup.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::RwLock;
use redcoord_config::RedisConfig;

use super::{BackingStore, RedisStoreFactory, StoreProvider, redact_url};
use crate::error::StoreResult;

/// Creates a store for a connection URL.
pub trait StoreFactory: Send + Sync {
    fn build(&self, url: &str) -> StoreResult<Arc<dyn BackingStore>>;
}

struct RegistryEntry {
    url: String,
    store: Arc<dyn BackingStore>,
}

pub struct ConnectionRegistry {
    factory: Arc<dyn StoreFactory>,
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

static REDIS_REGISTRY: OnceLock<Arc<ConnectionRegistry>> = OnceLock::new();

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn StoreFactory>) -> Self {
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide Redis registry. Pool sizing is taken from the first
    /// caller's settings.
    pub fn global(config: &RedisConfig) -> Arc<ConnectionRegistry> {
        REDIS_REGISTRY
            .get_or_init(|| {
                Arc::new(ConnectionRegistry::new(Arc::new(
                    RedisStoreFactory::from_config(config),
                )))
            })
            .clone()
    }

    /// Return the store registered under `name`, building one when none exists
    /// or when the registered one targets a different URL.
    pub fn get_or_connect(&self, name: &str, url: &str) -> StoreResult<Arc<dyn BackingStore>> {
        // Fast path: shared lock, URL unchanged
        if let Some(entry) = self.entries.read().get(name) {
            if entry.url == url {
                return Ok(Arc::clone(&entry.store));
            }
        }

        let mut entries = self.entries.write();
        // Another caller may have rebuilt it while we waited for the lock
        if let Some(entry) = entries.get(name) {
            if entry.url == url {
                return Ok(Arc::clone(&entry.store));
            }
        }

        if let Some(stale) = entries.remove(name) {
            tracing::info!(
                client = name,
                old_url = %redact_url(&stale.url),
                new_url = %redact_url(url),
                "connection target changed, replacing store"
            );
            stale.store.close();
        }

        let store = self.factory.build(url)?;
        entries.insert(
            name.to_string(),
            RegistryEntry {
                url: url.to_string(),
                store: Arc::clone(&store),
            },
        );
        tracing::debug!(client = name, url = %redact_url(url), "store registered");
        Ok(store)
    }

    /// Close and forget the store registered under `name`.
    pub fn remove(&self, name: &str) -> bool {
        match self.entries.write().remove(name) {
            Some(entry) => {
                entry.store.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// A cache client type: a name plus a connection URL that may be swapped at
/// runtime (configuration reload, failover to a replica).
pub struct NamedClient {
    name: String,
    url: ArcSwap<String>,
    registry: Arc<ConnectionRegistry>,
}

impl NamedClient {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            url: ArcSwap::from_pointee(url.into()),
            registry,
        }
    }

    /// A client registered in the process-wide Redis registry.
    pub fn from_config(config: &RedisConfig) -> Self {
        Self::new(
            config.client_name.clone(),
            config.url.clone(),
            ConnectionRegistry::global(config),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> Arc<String> {
        self.url.load_full()
    }

    /// Point the client at a new target. The next [`StoreProvider::store`]
    /// call rebuilds the connection.
    pub fn set_url(&self, url: impl Into<String>) {
        self.url.store(Arc::new(url.into()));
    }
}

#[async_trait]
impl StoreProvider for NamedClient {
    async fn store(&self) -> StoreResult<Arc<dyn BackingStore>> {
        let url = self.url.load();
        self.registry.get_or_connect(&self.name, url.as_str())
    }
}
