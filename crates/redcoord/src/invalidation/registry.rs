//! One subscriber agent per cache client type.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redcoord_config::InvalidationSettings;

use super::evictor::LocalCacheEvictor;
use super::subscriber::{AgentHandle, AgentState, SubscriberAgent};
use crate::clock::{Clock, SystemClock};
use crate::keys::InvalidationKeys;
use crate::store::StoreProvider;

static GLOBAL: OnceLock<SubscriberRegistry> = OnceLock::new();

/// Tracks running [`SubscriberAgent`]s by name so that registering the same
/// client type twice does not start a second agent.
pub struct SubscriberRegistry {
    agents: DashMap<String, AgentHandle>,
    keys: InvalidationKeys,
    settings: InvalidationSettings,
    clock: Arc<dyn Clock>,
}

impl SubscriberRegistry {
    pub fn new(keys: InvalidationKeys, settings: InvalidationSettings) -> Self {
        Self {
            agents: DashMap::new(),
            keys,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configure the process-wide registry. Returns `false` if it was already
    /// initialised, in which case the existing settings stay in effect.
    pub fn init_global(keys: InvalidationKeys, settings: InvalidationSettings) -> bool {
        GLOBAL.set(SubscriberRegistry::new(keys, settings)).is_ok()
    }

    /// The process-wide registry, with default settings unless
    /// [`SubscriberRegistry::init_global`] ran first.
    pub fn global() -> &'static SubscriberRegistry {
        GLOBAL.get_or_init(|| {
            SubscriberRegistry::new(InvalidationKeys::default(), InvalidationSettings::default())
        })
    }

    /// Start an agent for `name` unless one is already running. Returns
    /// whether a new agent was started. Must be called inside a Tokio runtime.
    pub fn register(
        &self,
        name: &str,
        provider: Arc<dyn StoreProvider>,
        evictor: Arc<dyn LocalCacheEvictor>,
    ) -> bool {
        match self.agents.entry(name.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(agent = name, "subscriber already registered");
                false
            }
            Entry::Vacant(slot) => {
                let agent = SubscriberAgent::new(
                    name,
                    provider,
                    evictor,
                    self.keys.clone(),
                    &self.settings,
                )
                .with_clock(Arc::clone(&self.clock));
                slot.insert(agent.start());
                true
            }
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn state(&self, name: &str) -> Option<AgentState> {
        self.agents.get(name).map(|agent| agent.state())
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop and forget the agent for `name`.
    pub async fn unregister(&self, name: &str) -> bool {
        match self.agents.remove(name) {
            Some((_, agent)) => {
                agent.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn shutdown_all(&self) {
        for name in self.names() {
            self.unregister(&name).await;
        }
    }
}
