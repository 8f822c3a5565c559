//! Long-running consumer that keeps one process's local cache coherent.
//!
//! ## Lifecycle
//!
//! ```text
//! Stopped ──start──▶ Starting ──subscribed + caught up──▶ Subscribed
//!                                                            │   ▲
//!                      identity changed / stream ended ──────┘   │
//!                                                            ▼   │
//!                                                      Reconnecting
//! ```
//!
//! Every poll the agent asks its [`StoreProvider`] for the current store. A
//! new connection identity (first run, failover, reconfiguration) or a dead
//! message stream makes it drop the old subscription, subscribe again and
//! replay the invalidation history kept for the retention window. Nothing in
//! the loop is fatal: failures are logged and retried on the next poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use redcoord_config::InvalidationSettings;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::evictor::LocalCacheEvictor;
use super::log::InvalidationLog;
use crate::clock::{Clock, SystemClock};
use crate::error::StoreResult;
use crate::keys::InvalidationKeys;
use crate::store::{BackingStore, StoreProvider, redact_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Stopped,
    Starting,
    Subscribed,
    Reconnecting,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Stopped => "stopped",
            AgentState::Starting => "starting",
            AgentState::Subscribed => "subscribed",
            AgentState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Evict every whitespace-separated key in `payload`. Returns how many keys
/// were evicted.
pub fn apply_message(payload: &str, evictor: &dyn LocalCacheEvictor) -> usize {
    let mut evicted = 0;
    for key in payload.split_whitespace() {
        evictor.evict(key);
        crate::metrics::record_eviction("message");
        evicted += 1;
    }
    evicted
}

pub struct SubscriberAgent {
    name: String,
    provider: Arc<dyn StoreProvider>,
    evictor: Arc<dyn LocalCacheEvictor>,
    keys: InvalidationKeys,
    retention: Duration,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl SubscriberAgent {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn StoreProvider>,
        evictor: Arc<dyn LocalCacheEvictor>,
        keys: InvalidationKeys,
        settings: &InvalidationSettings,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            evictor,
            keys,
            retention: settings.retention(),
            poll_interval: settings.poll_interval(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the agent on the current runtime.
    pub fn start(self) -> AgentHandle {
        let (state_tx, state_rx) = watch::channel(AgentState::Starting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let name = self.name.clone();

        tracing::info!(agent = %name, channel = %self.keys.channel(), "starting invalidation subscriber");
        let handle = tokio::spawn(self.run(state_tx, shutdown_rx));

        AgentHandle {
            name,
            state: state_rx,
            shutdown: shutdown_tx,
            handle,
        }
    }

    async fn run(self, state: watch::Sender<AgentState>, mut shutdown: oneshot::Receiver<()>) {
        let mut current: Option<Subscription> = None;
        let mut caught_up = false;

        loop {
            // A subscribe against an unreachable host can hang, so the tick
            // itself must yield to shutdown.
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.tick(&mut current, &mut caught_up, &state) => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if let Some(subscription) = current.take() {
            subscription.stop().await;
        }
        state.send_replace(AgentState::Stopped);
        tracing::info!(agent = %self.name, "invalidation subscriber stopped");
    }

    async fn tick(
        &self,
        current: &mut Option<Subscription>,
        caught_up: &mut bool,
        state: &watch::Sender<AgentState>,
    ) {
        let store = match self.provider.store().await {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(agent = %self.name, error = %e, "failed to obtain store, retrying");
                return;
            }
        };
        let identity = store.identity();

        let stale = match current.as_ref() {
            None => true,
            Some(sub) if sub.identity != identity => {
                tracing::info!(
                    agent = %self.name,
                    from = %redact_url(&sub.identity),
                    to = %redact_url(&identity),
                    "connection changed, resubscribing"
                );
                true
            }
            Some(sub) if !sub.is_alive() => {
                tracing::info!(agent = %self.name, "subscription ended, resubscribing");
                true
            }
            Some(_) => false,
        };

        if stale {
            if let Some(old) = current.take() {
                state.send_replace(AgentState::Reconnecting);
                old.stop().await;
            }

            match Subscription::open(
                &self.name,
                &store,
                self.keys.channel(),
                identity,
                Arc::clone(&self.evictor),
            )
            .await
            {
                Ok(sub) => {
                    *current = Some(sub);
                    *caught_up = false;
                }
                Err(e) => {
                    tracing::warn!(agent = %self.name, error = %e, "subscribe failed, retrying");
                    return;
                }
            }
        }

        if !*caught_up {
            match self.catch_up(&store).await {
                Ok(evicted) => {
                    *caught_up = true;
                    tracing::info!(agent = %self.name, evicted, "replayed invalidation history");
                }
                Err(e) => {
                    tracing::warn!(agent = %self.name, error = %e, "history replay failed, retrying");
                }
            }
            state.send_if_modified(|s| {
                if *s == AgentState::Subscribed {
                    return false;
                }
                *s = AgentState::Subscribed;
                true
            });
        }
    }

    /// Evict everything invalidated during the retention window, covering
    /// messages published while this process was not subscribed.
    async fn catch_up(&self, store: &Arc<dyn BackingStore>) -> StoreResult<usize> {
        let log = InvalidationLog::new(
            Arc::clone(store),
            self.keys.clone(),
            self.retention,
            Arc::clone(&self.clock),
        );
        let records = log.read_recent().await?;
        for record in &records {
            self.evictor.evict(&record.key);
            crate::metrics::record_eviction("catch_up");
        }
        Ok(records.len())
    }
}

/// Control handle for a running [`SubscriberAgent`].
pub struct AgentHandle {
    name: String,
    state: watch::Receiver<AgentState>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl AgentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    /// Stop the agent and wait for its subscription to close.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

/// One live subscription and the task draining it.
struct Subscription {
    identity: String,
    alive: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Subscription {
    async fn open(
        agent: &str,
        store: &Arc<dyn BackingStore>,
        channel: &str,
        identity: String,
        evictor: Arc<dyn LocalCacheEvictor>,
    ) -> StoreResult<Self> {
        let mut messages = store.subscribe(channel).await?;
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let agent = agent.to_string();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    message = messages.next() => match message {
                        Some(payload) => {
                            let evicted = apply_message(&payload, evictor.as_ref());
                            tracing::debug!(agent = %agent, evicted, "applied invalidation message");
                        }
                        None => {
                            tracing::warn!(agent = %agent, "invalidation stream closed");
                            break;
                        }
                    }
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            identity,
            alive,
            shutdown,
            handle,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::invalidation::{Broadcaster, LocalCache};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const NOW: i64 = 10_000_000;
    const CHANNEL: &str = "memory_sub:message";

    /// A provider whose store can be swapped or made unavailable.
    struct SwitchableProvider {
        current: Mutex<Option<Arc<dyn BackingStore>>>,
    }

    impl SwitchableProvider {
        fn new(store: Arc<MemoryStore>) -> Arc<Self> {
            Arc::new(Self {
                current: Mutex::new(Some(store as Arc<dyn BackingStore>)),
            })
        }

        fn switch(&self, store: Option<Arc<MemoryStore>>) {
            *self.current.lock() = store.map(|s| s as Arc<dyn BackingStore>);
        }
    }

    #[async_trait]
    impl StoreProvider for SwitchableProvider {
        async fn store(&self) -> StoreResult<Arc<dyn BackingStore>> {
            self.current
                .lock()
                .clone()
                .ok_or_else(|| StoreError::connection("no store configured"))
        }
    }

    fn cache_with(keys: &[&str]) -> Arc<LocalCache<String, u32>> {
        let cache = Arc::new(LocalCache::new());
        for key in keys {
            cache.insert(key.to_string(), 1, Duration::from_secs(3600));
        }
        cache
    }

    fn agent(provider: Arc<dyn StoreProvider>, cache: Arc<LocalCache<String, u32>>) -> AgentHandle {
        SubscriberAgent::new(
            "orders",
            provider,
            cache,
            InvalidationKeys::default(),
            &InvalidationSettings::default(),
        )
        .with_clock(Arc::new(ManualClock::new(NOW)))
        .start()
    }

    async fn wait_for(handle: &AgentHandle, state: AgentState) {
        let mut rx = handle.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[test]
    fn apply_message_splits_on_whitespace() {
        let cache = cache_with(&["a", "b", "c"]);
        let evicted = apply_message("a  b\tmissing", cache.as_ref());
        assert_eq!(evicted, 3);
        assert!(!cache.contains_key("a"));
        assert!(!cache.contains_key("b"));
        assert!(cache.contains_key("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn published_keys_are_evicted() {
        let mem = Arc::new(MemoryStore::new("redis://primary"));
        let cache = cache_with(&["a", "b", "c"]);
        let handle = agent(SwitchableProvider::new(mem.clone()), cache.clone());
        wait_for(&handle, AgentState::Subscribed).await;

        mem.publish(CHANNEL, "a b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!cache.contains_key("a"));
        assert!(!cache.contains_key("b"));
        assert!(cache.contains_key("c"));
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn catch_up_replays_only_retention_window() {
        let mem = Arc::new(MemoryStore::new("redis://primary"));
        mem.sorted_add(
            "memory_sub:history",
            &[
                ("recent".to_string(), NOW - 30_000),
                ("stale".to_string(), NOW - 90_000),
            ],
        )
        .await
        .unwrap();

        let cache = cache_with(&["recent", "stale"]);
        let handle = agent(SwitchableProvider::new(mem), cache.clone());
        wait_for(&handle, AgentState::Subscribed).await;

        assert!(!cache.contains_key("recent"));
        assert!(cache.contains_key("stale"));
        handle.stop().await;
    }

    /// Invalidate `key` through a prefixed [`Broadcaster`], then start an
    /// agent on the same keys after the clock has moved by `gap`.
    async fn broadcast_then_start(key: &str, gap: Duration) -> Arc<LocalCache<String, u32>> {
        let mem = Arc::new(MemoryStore::new("redis://primary"));
        let store: Arc<dyn BackingStore> = mem.clone();
        let keys = InvalidationKeys::new("app:");
        let settings = InvalidationSettings::default();
        let clock = Arc::new(ManualClock::new(NOW));

        let broadcaster = Broadcaster::new(store, keys.clone(), &settings, clock.clone());
        let report = broadcaster.invalidate(&[key]).await;
        assert_eq!(report.logged, 1);

        clock.advance(gap);
        let cache = cache_with(&[key, "untouched"]);
        let handle = SubscriberAgent::new(
            "orders",
            SwitchableProvider::new(mem),
            cache.clone(),
            keys,
            &settings,
        )
        .with_clock(clock)
        .start();
        wait_for(&handle, AgentState::Subscribed).await;
        handle.stop().await;

        assert!(cache.contains_key("untouched"));
        cache
    }

    #[tokio::test(start_paused = true)]
    async fn late_agent_evicts_key_broadcast_within_retention() {
        let cache = broadcast_then_start("k", Duration::from_secs(59)).await;
        assert!(!cache.contains_key("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_agent_keeps_key_broadcast_before_retention() {
        let cache = broadcast_then_start("k", Duration::from_secs(61)).await;
        assert!(cache.contains_key("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn identity_change_resubscribes_and_replays() {
        let primary = Arc::new(MemoryStore::new("redis://primary"));
        let replica = Arc::new(MemoryStore::new("redis://replica"));
        replica
            .sorted_add("memory_sub:history", &[("missed".to_string(), NOW - 5_000)])
            .await
            .unwrap();

        let provider = SwitchableProvider::new(primary.clone());
        let cache = cache_with(&["missed", "other"]);
        let handle = agent(provider.clone(), cache.clone());
        wait_for(&handle, AgentState::Subscribed).await;
        assert_eq!(primary.subscriber_count(CHANNEL), 1);

        provider.switch(Some(replica.clone()));
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(handle.state(), AgentState::Subscribed);
        assert_eq!(primary.subscriber_count(CHANNEL), 0);
        assert_eq!(replica.subscriber_count(CHANNEL), 1);
        assert!(!cache.contains_key("missed"));

        replica.publish(CHANNEL, "other").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!cache.contains_key("other"));
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dead_stream_is_resubscribed() {
        let mem = Arc::new(MemoryStore::new("redis://primary"));
        let cache = cache_with(&["a"]);
        let handle = agent(SwitchableProvider::new(mem.clone()), cache.clone());
        wait_for(&handle, AgentState::Subscribed).await;

        mem.disconnect_subscribers();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(mem.subscriber_count(CHANNEL), 1);

        mem.publish(CHANNEL, "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!cache.contains_key("a"));
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_retrying_until_store_is_reachable() {
        let mem = Arc::new(MemoryStore::new("redis://primary"));
        mem.set_offline(true);
        let provider = SwitchableProvider::new(mem.clone());
        provider.switch(None);

        let handle = agent(provider.clone(), cache_with(&[]));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.state(), AgentState::Starting);

        provider.switch(Some(mem.clone()));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(handle.state(), AgentState::Starting);

        mem.set_offline(false);
        wait_for(&handle, AgentState::Subscribed).await;
        handle.stop().await;
    }

    /// A provider that never answers, like a connect to a blackholed host.
    struct HangingProvider;

    #[async_trait]
    impl StoreProvider for HangingProvider {
        async fn store(&self) -> StoreResult<Arc<dyn BackingStore>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_hanging_connect() {
        let handle = agent(Arc::new(HangingProvider), cache_with(&[]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.state(), AgentState::Starting);

        let state = handle.watch_state();
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("stop blocked on a hanging connect");
        assert_eq!(*state.borrow(), AgentState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_subscription() {
        let mem = Arc::new(MemoryStore::new("redis://primary"));
        let handle = agent(SwitchableProvider::new(mem.clone()), cache_with(&[]));
        wait_for(&handle, AgentState::Subscribed).await;

        let state = handle.watch_state();
        handle.stop().await;
        assert_eq!(*state.borrow(), AgentState::Stopped);
        assert_eq!(mem.subscriber_count(CHANNEL), 0);
    }
}
