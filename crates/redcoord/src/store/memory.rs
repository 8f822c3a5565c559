//! In-process [`BackingStore`] with Redis-like TTL and pub/sub semantics.
//!
//! Expiry is tracked with `tokio::time::Instant`, so tests running on a paused
//! runtime clock see leases lapse deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{BackingStore, MessageStream};
use crate::error::{StoreError, StoreResult};

const CHANNEL_CAPACITY: usize = 1024;

/// Publishes retained for inspection; older entries are dropped first.
const PUBLISHED_HISTORY: usize = 256;

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    strings: HashMap<String, Expiring<String>>,
    sorted: HashMap<String, Expiring<HashMap<String, i64>>>,
}

impl MemoryState {
    fn live_string(&mut self, key: &str, now: Instant) -> Option<&mut Expiring<String>> {
        if self.strings.get(key).is_some_and(|e| e.is_expired(now)) {
            self.strings.remove(key);
        }
        self.strings.get_mut(key)
    }

    fn live_sorted(
        &mut self,
        key: &str,
        now: Instant,
    ) -> Option<&mut Expiring<HashMap<String, i64>>> {
        if self.sorted.get(key).is_some_and(|e| e.is_expired(now)) {
            self.sorted.remove(key);
        }
        self.sorted.get_mut(key)
    }
}

/// Single-process store.
///
/// All keyspace commands take one mutex, which makes `set_if_absent` and
/// `delete_if_equals` atomic with respect to each other.
#[derive(Debug)]
pub struct MemoryStore {
    identity: String,
    state: Mutex<MemoryState>,
    channels: DashMap<String, broadcast::Sender<String>>,
    published: Mutex<VecDeque<(String, String)>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            state: Mutex::new(MemoryState::default()),
            channels: DashMap::new(),
            published: Mutex::new(VecDeque::with_capacity(PUBLISHED_HISTORY)),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every command fail with a connection error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// End every open subscription stream, as a dropped connection would.
    pub fn disconnect_subscribers(&self) {
        self.channels.clear();
    }

    /// The most recent `(channel, payload)` publishes, oldest first. Only the
    /// last 256 are kept.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().iter().cloned().collect()
    }

    /// Live subscriber count on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Remaining TTL of a string key, `None` when absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state
            .live_string(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of members currently held in a sorted set.
    pub fn sorted_len(&self, key: &str) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.live_sorted(key, now).map_or(0, |e| e.value.len())
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::connection(format!(
                "memory store {} is offline",
                self.identity
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.live_string(key, now).is_some() {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        let mut state = self.state.lock();
        Ok(state
            .live_string(key, Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.live_string(key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        let had_string = state.live_string(key, now).is_some();
        let had_sorted = state.live_sorted(key, now).is_some();
        state.strings.remove(key);
        state.sorted.remove(key);
        Ok(had_string || had_sorted)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut state = self.state.lock();
        let matches = state
            .live_string(key, Instant::now())
            .is_some_and(|e| e.value == expected);
        if matches {
            state.strings.remove(key);
        }
        Ok(matches)
    }

    async fn sorted_add(&self, key: &str, members: &[(String, i64)]) -> StoreResult<()> {
        self.check_online()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.live_sorted(key, now).is_none() {
            state.sorted.insert(
                key.to_string(),
                Expiring {
                    value: HashMap::new(),
                    expires_at: None,
                },
            );
        }
        if let Some(set) = state.sorted.get_mut(key) {
            for (member, score) in members {
                set.value.insert(member.clone(), *score);
            }
        }
        Ok(())
    }

    async fn sorted_range_from(
        &self,
        key: &str,
        min_score: i64,
    ) -> StoreResult<Vec<(String, i64)>> {
        self.check_online()?;
        let mut state = self.state.lock();
        let Some(set) = state.live_sorted(key, Instant::now()) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<(String, i64)> = set
            .value
            .iter()
            .filter(|(_, score)| **score >= min_score)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        rows.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(rows)
    }

    async fn sorted_remove_below(&self, key: &str, cutoff: i64) -> StoreResult<u64> {
        self.check_online()?;
        let mut state = self.state.lock();
        let Some(set) = state.live_sorted(key, Instant::now()) else {
            return Ok(0);
        };
        let before = set.value.len();
        set.value.retain(|_, score| *score >= cutoff);
        let removed = (before - set.value.len()) as u64;
        if set.value.is_empty() {
            state.sorted.remove(key);
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let expires_at = Some(now + Duration::from_secs(ttl.as_secs()));
        let mut state = self.state.lock();
        if let Some(entry) = state.live_string(key, now) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        if let Some(entry) = state.live_sorted(key, now) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        Ok(false)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        self.check_online()?;
        {
            let mut published = self.published.lock();
            if published.len() == PUBLISHED_HISTORY {
                published.pop_front();
            }
            published.push_back((channel.to_string(), payload.to_string()));
        }
        let delivered = match self.channels.get(channel) {
            Some(tx) => tx.send(payload.to_string()).unwrap_or(0),
            None => 0,
        };
        Ok(delivered as u64)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        self.check_online()?;
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
