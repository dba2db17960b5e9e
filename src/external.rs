//! Time-boxed cache for expensive third-party lookups (keyword rankings,
//! competitor data), keyed by (domain, data-type, params).
//!
//! A hit is only served while unexpired; expired entries are treated as
//! absent and refetched, never silently served stale. Concurrent calls for
//! the same key collapse into a single in-flight fetch. Fetch failures are
//! surfaced distinctly and never cached — a caller may still choose to
//! serve stale-but-present data via `peek`, flagged as such.

use crate::error::{NadimError, NadimResult};
use crate::now_secs;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Cache key: params are hashed order-independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub domain: String,
    pub data_type: String,
    pub params_hash: u64,
}

impl CacheKey {
    pub fn new(domain: &str, data_type: &str, params: &HashMap<String, String>) -> Self {
        // Sort params for a stable hash regardless of map order.
        let sorted: BTreeMap<&str, &str> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut hasher = DefaultHasher::new();
        sorted.hash(&mut hasher);
        Self {
            domain: domain.to_string(),
            data_type: data_type.to_string(),
            params_hash: hasher.finish(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    fetched_at: u64,
    expires_at: u64,
}

/// A cached payload surfaced to callers that explicitly accept staleness.
#[derive(Debug, Clone)]
pub struct CachedExternal {
    pub payload: Value,
    pub fetched_at: u64,
    pub is_stale: bool,
}

/// TTL assignment per data type: volatile metrics move fast, competitive
/// data slowly.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub volatile: Duration,
    pub competitive: Duration,
}

impl TtlPolicy {
    pub fn ttl_for(&self, data_type: &str) -> Duration {
        match data_type {
            "keywords" | "competitors" | "backlinks" => self.competitive,
            // traffic, engagement, sentiment, and anything unknown
            _ => self.volatile,
        }
    }
}

/// Shared cache in front of external data providers.
pub struct ExternalDataCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    inflight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    ttl_policy: TtlPolicy,
    fetch_timeout: Duration,
}

impl ExternalDataCache {
    pub fn new(ttl_policy: TtlPolicy, fetch_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            ttl_policy,
            fetch_timeout,
        }
    }

    fn fresh(&self, key: &CacheKey) -> Option<Value> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        if now_secs() < entry.expires_at {
            Some(entry.payload.clone())
        } else {
            None
        }
    }

    /// Cached payload regardless of freshness, flagged when stale. For
    /// callers that prefer stale data over nothing after a fetch failure.
    pub fn peek(
        &self,
        domain: &str,
        data_type: &str,
        params: &HashMap<String, String>,
    ) -> Option<CachedExternal> {
        let key = CacheKey::new(domain, data_type, params);
        let entries = self.entries.read().unwrap();
        entries.get(&key).map(|entry| CachedExternal {
            payload: entry.payload.clone(),
            fetched_at: entry.fetched_at,
            is_stale: now_secs() >= entry.expires_at,
        })
    }

    /// Return the cached payload when unexpired, otherwise invoke `fetch_fn`
    /// (bounded by the fetch timeout), store its result with the data-type
    /// TTL, and return it. Same-key concurrent callers wait for the first
    /// fetch instead of duplicating it.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        domain: &str,
        data_type: &str,
        params: &HashMap<String, String>,
        fetch_fn: F,
    ) -> NadimResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let key = CacheKey::new(domain, data_type, params);

        if let Some(payload) = self.fresh(&key) {
            return Ok(payload);
        }

        // Coalesce: one guard per key; the winner fetches, waiters re-check.
        let guard = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_default())
        };
        let _held = guard.lock().await;

        if let Some(payload) = self.fresh(&key) {
            self.release_guard(&key, &guard).await;
            return Ok(payload);
        }

        let result = tokio::time::timeout(self.fetch_timeout, fetch_fn()).await;
        let outcome = match result {
            Err(_) => Err(NadimError::ExternalTimeout {
                domain: domain.to_string(),
                data_type: data_type.to_string(),
            }),
            Ok(Err(e)) => Err(NadimError::ExternalFetch {
                domain: domain.to_string(),
                data_type: data_type.to_string(),
                reason: e.to_string(),
            }),
            Ok(Ok(payload)) => {
                let fetched_at = now_secs();
                let ttl = self.ttl_policy.ttl_for(data_type);
                let entry = CacheEntry {
                    payload: payload.clone(),
                    fetched_at,
                    expires_at: fetched_at + ttl.as_secs(),
                };
                self.entries.write().unwrap().insert(key.clone(), entry);
                tracing::debug!(domain, data_type, ttl_secs = ttl.as_secs(), "cached external fetch");
                Ok(payload)
            }
        };

        drop(_held);
        self.release_guard(&key, &guard).await;
        outcome
    }

    /// Drop a key's coalescing guard once no other caller holds it.
    async fn release_guard(&self, key: &CacheKey, guard: &Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().await;
        // Two references: the map's and ours. Nobody else is waiting.
        if Arc::strong_count(guard) <= 2 {
            inflight.remove(key);
        }
    }
}
