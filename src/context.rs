//! Cross-agent context cache.
//!
//! Each analysis agent publishes a summary under its own namespace; all
//! agents read everyone else's. Writes are namespace-owned and
//! last-write-wins; the write timestamp is retained so readers can judge
//! staleness. Oversized payloads are compressed by dropping every field
//! outside a fixed allowlist — whole fields only, never truncated mid-field.
//!
//! Persistence beyond process lifetime is delegated to the backing
//! partition: publishes write through, misses read through.

use crate::error::{NadimError, NadimResult};
use crate::now_secs;
use crate::storage::KvPartition;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Fields that survive compression, in storage order.
pub const COMPRESSION_ALLOWLIST: &[&str] =
    &["summary", "key_insights", "recommendations", "metrics"];

/// One namespace's published context.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContextEntry {
    pub namespace: String,
    pub payload: Value,
    pub written_at: u64,
    /// Seconds until the entry is considered expired; `None` = no expiry
    pub ttl: Option<u64>,
    pub compressed: bool,
}

impl ContextEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.ttl.is_some_and(|ttl| now >= self.written_at + ttl)
    }
}

/// Relevance key sets per agent, matching the agents' specializations.
/// Every agent also receives the common keys.
const COMMON_KEYS: &[&str] = &["company_profile", "marketing_goals", "budget_allocation"];

fn relevant_keys(agent_id: &str) -> &'static [&'static str] {
    match agent_id {
        // SEO and market analysis
        "m1" => &[
            "seo_data",
            "keyword_rankings",
            "competitor_analysis",
            "site_performance",
        ],
        // Social media
        "m2" => &[
            "social_analytics",
            "engagement_metrics",
            "audience_demographics",
            "sentiment_analysis",
        ],
        // Campaign optimization
        "m3" => &[
            "campaign_metrics",
            "budget_allocation",
            "conversion_rates",
            "ad_performance",
        ],
        // Content strategy
        "m4" => &[
            "content_performance",
            "content_calendar",
            "topic_analysis",
            "content_engagement",
        ],
        // Analytics
        "m5" => &[
            "analytics_data",
            "roi_metrics",
            "traffic_sources",
            "user_behavior",
        ],
        _ => &[],
    }
}

/// Namespaced, size-bounded context store shared by all agents.
pub struct ContextCache {
    entries: RwLock<HashMap<String, ContextEntry>>,
    backing: Option<KvPartition>,
    size_bound: usize,
}

impl ContextCache {
    pub fn new(size_bound: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            backing: None,
            size_bound,
        }
    }

    pub fn with_backing(size_bound: usize, backing: KvPartition) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            backing: Some(backing),
            size_bound,
        }
    }

    fn backing_key(namespace: &str) -> String {
        format!("ns:{namespace}")
    }

    /// Drop every field outside the allowlist. Non-object payloads cannot be
    /// compressed and are returned unchanged.
    fn compress(payload: &Value) -> Value {
        match payload {
            Value::Object(map) => {
                let kept: serde_json::Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| COMPRESSION_ALLOWLIST.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Value::Object(kept)
            }
            other => other.clone(),
        }
    }

    /// Publish a payload under a namespace (last-write-wins for that
    /// namespace). Payloads over the size bound are allowlist-compressed;
    /// a payload still over the bound is rejected with a distinct error.
    pub fn publish(&self, namespace: &str, payload: Value) -> NadimResult<()> {
        self.publish_with_ttl(namespace, payload, None)
    }

    pub fn publish_with_ttl(
        &self,
        namespace: &str,
        payload: Value,
        ttl: Option<Duration>,
    ) -> NadimResult<()> {
        let serialized = serde_json::to_vec(&payload)?;
        let (payload, compressed) = if serialized.len() > self.size_bound {
            let compacted = Self::compress(&payload);
            let compacted_len = serde_json::to_vec(&compacted)?.len();
            if compacted_len > self.size_bound {
                return Err(NadimError::ContextOverflow {
                    namespace: namespace.to_string(),
                    size: compacted_len,
                    bound: self.size_bound,
                });
            }
            tracing::debug!(
                namespace,
                original = serialized.len(),
                compacted = compacted_len,
                "compressed context entry"
            );
            (compacted, true)
        } else {
            (payload, false)
        };

        let entry = ContextEntry {
            namespace: namespace.to_string(),
            payload,
            written_at: now_secs(),
            ttl: ttl.map(|d| d.as_secs()),
            compressed,
        };

        if let Some(backing) = &self.backing {
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    if let Err(e) = backing.put(Self::backing_key(namespace).as_bytes(), &bytes) {
                        tracing::warn!(namespace, error = %e, "context write-through failed");
                    }
                }
                Err(e) => tracing::warn!(namespace, error = %e, "context entry serialization failed"),
            }
        }

        self.entries
            .write()
            .unwrap()
            .insert(namespace.to_string(), entry);
        Ok(())
    }

    fn load_from_backing(&self, namespace: &str) -> Option<ContextEntry> {
        let backing = self.backing.as_ref()?;
        match backing.get(Self::backing_key(namespace).as_bytes()) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(namespace, error = %e, "context read-through failed");
                None
            }
        }
    }

    /// Full entry for a namespace, including its write timestamp for
    /// staleness checks. Expired entries are treated as absent.
    pub fn entry(&self, namespace: &str) -> Option<ContextEntry> {
        let now = now_secs();
        if let Some(entry) = self.entries.read().unwrap().get(namespace) {
            if entry.is_expired(now) {
                return None;
            }
            return Some(entry.clone());
        }
        // Memory miss: consult the backing store and warm the cache.
        let entry = self.load_from_backing(namespace)?;
        if entry.is_expired(now) {
            return None;
        }
        self.entries
            .write()
            .unwrap()
            .insert(namespace.to_string(), entry.clone());
        Some(entry)
    }

    /// The payload published under a namespace, if present and unexpired.
    pub fn read(&self, namespace: &str) -> Option<Value> {
        self.entry(namespace).map(|e| e.payload)
    }

    /// All other agents' unexpired payloads, keyed by namespace.
    pub fn read_others(&self, excluding_namespace: &str) -> HashMap<String, Value> {
        let now = now_secs();
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(ns, entry)| *ns != excluding_namespace && !entry.is_expired(now))
            .map(|(ns, entry)| (ns.clone(), entry.payload.clone()))
            .collect()
    }

    /// Merged context for one agent: other agents' entries filtered to the
    /// reader's relevant keys form the base layer, the reader's own entry is
    /// layered on top (its values win).
    pub fn read_for_agent(&self, agent_id: &str) -> HashMap<String, Value> {
        let mut keys: Vec<&str> = COMMON_KEYS.to_vec();
        keys.extend_from_slice(relevant_keys(agent_id));

        let mut merged = HashMap::new();
        for payload in self.read_others(agent_id).into_values() {
            if let Value::Object(map) = payload {
                for (k, v) in map {
                    if keys.contains(&k.as_str()) {
                        merged.insert(k, v);
                    }
                }
            }
        }
        if let Some(Value::Object(own)) = self.read(agent_id) {
            for (k, v) in own {
                merged.insert(k, v);
            }
        }
        merged
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }
}
