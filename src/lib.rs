//! Nadim: a real-time conversational marketing-assistant backend.
//!
//! This library provides the orchestration core for a chat product whose
//! business logic lives in external analysis agents:
//! - A WebSocket connection registry with per-user delivery
//! - Per-user dialogue state (slots and turn history)
//! - Intent classification with UI-component generation
//! - A cross-agent context cache with allowlist compression
//! - A TTL cache for expensive third-party lookups
//! - A smart-alert engine pushing notifications to connected clients
//!
//! The HTTP/WebSocket surface lives behind the `server` feature (on by
//! default); the core is transport-agnostic and fully testable without it.

pub mod agents;
pub mod alerts;
pub mod components;
pub mod connection;
pub mod context;
pub mod dialogue;
pub mod error;
pub mod external;
pub mod intent;
pub mod orchestrator;
pub mod protocol;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;

// Re-export key types
pub use crate::agents::{AgentTask, AgentTaskRegistry, TaskOutput};
pub use crate::alerts::{Alert, AlertCategory, AlertEngine, AlertPriority};
pub use crate::components::{Component, Reply, ReplyGenerator};
pub use crate::connection::{ConnectionHandle, ConnectionRegistry, Delivery};
pub use crate::context::ContextCache;
pub use crate::dialogue::{DialogueStore, Role, SlotWrite, Turn};
pub use crate::error::{NadimError, NadimResult};
pub use crate::external::ExternalDataCache;
pub use crate::intent::{IntentClassifier, IntentLabel, IntentResult};
pub use crate::orchestrator::SessionOrchestrator;
pub use crate::storage::{KvPartition, KvStore};

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the Nadim core.
///
/// The confidence and crisis thresholds are deliberately tunable; the
/// defaults are documented in DESIGN.md.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the fjall backing store
    pub data_dir: PathBuf,
    /// Classifications below this confidence map to the `general` intent
    pub confidence_threshold: f32,
    /// Sentiment at or below this value escalates to a critical alert
    pub crisis_sentiment_threshold: f32,
    /// Turns retained per (user, session), oldest evicted first
    pub turn_window: usize,
    /// Serialized size bound for a context entry before compression kicks in
    pub context_size_bound: usize,
    /// Deadline for external data fetches
    pub fetch_timeout: Duration,
    /// Deadline for the optional classifier enrichment step
    pub enrichment_timeout: Duration,
    /// Deadline for collaborator agent tasks
    pub agent_task_timeout: Duration,
    /// Interval between background alert checks
    pub alert_check_interval: Duration,
    /// TTL for volatile external metrics (traffic, engagement, sentiment)
    pub volatile_ttl: Duration,
    /// TTL for slower-moving competitive data (keywords, competitors)
    pub competitive_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            confidence_threshold: 0.6,
            crisis_sentiment_threshold: -0.5,
            turn_window: 20,
            context_size_bound: 16 * 1024,
            fetch_timeout: Duration::from_secs(10),
            enrichment_timeout: Duration::from_millis(500),
            agent_task_timeout: Duration::from_secs(30),
            alert_check_interval: Duration::from_secs(300),
            volatile_ttl: Duration::from_secs(6 * 3600),
            competitive_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
