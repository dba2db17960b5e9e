//! Smart-alert engine: watches aggregated signals published by the analysis
//! agents and pushes prioritized notifications to connected clients.
//!
//! Checks run per organization, either on a schedule or on demand, and one
//! organization's failure never blocks another's. A sentiment score at or
//! below the crisis threshold escalates straight to a critical,
//! non-dismissible alert with no batching delay. Alerts that cannot be
//! delivered (user offline) are retained for the next connect.

use crate::components::{ActionButton, Component};
use crate::connection::ConnectionRegistry;
use crate::context::ContextCache;
use crate::error::NadimResult;
use crate::now_secs;
use crate::protocol::ServerMessage;
use crate::storage::KvPartition;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Low => "low",
            AlertPriority::Medium => "medium",
            AlertPriority::High => "high",
            AlertPriority::Critical => "critical",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            AlertPriority::Low => 0,
            AlertPriority::Medium => 1,
            AlertPriority::High => 2,
            AlertPriority::Critical => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    SeoOpportunity,
    KeywordRanking,
    CompetitorActivity,
    TrafficAnomaly,
    ConversionDrop,
    CampaignPerformance,
    MarketTrend,
    SentimentCrisis,
}

impl AlertCategory {
    pub fn all() -> Vec<AlertCategory> {
        vec![
            AlertCategory::SeoOpportunity,
            AlertCategory::KeywordRanking,
            AlertCategory::CompetitorActivity,
            AlertCategory::TrafficAnomaly,
            AlertCategory::ConversionDrop,
            AlertCategory::CampaignPerformance,
            AlertCategory::MarketTrend,
            AlertCategory::SentimentCrisis,
        ]
    }
}

/// A prioritized alert event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub category: AlertCategory,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    pub organization_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub created_at: u64,
    /// Critical alerts are never auto-dismissed client-side
    pub dismissible: bool,
}

impl Alert {
    fn new(
        org_id: &str,
        category: AlertCategory,
        priority: AlertPriority,
        title: String,
        message: String,
        action_url: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            category,
            priority,
            title,
            message,
            organization_id: org_id.to_string(),
            action_url,
            created_at: now_secs(),
            dismissible: priority != AlertPriority::Critical,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::SmartAlert {
            category: self.category,
            priority: self.priority,
            title: self.title.clone(),
            message: self.message.clone(),
            action_url: self.action_url.clone(),
            timestamp: self.created_at,
        }
    }

    /// Renderable card form of this alert, for clients that embed alerts in
    /// a chat timeline instead of a notification tray.
    pub fn to_component(&self) -> Component {
        Component::AlertCard {
            title: self.title.clone(),
            description: self.message.clone(),
            priority: self.priority,
            action_button: self.action_url.clone().map(|url| ActionButton {
                text: "عرض التفاصيل".to_string(),
                action: url,
            }),
        }
    }
}

/// Undelivered-alert retention: a backing partition when available,
/// process memory otherwise.
enum PendingStore {
    Memory(Mutex<HashMap<String, Vec<Alert>>>),
    Disk(KvPartition),
}

/// Evaluates signals and dispatches alerts through the connection registry.
pub struct AlertEngine {
    registry: Arc<ConnectionRegistry>,
    context: Arc<ContextCache>,
    pending: PendingStore,
    crisis_threshold: f32,
    watched_orgs: RwLock<HashSet<String>>,
    checking: Mutex<HashSet<String>>,
    last_check: RwLock<Option<u64>>,
}

impl AlertEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        context: Arc<ContextCache>,
        crisis_threshold: f32,
    ) -> Self {
        Self {
            registry,
            context,
            pending: PendingStore::Memory(Mutex::new(HashMap::new())),
            crisis_threshold,
            watched_orgs: RwLock::new(HashSet::new()),
            checking: Mutex::new(HashSet::new()),
            last_check: RwLock::new(None),
        }
    }

    pub fn with_pending_store(mut self, partition: KvPartition) -> Self {
        self.pending = PendingStore::Disk(partition);
        self
    }

    /// Include an organization in scheduled background checks.
    pub fn watch_org(&self, org_id: &str) {
        self.watched_orgs.write().unwrap().insert(org_id.to_string());
    }

    /// Signals for an org live under the `{org}/{agent}` namespace; plain
    /// agent namespaces serve single-tenant setups.
    fn signal(&self, org_id: &str, agent: &str) -> Option<serde_json::Value> {
        self.context
            .read(&format!("{org_id}/{agent}"))
            .or_else(|| self.context.read(agent))
    }

    /// Evaluate all alert rules for one organization.
    ///
    /// Idle → checking → idle per org: a check already in flight for the
    /// same org is not duplicated.
    pub fn check(&self, org_id: &str) -> NadimResult<Vec<Alert>> {
        {
            let mut checking = self.checking.lock().unwrap();
            if !checking.insert(org_id.to_string()) {
                tracing::debug!(org_id, "alert check already in flight");
                return Ok(Vec::new());
            }
        }

        let mut alerts = Vec::new();
        alerts.extend(self.check_sentiment(org_id));
        alerts.extend(self.check_traffic(org_id));
        alerts.extend(self.check_keywords(org_id));
        alerts.extend(self.check_competitors(org_id));

        // Critical first: crisis alerts bypass any delay behind lower
        // priorities in the delivery order.
        alerts.sort_by(|a, b| b.priority.rank().cmp(&a.priority.rank()));

        *self.last_check.write().unwrap() = Some(now_secs());
        self.checking.lock().unwrap().remove(org_id);

        tracing::info!(org_id, count = alerts.len(), "alert check complete");
        Ok(alerts)
    }

    /// Crisis rule: sentiment at or below the threshold is critical.
    fn check_sentiment(&self, org_id: &str) -> Vec<Alert> {
        let Some(signal) = self.signal(org_id, "m2") else {
            return Vec::new();
        };
        let Some(score) = signal
            .get("sentiment_analysis")
            .and_then(|s| s.get("score"))
            .and_then(|s| s.as_f64())
        else {
            return Vec::new();
        };

        if score as f32 <= self.crisis_threshold {
            vec![Alert::new(
                org_id,
                AlertCategory::SentimentCrisis,
                AlertPriority::Critical,
                "🚨 أزمة في المشاعر العامة".to_string(),
                format!("انخفاض حاد في مؤشر المشاعر ({score:.2}). يتطلب تدخلاً فورياً."),
                Some("/social/sentiment".to_string()),
            )]
        } else {
            Vec::new()
        }
    }

    /// Traffic spike rule: a 30%+ jump over the previous period.
    fn check_traffic(&self, org_id: &str) -> Vec<Alert> {
        let Some(signal) = self.signal(org_id, "m5") else {
            return Vec::new();
        };
        let Some(sources) = signal.get("traffic_sources").and_then(|s| s.as_object()) else {
            return Vec::new();
        };

        let mut alerts = Vec::new();
        for (source, data) in sources {
            let (Some(current), Some(previous)) = (
                data.get("current").and_then(|v| v.as_f64()),
                data.get("previous").and_then(|v| v.as_f64()),
            ) else {
                continue;
            };
            if previous <= 0.0 {
                continue;
            }
            let change = (current - previous) / previous * 100.0;
            if change >= 30.0 {
                alerts.push(Alert::new(
                    org_id,
                    AlertCategory::TrafficAnomaly,
                    AlertPriority::High,
                    "📈 ارتفاع مفاجئ في الزيارات!".to_string(),
                    format!(
                        "زيادة بنسبة {change:.1}% في زيارات {source} ({current:.0} مقابل {previous:.0})"
                    ),
                    Some("/analytics/traffic".to_string()),
                ));
            }
        }
        alerts
    }

    /// Keyword opportunity rule: opportunity score above 75.
    fn check_keywords(&self, org_id: &str) -> Vec<Alert> {
        let Some(signal) = self.signal(org_id, "m1") else {
            return Vec::new();
        };
        let Some(rankings) = signal.get("keyword_rankings").and_then(|s| s.as_object()) else {
            return Vec::new();
        };

        let mut alerts = Vec::new();
        for (keyword, data) in rankings {
            let Some(score) = data.get("opportunity_score").and_then(|v| v.as_f64()) else {
                continue;
            };
            if score > 75.0 {
                let volume = data
                    .get("search_volume")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                alerts.push(Alert::new(
                    org_id,
                    AlertCategory::SeoOpportunity,
                    AlertPriority::Medium,
                    format!("🎯 فرصة SEO جديدة: {keyword}"),
                    format!("كلمة مفتاحية عالية القيمة بحجم بحث {volume} ومنافسة متوسطة"),
                    Some(format!("/seo/opportunities/{keyword}")),
                ));
            }
        }
        alerts
    }

    /// Competitor activity rule: more than two new pages published.
    fn check_competitors(&self, org_id: &str) -> Vec<Alert> {
        let Some(signal) = self.signal(org_id, "m1") else {
            return Vec::new();
        };
        let Some(activity) = signal.get("competitor_analysis") else {
            return Vec::new();
        };
        let (Some(competitor), Some(pages_added)) = (
            activity.get("competitor").and_then(|v| v.as_str()),
            activity.get("pages_added").and_then(|v| v.as_u64()),
        ) else {
            return Vec::new();
        };

        if pages_added > 2 {
            let traffic = activity
                .get("estimated_traffic")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            vec![Alert::new(
                org_id,
                AlertCategory::CompetitorActivity,
                AlertPriority::Medium,
                format!("⚡ نشاط منافس: {competitor}"),
                format!("أضاف {pages_added} صفحات جديدة بتقدير زيارات {traffic}"),
                Some(format!("/competitors/{competitor}")),
            )]
        } else {
            Vec::new()
        }
    }

    /// Deliver an alert to the org's connected users; retain it when nobody
    /// is connected.
    fn dispatch(&self, alert: &Alert) {
        let org_id = alert.organization_id.clone();
        let prefix = format!("{org_id}:");
        let delivered = self.registry.broadcast(
            |user| user == org_id || user.starts_with(&prefix),
            &alert.to_message(),
        );
        if delivered == 0 {
            tracing::info!(org_id = %alert.organization_id, alert_id = %alert.id, "no recipients, retaining alert");
            self.retain(alert);
        }
    }

    fn retain(&self, alert: &Alert) {
        match &self.pending {
            PendingStore::Memory(map) => {
                map.lock()
                    .unwrap()
                    .entry(alert.organization_id.clone())
                    .or_default()
                    .push(alert.clone());
            }
            PendingStore::Disk(partition) => {
                let key = format!("pending:{}:{}", alert.organization_id, alert.id);
                match serde_json::to_vec(alert) {
                    Ok(bytes) => {
                        if let Err(e) = partition.put(key.as_bytes(), &bytes) {
                            tracing::error!(error = %e, "failed to retain alert");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialize alert"),
                }
            }
        }
    }

    /// Drain retained alerts for an organization (called on connect).
    pub fn drain_pending(&self, org_id: &str) -> Vec<Alert> {
        match &self.pending {
            PendingStore::Memory(map) => map
                .lock()
                .unwrap()
                .remove(org_id)
                .unwrap_or_default(),
            PendingStore::Disk(partition) => {
                let prefix = format!("pending:{org_id}:");
                let mut alerts = Vec::new();
                match partition.scan_prefix(prefix.as_bytes()) {
                    Ok(items) => {
                        for (key, value) in items {
                            if let Ok(alert) = serde_json::from_slice::<Alert>(&value) {
                                alerts.push(alert);
                            }
                            let _ = partition.delete(&key);
                        }
                    }
                    Err(e) => tracing::error!(org_id, error = %e, "failed to read pending alerts"),
                }
                alerts
            }
        }
    }

    /// On-demand check: announces the check, evaluates, dispatches, and
    /// reports how many alerts were found.
    pub fn trigger_check(&self, org_id: &str) -> NadimResult<usize> {
        self.watch_org(org_id);

        let announce = ServerMessage::AlertCheckStarted {
            organization_id: org_id.to_string(),
            message: "بدء فحص التنبيهات الذكية...".to_string(),
            timestamp: now_secs(),
        };
        let prefix = format!("{org_id}:");
        self.registry
            .broadcast(|user| user == org_id || user.starts_with(&prefix), &announce);

        let alerts = self.check(org_id)?;
        for alert in &alerts {
            self.dispatch(alert);
        }
        Ok(alerts.len())
    }

    pub fn active_connections(&self) -> usize {
        self.registry.active_connections()
    }

    pub fn last_check(&self) -> Option<u64> {
        *self.last_check.read().unwrap()
    }

    /// Background monitor: periodic checks for every watched organization
    /// until the shutdown signal flips.
    pub async fn run_monitor(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let orgs: Vec<String> = self
                        .watched_orgs
                        .read()
                        .unwrap()
                        .iter()
                        .cloned()
                        .collect();
                    for org in orgs {
                        // One org's failure must not block the others.
                        match self.check(&org) {
                            Ok(alerts) => {
                                for alert in &alerts {
                                    self.dispatch(alert);
                                }
                            }
                            Err(e) => tracing::error!(%org, error = %e, "alert check failed"),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("alert monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Delivery;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn engine() -> (Arc<ConnectionRegistry>, Arc<ContextCache>, AlertEngine) {
        let registry = Arc::new(ConnectionRegistry::new());
        let context = Arc::new(ContextCache::new(16 * 1024));
        let engine = AlertEngine::new(Arc::clone(&registry), Arc::clone(&context), -0.5);
        (registry, context, engine)
    }

    #[test]
    fn test_sentiment_at_threshold_is_critical_and_not_dismissible() {
        let (_registry, context, engine) = engine();
        context
            .publish("org1/m2", json!({"sentiment_analysis": {"score": -0.5}}))
            .unwrap();

        let alerts = engine.check("org1").unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, AlertPriority::Critical);
        assert_eq!(alerts[0].category, AlertCategory::SentimentCrisis);
        assert!(!alerts[0].dismissible);
    }

    #[test]
    fn test_sentiment_above_threshold_is_never_critical() {
        let (_registry, context, engine) = engine();
        context
            .publish("org1/m2", json!({"sentiment_analysis": {"score": -0.49}}))
            .unwrap();

        let alerts = engine.check("org1").unwrap();
        assert!(alerts
            .iter()
            .all(|a| a.priority != AlertPriority::Critical));
    }

    #[test]
    fn test_traffic_spike_produces_high_alert() {
        let (_registry, context, engine) = engine();
        context
            .publish(
                "org1/m5",
                json!({"traffic_sources": {"organic": {"current": 12500, "previous": 8200}}}),
            )
            .unwrap();

        let alerts = engine.check("org1").unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::TrafficAnomaly);
        assert_eq!(alerts[0].priority, AlertPriority::High);
    }

    #[test]
    fn test_keyword_opportunity_threshold() {
        let (_registry, context, engine) = engine();
        context
            .publish(
                "org1/m1",
                json!({"keyword_rankings": {
                    "تسويق رقمي": {"opportunity_score": 85, "search_volume": 8100},
                    "low value": {"opportunity_score": 40, "search_volume": 100},
                }}),
            )
            .unwrap();

        let alerts = engine.check("org1").unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::SeoOpportunity);
    }

    #[test]
    fn test_critical_alerts_dispatch_first() {
        let (_registry, context, engine) = engine();
        context
            .publish(
                "org1/m2",
                json!({"sentiment_analysis": {"score": -0.9}}),
            )
            .unwrap();
        context
            .publish(
                "org1/m5",
                json!({"traffic_sources": {"social": {"current": 200, "previous": 100}}}),
            )
            .unwrap();

        let alerts = engine.check("org1").unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].priority, AlertPriority::Critical);
    }

    #[test]
    fn test_offline_alert_is_retained_and_drained() {
        let (_registry, context, engine) = engine();
        context
            .publish("org1/m2", json!({"sentiment_analysis": {"score": -0.8}}))
            .unwrap();

        let found = engine.trigger_check("org1").unwrap();
        assert_eq!(found, 1);

        let pending = engine.drain_pending("org1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].category, AlertCategory::SentimentCrisis);

        // Drained means gone.
        assert!(engine.drain_pending("org1").is_empty());
    }

    #[test]
    fn test_connected_user_receives_smart_alert() {
        let (registry, context, engine) = engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("org1:alice", tx);

        context
            .publish("org1/m2", json!({"sentiment_analysis": {"score": -0.7}}))
            .unwrap();

        engine.trigger_check("org1").unwrap();

        let mut got_alert = false;
        while let Ok(delivery) = rx.try_recv() {
            if let Delivery::Message { message, .. } = delivery {
                if matches!(message, ServerMessage::SmartAlert { .. }) {
                    got_alert = true;
                }
            }
        }
        assert!(got_alert);
        // Delivered alerts are not retained.
        assert!(engine.drain_pending("org1").is_empty());
    }

    #[test]
    fn test_alert_card_component_form() {
        let (_registry, context, engine) = engine();
        context
            .publish("org1/m2", json!({"sentiment_analysis": {"score": -0.8}}))
            .unwrap();

        let alerts = engine.check("org1").unwrap();
        match alerts[0].to_component() {
            Component::AlertCard {
                priority,
                action_button,
                ..
            } => {
                assert_eq!(priority, AlertPriority::Critical);
                assert!(action_button.is_some());
            }
            other => panic!("expected alert_card, got {}", other.kind()),
        }
    }

    #[test]
    fn test_quiet_signals_produce_no_alerts() {
        let (_registry, _context, engine) = engine();
        let alerts = engine.check("org-with-no-data").unwrap();
        assert!(alerts.is_empty());
        assert!(engine.last_check().is_some());
    }
}
