//! Intent classification for inbound chat messages.
//!
//! Classification is a pure function of the message text (plus stored slots
//! used only to bias slot extraction), so identical input always yields an
//! identical result. An optional async enrichment step is timeout-guarded
//! and can only refine the local result, never block it.

use crate::error::NadimResult;
use crate::now_secs;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Closed set of intent labels. Unknown input maps to `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Greeting,
    InfoQuery,
    WebsiteAnalysis,
    PlatformConnection,
    CampaignCreation,
    CompetitorAnalysis,
    General,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::Greeting => "greeting",
            IntentLabel::InfoQuery => "info_query",
            IntentLabel::WebsiteAnalysis => "website_analysis",
            IntentLabel::PlatformConnection => "platform_connection",
            IntentLabel::CampaignCreation => "campaign_creation",
            IntentLabel::CompetitorAnalysis => "competitor_analysis",
            IntentLabel::General => "general",
        }
    }
}

/// The outcome of classifying one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub label: IntentLabel,
    pub confidence: f32,
    pub slots: HashMap<String, String>,
    pub raw_text: String,
}

/// Optional enrichment step (e.g. a remote model refining slot extraction).
///
/// Implementations must treat the local result as authoritative fallback:
/// the classifier discards the enrichment on timeout or error.
#[async_trait]
pub trait IntentEnricher: Send + Sync {
    async fn enrich(&self, result: &IntentResult) -> NadimResult<IntentResult>;
}

const GREETING_WORDS: &[&str] = &["مرحبا", "السلام", "أهلا", "تحية", "هلا", "hello", "hi "];
const COMPANY_QUERY_PHRASES: &[&str] = &[
    "اسم شركتي",
    "اسم الشركة",
    "my company name",
    "what is my company",
];
const INDUSTRY_QUERY_PHRASES: &[&str] = &["مجال عملي", "مجال شركتي", "my industry"];
const COMPETITOR_WORDS: &[&str] = &["منافس", "منافسين", "competitor"];
const WEBSITE_WORDS: &[&str] = &["موقع", "موقعي", "سايت", "website", "site"];
const PLATFORM_WORDS: &[&str] = &["ربط", "منصة", "شوبيفاي", "سلة", "زد", "platform", "connect"];
const CAMPAIGN_WORDS: &[&str] = &["حملة", "إعلان", "تسويق", "campaign", "ads"];

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Keyword-based classifier over Arabic and English marketing vocabulary.
pub struct IntentClassifier {
    confidence_threshold: f32,
    domain_re: Regex,
}

impl IntentClassifier {
    pub fn new(confidence_threshold: f32) -> Self {
        // Bare domains like example.com, with or without scheme/www.
        let domain_re = Regex::new(
            r"(?i)(?:https?://)?(?:www\.)?([a-z0-9][a-z0-9-]*(?:\.[a-z0-9][a-z0-9-]*)+)",
        )
        .expect("domain regex is valid");
        Self {
            confidence_threshold,
            domain_re,
        }
    }

    /// Classify a message. Deterministic given identical input.
    ///
    /// `known_slots` only biases slot extraction: a "my company" query is
    /// resolved against a stored `company_name` when one is on file.
    pub fn classify(&self, text: &str, known_slots: &HashMap<String, String>) -> IntentResult {
        let normalized = text.trim().to_lowercase();
        let mut slots = HashMap::new();

        let (label, confidence) = if contains_any(&normalized, GREETING_WORDS) {
            (IntentLabel::Greeting, 0.9)
        } else if contains_any(&normalized, COMPANY_QUERY_PHRASES) {
            slots.insert("requested_slot".to_string(), "company_name".to_string());
            (IntentLabel::InfoQuery, 0.9)
        } else if contains_any(&normalized, INDUSTRY_QUERY_PHRASES) {
            slots.insert("requested_slot".to_string(), "industry".to_string());
            (IntentLabel::InfoQuery, 0.9)
        } else if contains_any(&normalized, COMPETITOR_WORDS) {
            (IntentLabel::CompetitorAnalysis, 0.85)
        } else if contains_any(&normalized, WEBSITE_WORDS) {
            if let Some(cap) = self.domain_re.captures(&normalized) {
                slots.insert("domain".to_string(), cap[1].to_string());
            }
            (IntentLabel::WebsiteAnalysis, 0.85)
        } else if contains_any(&normalized, PLATFORM_WORDS) {
            (IntentLabel::PlatformConnection, 0.85)
        } else if contains_any(&normalized, CAMPAIGN_WORDS) {
            (IntentLabel::CampaignCreation, 0.85)
        } else {
            (IntentLabel::General, 0.4)
        };

        // Bias: resolve "my company" mentions against the stored name.
        if (normalized.contains("شركتي") || normalized.contains("my company"))
            && !slots.contains_key("company_name")
        {
            if let Some(name) = known_slots.get("company_name") {
                slots.insert("company_name".to_string(), name.clone());
            }
        }

        // Low-confidence classifications never trigger business workflows.
        let label = if confidence < self.confidence_threshold {
            IntentLabel::General
        } else {
            label
        };

        IntentResult {
            label,
            confidence,
            slots,
            raw_text: text.to_string(),
        }
    }

    /// Classify, then give an optional enricher a bounded chance to refine
    /// the result. Timeout or failure falls back to the local result.
    pub async fn classify_with_enrichment(
        &self,
        text: &str,
        known_slots: &HashMap<String, String>,
        enricher: Option<&dyn IntentEnricher>,
        deadline: Duration,
    ) -> IntentResult {
        let local = self.classify(text, known_slots);
        let Some(enricher) = enricher else {
            return local;
        };

        match tokio::time::timeout(deadline, enricher.enrich(&local)).await {
            Ok(Ok(enriched)) => enriched,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "intent enrichment failed, using local result");
                local
            }
            Err(_) => {
                tracing::debug!(at = now_secs(), "intent enrichment timed out");
                local
            }
        }
    }
}
