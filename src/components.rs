//! Structured UI components attached to chat replies, and the generator
//! mapping intents to reply text plus components.
//!
//! Every component is independently renderable and serializable; a reply
//! may carry zero or many.

use crate::alerts::AlertPriority;
use crate::intent::{IntentLabel, IntentResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A clickable action inside a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionButton {
    pub text: String,
    pub action: String,
}

/// A single field requested by a form component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub field_type: String,
    pub required: bool,
}

/// A renderable UI directive attached to a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    QuickActions {
        title: String,
        buttons: Vec<ActionButton>,
    },
    FormInput {
        title: String,
        fields: Vec<FormField>,
    },
    AlertCard {
        title: String,
        description: String,
        priority: AlertPriority,
        #[serde(skip_serializing_if = "Option::is_none")]
        action_button: Option<ActionButton>,
    },
    PlatformCard {
        id: String,
        name: String,
        kind: String,
        description: String,
        setup_difficulty: String,
    },
}

impl Component {
    pub fn kind(&self) -> &'static str {
        match self {
            Component::QuickActions { .. } => "quick_actions",
            Component::FormInput { .. } => "form_input",
            Component::AlertCard { .. } => "alert_card",
            Component::PlatformCard { .. } => "platform_card",
        }
    }
}

/// A generated reply: natural-language text plus zero or more components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    pub components: Vec<Component>,
}

/// A connectable platform in the integration catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub description: String,
    pub setup_difficulty: String,
}

fn default_platforms() -> Vec<PlatformInfo> {
    vec![
        PlatformInfo {
            id: "salla".to_string(),
            name: "سلة".to_string(),
            kind: "ecommerce".to_string(),
            description: "منصة التجارة الإلكترونية الرائدة في السعودية".to_string(),
            setup_difficulty: "easy".to_string(),
        },
        PlatformInfo {
            id: "shopify".to_string(),
            name: "Shopify".to_string(),
            kind: "ecommerce".to_string(),
            description: "منصة التجارة الإلكترونية العالمية".to_string(),
            setup_difficulty: "medium".to_string(),
        },
        PlatformInfo {
            id: "zid".to_string(),
            name: "زد".to_string(),
            kind: "ecommerce".to_string(),
            description: "منصة التجارة الإلكترونية السعودية".to_string(),
            setup_difficulty: "easy".to_string(),
        },
        PlatformInfo {
            id: "google_analytics".to_string(),
            name: "Google Analytics".to_string(),
            kind: "analytics".to_string(),
            description: "تحليلات مواقع الويب والتطبيقات".to_string(),
            setup_difficulty: "medium".to_string(),
        },
    ]
}

/// Human-readable labels for the slots the assistant can ask for.
fn slot_label(slot: &str) -> String {
    match slot {
        "company_name" => "اسم الشركة".to_string(),
        "industry" => "مجال العمل".to_string(),
        other => other.replace('_', " "),
    }
}

/// Maps an intent result and the user's stored slots to a reply.
///
/// The policy is deterministic: the same intent and slot state always
/// produce the same text and components.
pub struct ReplyGenerator {
    platforms: Vec<PlatformInfo>,
}

impl Default for ReplyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyGenerator {
    pub fn new() -> Self {
        Self {
            platforms: default_platforms(),
        }
    }

    pub fn with_platforms(platforms: Vec<PlatformInfo>) -> Self {
        Self { platforms }
    }

    /// The integration catalog served on the platforms endpoint.
    pub fn platforms(&self) -> &[PlatformInfo] {
        &self.platforms
    }

    pub fn generate(&self, intent: &IntentResult, slots: &HashMap<String, String>) -> Reply {
        match intent.label {
            IntentLabel::Greeting => self.greeting(),
            IntentLabel::InfoQuery => self.info_query(intent, slots),
            IntentLabel::WebsiteAnalysis => self.website_analysis(intent),
            IntentLabel::PlatformConnection => self.platform_connection(),
            IntentLabel::CampaignCreation => Reply {
                text: "ممتاز! 📈 دعنا ننشئ حملة تسويقية ذكية. أحتاج لمعرفة نوع المنتج، الجمهور المستهدف، والميزانية المتاحة.".to_string(),
                components: Vec::new(),
            },
            IntentLabel::CompetitorAnalysis => Reply {
                text: "جيد! 👁️ أستطيع مراقبة نشاط منافسيك: المحتوى الجديد، الكلمات المستهدفة، وتقديرات الزيارات.".to_string(),
                components: Vec::new(),
            },
            IntentLabel::General => Reply {
                text: "أنا هنا لمساعدتك في التسويق الرقمي. يمكنني تحليل موقعك، ربط منصاتك، أو إنشاء حملات تسويقية. 🤔 كيف أساعدك؟".to_string(),
                components: Vec::new(),
            },
        }
    }

    fn greeting(&self) -> Reply {
        Reply {
            text: "مرحباً! 👋 أنا نديم، مساعدك الذكي في التسويق الرقمي. كيف يمكنني مساعدتك اليوم؟".to_string(),
            components: vec![Component::QuickActions {
                title: "إجراءات سريعة".to_string(),
                buttons: vec![
                    ActionButton {
                        text: "📊 تحليل موقعي".to_string(),
                        action: "website_analysis".to_string(),
                    },
                    ActionButton {
                        text: "🔗 ربط منصة".to_string(),
                        action: "connect_platform".to_string(),
                    },
                    ActionButton {
                        text: "📈 إنشاء حملة".to_string(),
                        action: "create_campaign".to_string(),
                    },
                    ActionButton {
                        text: "👁️ تحليل منافسين".to_string(),
                        action: "competitor_analysis".to_string(),
                    },
                ],
            }],
        }
    }

    /// Answers from the slot map when possible; a `form_input` is emitted
    /// only when the requested slot is absent.
    fn info_query(&self, intent: &IntentResult, slots: &HashMap<String, String>) -> Reply {
        let requested = intent
            .slots
            .get("requested_slot")
            .map(String::as_str)
            .unwrap_or("company_name");

        if let Some(value) = slots.get(requested) {
            return Reply {
                text: match requested {
                    "company_name" => format!("اسم شركتك المسجل لدي هو: {value} ✅"),
                    "industry" => format!("مجال عملك المسجل لدي هو: {value} ✅"),
                    _ => format!("القيمة المسجلة لدي: {value}"),
                },
                components: Vec::new(),
            };
        }

        Reply {
            text: format!(
                "لم أسجل {} بعد. هل يمكنك تزويدي به؟",
                slot_label(requested)
            ),
            components: vec![Component::FormInput {
                title: "معلومات الشركة".to_string(),
                fields: vec![FormField {
                    name: requested.to_string(),
                    label: slot_label(requested),
                    field_type: "text".to_string(),
                    required: true,
                }],
            }],
        }
    }

    fn website_analysis(&self, intent: &IntentResult) -> Reply {
        if let Some(domain) = intent.slots.get("domain") {
            Reply {
                text: format!(
                    "ممتاز! 🔍 سأبدأ تحليلاً شاملاً للموقع {domain}: نوع العمل، تحليل SEO، والمنافسين."
                ),
                components: vec![Component::PlatformCard {
                    id: "website_analysis".to_string(),
                    name: domain.clone(),
                    kind: "website".to_string(),
                    description: "تحليل شامل للموقع: SEO، المحتوى، والمنافسون".to_string(),
                    setup_difficulty: "easy".to_string(),
                }],
            }
        } else {
            Reply {
                text: "ممتاز! 🔍 أستطيع تحليل موقعك الإلكتروني بشكل شامل. أرسل لي رابط الموقع وسأبدأ فوراً.".to_string(),
                components: vec![Component::QuickActions {
                    title: "تحليل الموقع".to_string(),
                    buttons: vec![ActionButton {
                        text: "📎 إرسال رابط الموقع".to_string(),
                        action: "provide_website_url".to_string(),
                    }],
                }],
            }
        }
    }

    fn platform_connection(&self) -> Reply {
        Reply {
            text: "رائع! 🔗 أستطيع مساعدتك في ربط منصاتك التجارية. أي منصة تريد ربطها؟".to_string(),
            components: self
                .platforms
                .iter()
                .map(|p| Component::PlatformCard {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    kind: p.kind.clone(),
                    description: p.description.clone(),
                    setup_difficulty: p.setup_difficulty.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentClassifier;

    fn classify(text: &str, slots: &HashMap<String, String>) -> IntentResult {
        IntentClassifier::new(0.6).classify(text, slots)
    }

    #[test]
    fn test_greeting_has_fixed_quick_actions() {
        let gen = ReplyGenerator::new();
        let slots = HashMap::new();
        let reply = gen.generate(&classify("مرحبا", &slots), &slots);

        assert!(!reply.text.is_empty());
        assert_eq!(reply.components.len(), 1);
        match &reply.components[0] {
            Component::QuickActions { buttons, .. } => assert_eq!(buttons.len(), 4),
            other => panic!("expected quick_actions, got {}", other.kind()),
        }
    }

    #[test]
    fn test_info_query_missing_slot_emits_form() {
        let gen = ReplyGenerator::new();
        let slots = HashMap::new();
        let reply = gen.generate(&classify("ما هو اسم شركتي؟", &slots), &slots);

        let forms: Vec<_> = reply
            .components
            .iter()
            .filter(|c| c.kind() == "form_input")
            .collect();
        assert_eq!(forms.len(), 1);
        match forms[0] {
            Component::FormInput { fields, .. } => {
                assert_eq!(fields[0].name, "company_name");
                assert!(fields[0].required);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_info_query_present_slot_never_emits_form() {
        let gen = ReplyGenerator::new();
        let mut slots = HashMap::new();
        slots.insert("company_name".to_string(), "Acme".to_string());
        let reply = gen.generate(&classify("ما هو اسم شركتي؟", &slots), &slots);

        assert!(reply.text.contains("Acme"));
        assert!(reply
            .components
            .iter()
            .all(|c| c.kind() != "form_input"));
    }

    #[test]
    fn test_platform_connection_one_card_per_platform() {
        let gen = ReplyGenerator::new();
        let slots = HashMap::new();
        let reply = gen.generate(&classify("أريد ربط منصة سلة", &slots), &slots);

        assert_eq!(reply.components.len(), gen.platforms().len());
        assert!(reply.components.iter().all(|c| c.kind() == "platform_card"));
    }

    #[test]
    fn test_website_analysis_with_domain_uses_platform_card() {
        let gen = ReplyGenerator::new();
        let slots = HashMap::new();
        let reply = gen.generate(&classify("حلل موقع example.com من فضلك", &slots), &slots);

        assert_eq!(reply.components.len(), 1);
        assert_eq!(reply.components[0].kind(), "platform_card");
    }

    #[test]
    fn test_general_has_no_components() {
        let gen = ReplyGenerator::new();
        let slots = HashMap::new();
        let reply = gen.generate(&classify("كم الساعة الآن", &slots), &slots);

        assert!(!reply.text.is_empty());
        assert!(reply.components.is_empty());
    }

    #[test]
    fn test_component_serialization_is_tagged() {
        let c = Component::QuickActions {
            title: "t".to_string(),
            buttons: vec![],
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "quick_actions");
    }
}
