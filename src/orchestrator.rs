//! Session orchestrator: the per-message façade tying classification,
//! dialogue state, and component generation together.
//!
//! Every inbound message produces exactly one reply. Per-message failures
//! degrade to a safe fallback reply; they never terminate the connection or
//! leak as opaque errors to the client.

use crate::components::ReplyGenerator;
use crate::context::ContextCache;
use crate::dialogue::{DialogueStore, Role};
use crate::external::ExternalDataCache;
use crate::intent::{IntentClassifier, IntentEnricher, IntentLabel};
use crate::now_secs;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Coordinates one user turn end to end.
pub struct SessionOrchestrator {
    classifier: IntentClassifier,
    generator: ReplyGenerator,
    dialogue: Arc<DialogueStore>,
    context: Arc<ContextCache>,
    external: Arc<ExternalDataCache>,
    enricher: Option<Arc<dyn IntentEnricher>>,
    enrichment_timeout: Duration,
}

impl SessionOrchestrator {
    pub fn new(
        config: &Config,
        dialogue: Arc<DialogueStore>,
        context: Arc<ContextCache>,
        external: Arc<ExternalDataCache>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(config.confidence_threshold),
            generator: ReplyGenerator::new(),
            dialogue,
            context,
            external,
            enricher: None,
            enrichment_timeout: config.enrichment_timeout,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn IntentEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn generator(&self) -> &ReplyGenerator {
        &self.generator
    }

    pub fn dialogue(&self) -> &Arc<DialogueStore> {
        &self.dialogue
    }

    pub fn context(&self) -> &Arc<ContextCache> {
        &self.context
    }

    pub fn external(&self) -> &Arc<ExternalDataCache> {
        &self.external
    }

    /// Process one inbound message and produce its single reply.
    pub async fn handle_message(&self, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::Chat {
                content,
                user_id,
                session_id,
                ..
            } => self.handle_chat(&content, &user_id, &session_id).await,
            ClientMessage::FormSubmit {
                fields,
                user_id,
                session_id,
                ..
            } => self.handle_form_submit(&fields, &user_id, &session_id),
        }
    }

    async fn handle_chat(&self, content: &str, user_id: &str, session_id: &str) -> ServerMessage {
        self.dialogue
            .append_turn(user_id, session_id, Role::User, content);

        let slots = self.dialogue.get_slots(user_id);
        let intent = self
            .classifier
            .classify_with_enrichment(
                content,
                &slots,
                self.enricher.as_deref(),
                self.enrichment_timeout,
            )
            .await;

        tracing::debug!(
            user_id,
            intent = intent.label.as_str(),
            confidence = intent.confidence,
            "classified message"
        );

        let reply = self.generator.generate(&intent, &slots);
        self.dialogue
            .append_turn(user_id, session_id, Role::Assistant, &reply.text);

        ServerMessage::Message {
            content: reply.text,
            intent_detected: Some(intent.label.as_str().to_string()),
            confidence_score: Some(intent.confidence),
            components: reply.components,
            timestamp: now_secs(),
        }
    }

    /// Form submissions carry an explicit save action: they take the slot
    /// update path, never re-classification of raw text.
    fn handle_form_submit(
        &self,
        fields: &HashMap<String, String>,
        user_id: &str,
        session_id: &str,
    ) -> ServerMessage {
        let mut persisted = true;
        for (key, value) in fields {
            if let Err(e) = self.dialogue.update_slot(user_id, key, value) {
                tracing::warn!(user_id, key, error = %e, "slot persistence failed");
                persisted = false;
            }
        }

        let mut names: Vec<&str> = fields.keys().map(String::as_str).collect();
        names.sort();
        self.dialogue.append_turn(
            user_id,
            session_id,
            Role::User,
            &format!("[form_submit: {}]", names.join(", ")),
        );

        let text = if persisted {
            "تم حفظ معلوماتك بنجاح ✅ شكراً لك!".to_string()
        } else {
            // Saved for this conversation even though the durable write failed.
            "تم تسجيل معلوماتك لهذه الجلسة، وسأحاول حفظها بشكل دائم لاحقاً.".to_string()
        };

        ServerMessage::Message {
            content: text,
            intent_detected: None,
            confidence_score: None,
            components: Vec::new(),
            timestamp: now_secs(),
        }
    }

    /// Generic reply used when a per-message failure leaves nothing better.
    pub fn fallback_reply(&self) -> ServerMessage {
        ServerMessage::Message {
            content: "عذراً، حدث خطأ في فهم رسالتك. هل يمكنك إعادة الصياغة؟".to_string(),
            intent_detected: Some(IntentLabel::General.as_str().to_string()),
            confidence_score: None,
            components: Vec::new(),
            timestamp: now_secs(),
        }
    }
}
