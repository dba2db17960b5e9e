//! Integration tests for the Nadim library

use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

use nadim::external::TtlPolicy;
use nadim::protocol::{ClientMessage, FormAction, ServerMessage};
use nadim::{
    AlertEngine, AlertPriority, Component, Config, ConnectionRegistry, ContextCache,
    DialogueStore, ExternalDataCache, KvStore, NadimResult, SessionOrchestrator,
};

fn build_orchestrator(config: &Config) -> SessionOrchestrator {
    let dialogue = Arc::new(DialogueStore::new(config.turn_window));
    let context = Arc::new(ContextCache::new(config.context_size_bound));
    let external = Arc::new(ExternalDataCache::new(
        TtlPolicy {
            volatile: config.volatile_ttl,
            competitive: config.competitive_ttl,
        },
        config.fetch_timeout,
    ));
    SessionOrchestrator::new(config, dialogue, context, external)
}

fn chat(content: &str, user_id: &str) -> ClientMessage {
    ClientMessage::Chat {
        content: content.to_string(),
        user_id: user_id.to_string(),
        session_id: "s1".to_string(),
        message_type: "user".to_string(),
    }
}

#[test]
fn test_library_structure() {
    // Verify that we can import the main types
    let result: NadimResult<i32> = Ok(42);
    assert!(result.is_ok());
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.data_dir.to_str().unwrap(), "./data");
    assert_eq!(config.confidence_threshold, 0.6);
    assert_eq!(config.crisis_sentiment_threshold, -0.5);
    assert_eq!(config.turn_window, 20);
}

// ============================================================
// END-TO-END CHAT SCENARIOS
// ============================================================

#[tokio::test]
async fn test_greeting_scenario() {
    let orch = build_orchestrator(&Config::default());

    let reply = orch.handle_message(chat("مرحبا", "u1")).await;
    let ServerMessage::Message {
        content,
        components,
        intent_detected,
        ..
    } = reply
    else {
        panic!("expected a message reply");
    };

    assert!(!content.is_empty());
    assert_eq!(intent_detected.as_deref(), Some("greeting"));
    assert_eq!(components.len(), 1);
    match &components[0] {
        Component::QuickActions { buttons, .. } => assert_eq!(buttons.len(), 4),
        other => panic!("expected quick_actions, got {}", other.kind()),
    }
}

#[tokio::test]
async fn test_company_name_scenario() {
    let orch = build_orchestrator(&Config::default());

    // Before any slot is stored the assistant asks for the name.
    let reply = orch.handle_message(chat("ما هو اسم شركتي؟", "u1")).await;
    let ServerMessage::Message { components, .. } = &reply else {
        panic!("expected a message reply");
    };
    assert!(components.iter().any(|c| c.kind() == "form_input"));

    // The form submission takes the explicit save path.
    let mut fields = HashMap::new();
    fields.insert("company_name".to_string(), "X".to_string());
    orch.handle_message(ClientMessage::FormSubmit {
        action: FormAction::FormSubmit,
        fields,
        user_id: "u1".to_string(),
        session_id: "s1".to_string(),
    })
    .await;

    // Repeating the question answers from the slot with no form.
    let reply = orch.handle_message(chat("ما هو اسم شركتي؟", "u1")).await;
    let ServerMessage::Message {
        content, components, ..
    } = reply
    else {
        panic!("expected a message reply");
    };
    assert!(content.contains('X'));
    assert!(components.iter().all(|c| c.kind() != "form_input"));
}

#[tokio::test]
async fn test_unclassifiable_text_still_gets_a_reply() {
    let orch = build_orchestrator(&Config::default());
    let reply = orch.handle_message(chat("xyzzy plugh 12345", "u1")).await;
    let ServerMessage::Message {
        content,
        intent_detected,
        components,
        ..
    } = reply
    else {
        panic!("expected a message reply");
    };
    assert!(!content.is_empty());
    assert_eq!(intent_detected.as_deref(), Some("general"));
    assert!(components.is_empty());
}

// ============================================================
// CONNECTION REGISTRY PROPERTIES
// ============================================================

#[test]
fn test_connection_replacement_reaches_only_newest() {
    use nadim::connection::Delivery;
    use tokio::sync::mpsc;

    let registry = ConnectionRegistry::new();
    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();

    registry.register("u1", tx1);
    registry.register("u1", tx2);

    assert!(matches!(rx1.try_recv().unwrap(), Delivery::Close));

    let sent = registry.send(
        "u1",
        ServerMessage::Welcome {
            message: "hi".to_string(),
            timestamp: 0,
        },
    );
    assert!(sent);
    assert!(matches!(rx2.try_recv().unwrap(), Delivery::Message { .. }));
    assert!(rx1.try_recv().is_err());
}

// ============================================================
// CACHE PROPERTIES
// ============================================================

#[tokio::test]
async fn test_external_cache_fetches_at_most_once_within_ttl() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let config = Config::default();
    let cache = ExternalDataCache::new(
        TtlPolicy {
            volatile: config.volatile_ttl,
            competitive: config.competitive_ttl,
        },
        config.fetch_timeout,
    );
    let calls = AtomicUsize::new(0);
    let params = HashMap::new();

    for _ in 0..3 {
        cache
            .get_or_fetch("example.com", "keywords", &params, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"keywords": []}))
            })
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_context_compression_keeps_only_allowlist() {
    let cache = ContextCache::new(256);
    cache
        .publish(
            "m1",
            serde_json::json!({
                "summary": "short",
                "metrics": {"visits": 1},
                "verbose_crawl_log": "x".repeat(400),
            }),
        )
        .unwrap();

    let stored = cache.read("m1").unwrap();
    let obj = stored.as_object().unwrap();
    assert!(obj.contains_key("summary"));
    assert!(obj.contains_key("metrics"));
    assert!(!obj.contains_key("verbose_crawl_log"));
}

// ============================================================
// DIALOGUE STORE PROPERTIES
// ============================================================

#[test]
fn test_slot_idempotence_across_restart() {
    use nadim::SlotWrite;

    let temp_dir = TempDir::new().unwrap();
    let kv = KvStore::open(temp_dir.path()).unwrap();

    {
        let store = DialogueStore::with_backing(20, kv.partition("slots").unwrap());
        assert_eq!(
            store.set_slot("u1", "company_name", "Acme").unwrap(),
            SlotWrite::Inserted
        );
    }

    {
        let store = DialogueStore::with_backing(20, kv.partition("slots").unwrap());
        assert_eq!(
            store.set_slot("u1", "company_name", "Acme").unwrap(),
            SlotWrite::Unchanged
        );
    }
}

// ============================================================
// ALERT ENGINE PROPERTIES
// ============================================================

#[test]
fn test_crisis_escalation_boundary() {
    let registry = Arc::new(ConnectionRegistry::new());
    let context = Arc::new(ContextCache::new(16 * 1024));
    let engine = AlertEngine::new(Arc::clone(&registry), Arc::clone(&context), -0.5);

    for (score, expect_critical) in [(-0.5, true), (-0.51, true), (-0.49, false), (0.3, false)] {
        context
            .publish(
                "org1/m2",
                serde_json::json!({"sentiment_analysis": {"score": score}}),
            )
            .unwrap();
        let alerts = engine.check("org1").unwrap();
        let has_critical = alerts
            .iter()
            .any(|a| a.priority == AlertPriority::Critical);
        assert_eq!(has_critical, expect_critical, "score {score}");
    }
}

#[test]
fn test_offline_alerts_survive_for_next_connect() {
    let temp_dir = TempDir::new().unwrap();
    let kv = KvStore::open(temp_dir.path()).unwrap();

    let registry = Arc::new(ConnectionRegistry::new());
    let context = Arc::new(ContextCache::new(16 * 1024));
    let engine = AlertEngine::new(Arc::clone(&registry), Arc::clone(&context), -0.5)
        .with_pending_store(kv.partition("pending_alerts").unwrap());

    context
        .publish(
            "org1/m2",
            serde_json::json!({"sentiment_analysis": {"score": -0.9}}),
        )
        .unwrap();

    // Nobody connected: the alert is retained.
    let found = engine.trigger_check("org1").unwrap();
    assert_eq!(found, 1);

    // On the next connect the alert is drained exactly once.
    let pending = engine.drain_pending("org1");
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].dismissible);
    assert!(engine.drain_pending("org1").is_empty());
}
