//! Wire-protocol message types shared by the WebSocket and REST surfaces.
//!
//! The interactive-elements field is named `components` on every surface;
//! there is no alternate spelling anywhere in the crate.

use crate::alerts::{AlertCategory, AlertPriority};
use crate::components::Component;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_message_type() -> String {
    "user".to_string()
}

/// A message arriving on a connection.
///
/// Form submissions carry a literal `action: "form_submit"` discriminator;
/// everything else is a chat message.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    FormSubmit {
        action: FormAction,
        fields: HashMap<String, String>,
        user_id: String,
        session_id: String,
    },
    Chat {
        content: String,
        user_id: String,
        session_id: String,
        #[serde(default = "default_message_type")]
        message_type: String,
    },
}

impl ClientMessage {
    pub fn user_id(&self) -> &str {
        match self {
            ClientMessage::FormSubmit { user_id, .. } => user_id,
            ClientMessage::Chat { user_id, .. } => user_id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ClientMessage::FormSubmit { session_id, .. } => session_id,
            ClientMessage::Chat { session_id, .. } => session_id,
        }
    }
}

/// The only accepted value of the inbound `action` field.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum FormAction {
    #[serde(rename = "form_submit")]
    FormSubmit,
}

/// A message pushed to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        message: String,
        timestamp: u64,
    },
    Message {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        intent_detected: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence_score: Option<f32>,
        components: Vec<Component>,
        timestamp: u64,
    },
    SmartAlert {
        category: AlertCategory,
        priority: AlertPriority,
        title: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        action_url: Option<String>,
        timestamp: u64,
    },
    AlertCheckStarted {
        organization_id: String,
        message: String,
        timestamp: u64,
    },
    Error {
        message: String,
        timestamp: u64,
    },
}

// ── Request/response shapes for collaborator operations ──────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveUserDataRequest {
    pub user_id: String,
    pub data: HashMap<String, String>,
}

/// Echoes the data as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveUserDataResponse {
    pub user_id: String,
    pub data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCheckResponse {
    pub status: String,
    pub alerts_found: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStatusResponse {
    pub status: String,
    pub active_connections: usize,
    pub categories: Vec<AlertCategory>,
    pub last_check: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskRequest {
    pub agent_id: String,
    pub task_type: String,
    pub input_data: serde_json::Value,
}
