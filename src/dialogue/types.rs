//! Core types for the dialogue module

use serde::{Deserialize, Serialize};

/// Role of a turn's author
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// System message
    System,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One turn in a session's bounded history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: u64,
}

/// Outcome of a monotonic-append slot write.
///
/// A conflicting write is a normal branch, not an error: plain writes never
/// silently overwrite, only the explicit update path does.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotWrite {
    /// The slot was empty and is now set
    Inserted,
    /// The slot already held this exact value; nothing changed
    Unchanged,
    /// The slot holds a different value; the write was refused
    Conflict { existing: String },
}
