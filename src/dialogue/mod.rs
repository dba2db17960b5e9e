//! Dialogue state: durable per-user slots plus short-term turn history
//!
//! Slots (company name, industry, ...) are the assistant's long-lived
//! knowledge about a user and survive session changes; turn history is a
//! bounded per-session window used for conversational context.

pub mod store;
pub mod types;

pub use store::DialogueStore;
pub use types::{Role, SlotWrite, Turn};
