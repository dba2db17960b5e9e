//! Per-user dialogue state: durable slots and bounded turn history.
//!
//! Slots are keyed by user id alone and persist across sessions through a
//! write-through backing partition. Turn history is per (user, session),
//! capped, oldest evicted first. The in-memory copy is authoritative for
//! reads; a failed backing read degrades to whatever is in memory.

use super::types::{Role, SlotWrite, Turn};
use crate::error::{NadimError, NadimResult};
use crate::now_secs;
use crate::storage::KvPartition;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

const SHARD_COUNT: usize = 16;

#[derive(Default)]
struct UserState {
    slots: HashMap<String, String>,
    /// Whether slots were loaded from (or attempted against) the backing store
    loaded: bool,
    sessions: HashMap<String, VecDeque<Turn>>,
}

/// Shared dialogue state store.
///
/// Mutation is serialized per user (shard lock); unrelated users proceed
/// concurrently on other shards.
pub struct DialogueStore {
    shards: Vec<RwLock<HashMap<String, UserState>>>,
    backing: Option<KvPartition>,
    turn_window: usize,
}

impl DialogueStore {
    /// In-memory store (no persistence) — used in tests and embedded setups.
    pub fn new(turn_window: usize) -> Self {
        Self::build(turn_window, None)
    }

    /// Store with a write-through backing partition for slots.
    pub fn with_backing(turn_window: usize, backing: KvPartition) -> Self {
        Self::build(turn_window, Some(backing))
    }

    fn build(turn_window: usize, backing: Option<KvPartition>) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards,
            backing,
            turn_window,
        }
    }

    fn shard(&self, user_id: &str) -> &RwLock<HashMap<String, UserState>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn slot_key(user_id: &str) -> String {
        format!("slots:{user_id}")
    }

    /// Lazily populate a user's slots from the backing store. A failed read
    /// is logged and treated as "nothing persisted" — never an error here.
    fn ensure_loaded(&self, user_id: &str, state: &mut UserState) {
        if state.loaded {
            return;
        }
        state.loaded = true;
        let Some(backing) = &self.backing else { return };
        match backing.get(Self::slot_key(user_id).as_bytes()) {
            Ok(Some(bytes)) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(slots) => state.slots = slots,
                Err(e) => tracing::warn!(user_id, error = %e, "corrupt slot record, starting empty"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(user_id, error = %e, "slot backing read failed, using in-memory state"),
        }
    }

    fn persist_slots(&self, user_id: &str, slots: &HashMap<String, String>) -> NadimResult<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(slots)?;
        backing
            .put(Self::slot_key(user_id).as_bytes(), &bytes)
            .map_err(|e| NadimError::SlotStore(user_id.to_string(), e.to_string()))
    }

    /// All stored slots for a user.
    pub fn get_slots(&self, user_id: &str) -> HashMap<String, String> {
        let mut shard = self.shard(user_id).write().unwrap();
        let state = shard.entry(user_id.to_string()).or_default();
        self.ensure_loaded(user_id, state);
        state.slots.clone()
    }

    /// Monotonic-append write: inserts when empty, reports `Unchanged` for
    /// an identical value, refuses a conflicting overwrite.
    ///
    /// An `Err` means the backing write failed; the in-memory slot was still
    /// applied, so the caller can acknowledge without claiming persistence.
    pub fn set_slot(&self, user_id: &str, key: &str, value: &str) -> NadimResult<SlotWrite> {
        let mut shard = self.shard(user_id).write().unwrap();
        let state = shard.entry(user_id.to_string()).or_default();
        self.ensure_loaded(user_id, state);

        match state.slots.get(key) {
            Some(existing) if existing == value => return Ok(SlotWrite::Unchanged),
            Some(existing) => {
                return Ok(SlotWrite::Conflict {
                    existing: existing.clone(),
                })
            }
            None => {}
        }
        state.slots.insert(key.to_string(), value.to_string());
        let slots = state.slots.clone();
        drop(shard);

        self.persist_slots(user_id, &slots)?;
        Ok(SlotWrite::Inserted)
    }

    /// Explicit-update write (form submissions): overwrites and returns the
    /// previous value. Same backing-failure semantics as `set_slot`.
    pub fn update_slot(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> NadimResult<Option<String>> {
        let mut shard = self.shard(user_id).write().unwrap();
        let state = shard.entry(user_id.to_string()).or_default();
        self.ensure_loaded(user_id, state);

        let previous = state.slots.insert(key.to_string(), value.to_string());
        let slots = state.slots.clone();
        drop(shard);

        self.persist_slots(user_id, &slots)?;
        Ok(previous)
    }

    /// Bulk save with update semantics; echoes the full stored map.
    pub fn save_user_data(
        &self,
        user_id: &str,
        data: &HashMap<String, String>,
    ) -> NadimResult<HashMap<String, String>> {
        let mut shard = self.shard(user_id).write().unwrap();
        let state = shard.entry(user_id.to_string()).or_default();
        self.ensure_loaded(user_id, state);

        for (key, value) in data {
            state.slots.insert(key.clone(), value.clone());
        }
        let slots = state.slots.clone();
        drop(shard);

        self.persist_slots(user_id, &slots)?;
        Ok(slots)
    }

    /// Append one turn; the oldest turn is evicted once the window is full.
    pub fn append_turn(&self, user_id: &str, session_id: &str, role: Role, text: &str) {
        let mut shard = self.shard(user_id).write().unwrap();
        let state = shard.entry(user_id.to_string()).or_default();
        let history = state.sessions.entry(session_id.to_string()).or_default();

        history.push_back(Turn {
            role,
            text: text.to_string(),
            timestamp: now_secs(),
        });
        while history.len() > self.turn_window {
            history.pop_front();
        }
    }

    /// The last `n` turns of a session, oldest first.
    pub fn recent_turns(&self, user_id: &str, session_id: &str, n: usize) -> Vec<Turn> {
        let shard = self.shard(user_id).read().unwrap();
        shard
            .get(user_id)
            .and_then(|state| state.sessions.get(session_id))
            .map(|history| {
                history
                    .iter()
                    .skip(history.len().saturating_sub(n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
