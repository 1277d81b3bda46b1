//! Mock Runtime State
//!
//! Sessions, loaded scripts and call counters shared by every clone of a
//! [`MockRuntime`](super::MockRuntime).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::runtime::RuntimeEvent;

pub(crate) type SharedCallback = Arc<dyn Fn(RuntimeEvent) + Send + Sync>;

/// One attach handed out by the mock runtime.
pub struct MockSessionState {
    pub target_id: String,
    /// Cleared by `kill`/`disconnect`; the liveness probe reports it.
    pub alive: bool,
    pub detached: bool,
    pub(crate) callback: Option<SharedCallback>,
    /// script handle -> job_id
    pub scripts: BTreeMap<String, String>,
}

impl MockSessionState {
    fn new(target_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            alive: true,
            detached: false,
            callback: None,
            scripts: BTreeMap::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive && !self.detached
    }
}

/// Counters for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub attaches: usize,
    pub detaches: usize,
    pub loads: usize,
    pub unloads: usize,
}

/// Shared mock runtime state.
#[derive(Default)]
pub struct MockState {
    sessions: HashMap<u64, MockSessionState>,
    /// Most recent session per target.
    current: HashMap<String, u64>,
    counts: HashMap<String, CallCounts>,
    next_session: u64,
    next_handle: u64,
}

impl MockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session for `target_id` and make it current.
    pub fn open_session(&mut self, target_id: &str) -> u64 {
        self.next_session += 1;
        let id = self.next_session;
        self.sessions.insert(id, MockSessionState::new(target_id));
        self.current.insert(target_id.to_string(), id);
        self.counts.entry(target_id.to_string()).or_default().attaches += 1;
        id
    }

    pub fn session(&self, id: u64) -> Option<&MockSessionState> {
        self.sessions.get(&id)
    }

    pub fn session_mut(&mut self, id: u64) -> Option<&mut MockSessionState> {
        self.sessions.get_mut(&id)
    }

    pub fn current(&self, target_id: &str) -> Option<&MockSessionState> {
        self.current.get(target_id).and_then(|id| self.sessions.get(id))
    }

    pub fn current_mut(&mut self, target_id: &str) -> Option<&mut MockSessionState> {
        let id = *self.current.get(target_id)?;
        self.sessions.get_mut(&id)
    }

    pub fn next_handle(&mut self) -> String {
        self.next_handle += 1;
        format!("script-{}", self.next_handle)
    }

    pub fn counts(&self, target_id: &str) -> CallCounts {
        self.counts.get(target_id).copied().unwrap_or_default()
    }

    pub fn counts_mut(&mut self, target_id: &str) -> &mut CallCounts {
        self.counts.entry(target_id.to_string()).or_default()
    }
}
