//! Time-ordered identifiers.
//!
//! Job and artifact ids are lowercase ULIDs. The generator never hands out an
//! id lower than one it has produced or observed, so ids sort in creation
//! order even when the clock stands still or steps backwards.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use ulid::Ulid;

#[derive(Debug, Default)]
pub struct IdGenerator {
    last: Mutex<Option<Ulid>>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with an id loaded from disk. Unparseable ids are ignored.
    pub fn observe(&self, id: &str) {
        let Ok(seen) = Ulid::from_string(&id.to_ascii_uppercase()) else {
            return;
        };
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.map(|l| seen > l).unwrap_or(true) {
            *last = Some(seen);
        }
    }

    /// Next id for something created at `at`.
    pub fn next(&self, at: DateTime<Utc>) -> String {
        let candidate = Ulid::from_datetime(SystemTime::from(at));
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let id = match *last {
            Some(prev) if candidate <= prev => prev.increment().unwrap_or(candidate),
            _ => candidate,
        };
        *last = Some(id);
        id.to_string().to_lowercase()
    }
}
