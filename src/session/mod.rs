//! Session registry
//!
//! Owns at most one live runtime session per target. Jobs never hold a
//! session; they hold a [`SessionKey`] (target plus generation) and a
//! reference count on the entry. The session is detached when the last
//! reference is released.
//!
//! A session that disconnects or fails its liveness probe is moved to the
//! lost table together with the time the loss was noticed. Jobs still bound
//! to that generation observe the loss the next time they are reconciled;
//! the next acquire for the target attaches a fresh generation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::keyed_lock::KeyedLocks;
use crate::runtime::{InstrumentationRuntime, MessageCallback, RuntimeError, RuntimeSession};
use crate::state::SessionHealth;

/// Borrowed reference to one generation of a target's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub target_id: String,
    pub generation: u64,
}

/// Result of a successful acquire. Must be handed back to [`SessionRegistry::release`].
#[derive(Clone)]
pub struct SessionLease {
    pub key: SessionKey,
    pub session: Arc<dyn RuntimeSession>,
    /// This acquire performed the attach.
    pub attached: bool,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("key", &self.key)
            .field("attached", &self.attached)
            .finish()
    }
}

struct LiveSession {
    generation: u64,
    session: Arc<dyn RuntimeSession>,
    refs: usize,
}

struct LostSession {
    at: DateTime<Utc>,
    /// `at` came from the runtime rather than from a probe.
    exact: bool,
    refs: usize,
}

#[derive(Default)]
struct RegistryState {
    live: HashMap<String, LiveSession>,
    lost: HashMap<SessionKey, LostSession>,
}

impl RegistryState {
    /// Move the live entry for `key` to the lost table.
    fn mark_lost(
        &mut self,
        key: &SessionKey,
        at: DateTime<Utc>,
        exact: bool,
    ) -> Option<Arc<dyn RuntimeSession>> {
        let matches = self
            .live
            .get(&key.target_id)
            .map(|e| e.generation == key.generation)
            .unwrap_or(false);
        if !matches {
            return None;
        }
        let entry = self.live.remove(&key.target_id)?;
        self.lost.insert(
            key.clone(),
            LostSession {
                at,
                exact,
                refs: entry.refs,
            },
        );
        Some(entry.session)
    }
}

/// Arena of sessions indexed by target_id.
pub struct SessionRegistry {
    runtime: Arc<dyn InstrumentationRuntime>,
    clock: Arc<dyn Clock>,
    state: Mutex<RegistryState>,
    attach_locks: KeyedLocks,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(runtime: Arc<dyn InstrumentationRuntime>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runtime,
            clock,
            state: Mutex::new(RegistryState::default()),
            attach_locks: KeyedLocks::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference on the target's session, attaching if there is none.
    ///
    /// Attaches for the same target are serialized, so concurrent first
    /// acquires produce exactly one session. `make_callback` is invoked only
    /// when a new session is created.
    pub fn acquire(
        &self,
        target_id: &str,
        timeout: Duration,
        make_callback: impl FnOnce(&SessionKey) -> MessageCallback,
    ) -> Result<SessionLease, RuntimeError> {
        self.attach_locks.with_lock(target_id, || -> Result<SessionLease, RuntimeError> {
            let stale = {
                let mut guard = self.state();
                let state = &mut *guard;

                if let Some(entry) = state
                    .live
                    .get_mut(target_id)
                    .filter(|e| e.session.is_alive())
                {
                    entry.refs += 1;
                    return Ok(SessionLease {
                        key: SessionKey {
                            target_id: target_id.to_string(),
                            generation: entry.generation,
                        },
                        session: Arc::clone(&entry.session),
                        attached: false,
                    });
                }

                let dead = state.live.get(target_id).map(|e| SessionKey {
                    target_id: target_id.to_string(),
                    generation: e.generation,
                });
                match dead {
                    Some(key) => state.mark_lost(&key, self.clock.now(), false),
                    None => None,
                }
            };
            if let Some(session) = stale {
                log::info!("session for {} failed its liveness probe; re-attaching", target_id);
                session.detach();
            }

            let session = self.runtime.attach(target_id, timeout)?;
            let key = SessionKey {
                target_id: target_id.to_string(),
                generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            };
            session.on_message(make_callback(&key));

            self.state().live.insert(
                target_id.to_string(),
                LiveSession {
                    generation: key.generation,
                    session: Arc::clone(&session),
                    refs: 1,
                },
            );
            log::info!("attached to {} (generation {})", target_id, key.generation);

            Ok(SessionLease {
                key,
                session,
                attached: true,
            })
        })
    }

    /// Drop one reference. Detaches the session when none remain.
    ///
    /// Returns true if this call closed the session.
    pub fn release(&self, key: &SessionKey) -> bool {
        let to_detach = {
            let mut guard = self.state();
            let state = &mut *guard;

            if let Some(lost) = state.lost.get_mut(key) {
                lost.refs = lost.refs.saturating_sub(1);
                if lost.refs == 0 {
                    state.lost.remove(key);
                }
                return false;
            }

            let remaining = match state.live.get_mut(&key.target_id) {
                Some(entry) if entry.generation == key.generation => {
                    entry.refs = entry.refs.saturating_sub(1);
                    Some(entry.refs)
                }
                _ => None,
            };
            match remaining {
                Some(0) => state.live.remove(&key.target_id).map(|e| e.session),
                _ => None,
            }
        };

        match to_detach {
            Some(session) => {
                session.detach();
                log::info!(
                    "detached from {} (generation {}): no jobs left",
                    key.target_id,
                    key.generation
                );
                true
            }
            None => false,
        }
    }

    /// Current health of the session generation a job is bound to.
    ///
    /// A failed liveness probe invalidates the session as of now. That time
    /// is only an upper bound on the loss, so it is reported as inexact.
    pub fn health(&self, key: &SessionKey) -> SessionHealth {
        let now = self.clock.now();
        let stale = {
            let mut guard = self.state();
            let state = &mut *guard;
            if let Some(lost) = state.lost.get(key) {
                return SessionHealth::Lost {
                    at: lost.at,
                    exact: lost.exact,
                };
            }
            let alive = state
                .live
                .get(&key.target_id)
                .filter(|e| e.generation == key.generation)
                .map(|e| e.session.is_alive());
            match alive {
                Some(true) => return SessionHealth::Alive,
                Some(false) => state.mark_lost(key, now, false),
                None => None,
            }
        };

        if let Some(session) = stale {
            log::warn!(
                "session for {} (generation {}) failed its liveness probe",
                key.target_id,
                key.generation
            );
            session.detach();
        }
        SessionHealth::Lost { at: now, exact: false }
    }

    /// Record that the runtime reported the session gone at `at`.
    pub fn invalidate(&self, key: &SessionKey, at: DateTime<Utc>) -> bool {
        let removed = self.state().mark_lost(key, at, true);
        match removed {
            Some(session) => {
                log::warn!(
                    "session for {} (generation {}) invalidated",
                    key.target_id,
                    key.generation
                );
                session.detach();
                true
            }
            None => false,
        }
    }

    /// Detach the target's session if no job holds a reference to it.
    pub fn teardown_if_unreferenced(&self, target_id: &str) -> bool {
        let idle = {
            let mut state = self.state();
            match state.live.get(target_id) {
                Some(entry) if entry.refs == 0 => state.live.remove(target_id),
                _ => None,
            }
        };
        match idle {
            Some(entry) => {
                entry.session.detach();
                log::info!("detached idle session for {}", target_id);
                true
            }
            None => false,
        }
    }

    /// Whether a live session exists for the target.
    pub fn is_attached(&self, target_id: &str) -> bool {
        self.state().live.contains_key(target_id)
    }

    /// References currently held on the target's live session.
    pub fn ref_count(&self, target_id: &str) -> usize {
        self.state().live.get(target_id).map(|e| e.refs).unwrap_or(0)
    }

    /// Number of live sessions.
    pub fn live_count(&self) -> usize {
        self.state().live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mock::MockRuntime;
    use std::thread;

    fn registry(runtime: &MockRuntime) -> (SessionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let reg = SessionRegistry::new(Arc::new(runtime.clone()), clock.clone());
        (reg, clock)
    }

    fn noop(_: &SessionKey) -> MessageCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_reuses_session_for_target() {
        let runtime = MockRuntime::new();
        let (reg, _) = registry(&runtime);

        let a = reg.acquire("t1", Duration::from_secs(1), noop).unwrap();
        let b = reg.acquire("t1", Duration::from_secs(1), noop).unwrap();
        assert!(a.attached);
        assert!(!b.attached);
        assert_eq!(a.key, b.key);
        assert_eq!(reg.ref_count("t1"), 2);
        assert_eq!(runtime.attach_count("t1"), 1);
    }

    #[test]
    fn test_detach_at_zero_refs() {
        let runtime = MockRuntime::new();
        let (reg, _) = registry(&runtime);

        let a = reg.acquire("t1", Duration::from_secs(1), noop).unwrap();
        let b = reg.acquire("t1", Duration::from_secs(1), noop).unwrap();
        assert!(!reg.release(&a.key));
        assert!(reg.is_attached("t1"));
        assert!(reg.release(&b.key));
        assert!(!reg.is_attached("t1"));
        assert_eq!(runtime.detach_count("t1"), 1);
    }

    #[test]
    fn test_concurrent_first_acquire_attaches_once() {
        let runtime = MockRuntime::new();
        runtime.set_attach_delay(Duration::from_millis(30));
        let (reg, _) = registry(&runtime);
        let reg = Arc::new(reg);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || reg.acquire("t1", Duration::from_secs(1), noop).unwrap().key)
            })
            .collect();
        let keys: Vec<SessionKey> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(runtime.attach_count("t1"), 1);
        assert_eq!(reg.ref_count("t1"), 8);
    }

    #[test]
    fn test_failed_attach_leaves_no_entry() {
        let runtime = MockRuntime::new();
        runtime.set_target_missing("ghost");
        let (reg, _) = registry(&runtime);

        let err = reg.acquire("ghost", Duration::from_secs(1), noop).unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
        assert!(!reg.is_attached("ghost"));
        assert_eq!(reg.live_count(), 0);
    }

    #[test]
    fn test_invalidate_then_reacquire_new_generation() {
        let runtime = MockRuntime::new();
        let (reg, clock) = registry(&runtime);

        let a = reg.acquire("t1", Duration::from_secs(1), noop).unwrap();
        let lost_at = clock.now();
        assert!(reg.invalidate(&a.key, lost_at));
        assert_eq!(
            reg.health(&a.key),
            SessionHealth::Lost {
                at: lost_at,
                exact: true
            }
        );

        let b = reg.acquire("t1", Duration::from_secs(1), noop).unwrap();
        assert!(b.attached);
        assert!(b.key.generation > a.key.generation);
        assert_eq!(reg.health(&b.key), SessionHealth::Alive);

        // Releasing the stale lease must not touch the new session.
        assert!(!reg.release(&a.key));
        assert_eq!(reg.ref_count("t1"), 1);
    }

    #[test]
    fn test_probe_failure_marks_lost() {
        let runtime = MockRuntime::new();
        let (reg, clock) = registry(&runtime);

        let a = reg.acquire("t1", Duration::from_secs(1), noop).unwrap();
        runtime.kill("t1");
        clock.advance(Duration::from_millis(250));

        let health = reg.health(&a.key);
        assert_eq!(
            health,
            SessionHealth::Lost {
                at: clock.now(),
                exact: false
            }
        );
        assert!(!reg.is_attached("t1"));

        // Loss time is remembered, not re-stamped.
        let noticed = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(
            reg.health(&a.key),
            SessionHealth::Lost {
                at: noticed,
                exact: false
            }
        );
    }
}
