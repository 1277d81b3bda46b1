//! Mock runtime and session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::failure::{FailureConfig, FailureInjector, RuntimeOp};
use super::state::{MockState, SharedCallback};
use crate::runtime::{
    EmittedPayload, InstrumentationRuntime, LoadRequest, MessageCallback, RuntimeError,
    RuntimeEvent, RuntimeSession, ScriptHandle,
};

/// Configurable in-process runtime. Clones share state.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply an injected failure: sleep for its delay (bounded by `limit`), then
/// return its error. Exceeding `limit` yields a timeout.
fn apply_failure(failure: Option<FailureConfig>, limit: Option<Duration>) -> Result<(), RuntimeError> {
    let Some(failure) = failure else {
        return Ok(());
    };
    if let Some(delay) = failure.delay {
        match limit {
            Some(limit) if delay > limit => {
                thread::sleep(limit);
                return Err(RuntimeError::Timeout(limit));
            }
            _ => thread::sleep(delay),
        }
    }
    match failure.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Inject a failure for an operation on one target, or on all with `None`.
    pub fn inject_failure(&self, op: RuntimeOp, target_id: Option<&str>, config: FailureConfig) {
        lock(&self.failures).inject(op, target_id, config);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Slow down every attach.
    pub fn set_attach_delay(&self, delay: Duration) {
        self.inject_failure(RuntimeOp::Attach, None, FailureConfig::delay(delay));
    }

    /// Attaches to `target_id` fail with NOT_FOUND.
    pub fn set_target_missing(&self, target_id: &str) {
        self.inject_failure(
            RuntimeOp::Attach,
            Some(target_id),
            FailureConfig::error(RuntimeError::NotFound(format!("no target named {}", target_id))),
        );
    }

    /// Attaches to `target_id` fail with UNAVAILABLE.
    pub fn set_target_unavailable(&self, target_id: &str) {
        self.inject_failure(
            RuntimeOp::Attach,
            Some(target_id),
            FailureConfig::error(RuntimeError::Unavailable(format!("{} is offline", target_id))),
        );
    }

    /// Loads on `target_id` are refused with `message`.
    pub fn reject_loads(&self, target_id: &str, message: &str) {
        self.inject_failure(
            RuntimeOp::Load,
            Some(target_id),
            FailureConfig::error(RuntimeError::Rejected(message.to_string())),
        );
    }

    /// Unloads block for `delay` before confirming.
    pub fn set_unload_delay(&self, delay: Duration) {
        self.inject_failure(RuntimeOp::Unload, None, FailureConfig::delay(delay));
    }

    pub fn attach_count(&self, target_id: &str) -> usize {
        self.state().counts(target_id).attaches
    }

    pub fn detach_count(&self, target_id: &str) -> usize {
        self.state().counts(target_id).detaches
    }

    pub fn load_count(&self, target_id: &str) -> usize {
        self.state().counts(target_id).loads
    }

    pub fn unload_count(&self, target_id: &str) -> usize {
        self.state().counts(target_id).unloads
    }

    /// job_ids with a script loaded in the target's current session.
    pub fn loaded_jobs(&self, target_id: &str) -> Vec<String> {
        self.state()
            .current(target_id)
            .map(|s| s.scripts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the target's current session is alive.
    pub fn is_connected(&self, target_id: &str) -> bool {
        self.state().current(target_id).map(|s| s.is_alive()).unwrap_or(false)
    }

    /// Crash the target silently: the probe fails, no event is sent.
    pub fn kill(&self, target_id: &str) {
        if let Some(session) = self.state().current_mut(target_id) {
            session.alive = false;
        }
    }

    /// Drop the target's session and notify the controller.
    pub fn disconnect(&self, target_id: &str, reason: &str) -> bool {
        let callback = {
            let mut state = self.state();
            let Some(session) = state.current_mut(target_id) else {
                return false;
            };
            session.alive = false;
            session.callback.clone()
        };
        self.deliver(
            callback,
            RuntimeEvent::Detached {
                reason: reason.to_string(),
            },
        )
    }

    /// Have the script of `job_id` emit a payload.
    pub fn emit(&self, target_id: &str, job_id: &str, payload: EmittedPayload) -> bool {
        let callback = self.current_callback(target_id);
        self.deliver(
            callback,
            RuntimeEvent::Payload {
                job_id: job_id.to_string(),
                payload,
            },
        )
    }

    /// Have the script of `job_id` finish, optionally with an exception.
    pub fn exit(&self, target_id: &str, job_id: &str, error: Option<&str>) -> bool {
        let callback = {
            let mut state = self.state();
            let Some(session) = state.current_mut(target_id) else {
                return false;
            };
            session.scripts.retain(|_, j| j != job_id);
            session.callback.clone()
        };
        self.deliver(
            callback,
            RuntimeEvent::Exited {
                job_id: job_id.to_string(),
                error: error.map(str::to_string),
            },
        )
    }

    fn current_callback(&self, target_id: &str) -> Option<SharedCallback> {
        self.state()
            .current(target_id)
            .filter(|s| s.is_alive())
            .and_then(|s| s.callback.clone())
    }

    // The state lock is released before the callback runs; the controller
    // calls back into the session from inside it.
    fn deliver(&self, callback: Option<SharedCallback>, event: RuntimeEvent) -> bool {
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }
}

impl InstrumentationRuntime for MockRuntime {
    fn attach(&self, target_id: &str, timeout: Duration) -> Result<Arc<dyn RuntimeSession>, RuntimeError> {
        let failure = lock(&self.failures).check(RuntimeOp::Attach, target_id);
        apply_failure(failure, Some(timeout))?;

        let id = self.state().open_session(target_id);
        Ok(Arc::new(MockSession {
            id,
            target_id: target_id.to_string(),
            state: Arc::clone(&self.state),
            failures: Arc::clone(&self.failures),
        }))
    }
}

/// Session handed out by [`MockRuntime`].
pub struct MockSession {
    id: u64,
    target_id: String,
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl RuntimeSession for MockSession {
    fn load(&self, request: &LoadRequest) -> Result<ScriptHandle, RuntimeError> {
        let failure = lock(&self.failures).check(RuntimeOp::Load, &self.target_id);
        apply_failure(failure, None)?;

        let mut state = lock(&self.state);
        let handle = state.next_handle();
        let session = state
            .session_mut(self.id)
            .filter(|s| s.is_alive())
            .ok_or_else(|| RuntimeError::Unavailable(format!("{} is gone", self.target_id)))?;
        session.scripts.insert(handle.clone(), request.job_id.clone());
        state.counts_mut(&self.target_id).loads += 1;
        Ok(ScriptHandle(handle))
    }

    fn unload(&self, handle: &ScriptHandle) -> Result<(), RuntimeError> {
        let failure = lock(&self.failures).check(RuntimeOp::Unload, &self.target_id);
        apply_failure(failure, None)?;

        let mut state = lock(&self.state);
        if let Some(session) = state.session_mut(self.id) {
            session.scripts.remove(&handle.0);
        }
        state.counts_mut(&self.target_id).unloads += 1;
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) {
        if let Some(session) = lock(&self.state).session_mut(self.id) {
            session.callback = Some(Arc::from(callback));
        }
    }

    fn is_alive(&self) -> bool {
        lock(&self.state).session(self.id).map(|s| s.is_alive()).unwrap_or(false)
    }

    fn detach(&self) {
        let mut state = lock(&self.state);
        let newly = match state.session_mut(self.id) {
            Some(session) if !session.detached => {
                session.detached = true;
                session.callback = None;
                true
            }
            _ => false,
        };
        if newly {
            state.counts_mut(&self.target_id).detaches += 1;
        }
    }
}
