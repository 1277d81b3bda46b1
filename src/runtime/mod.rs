//! Instrumentation runtime boundary
//!
//! The controller never instruments anything itself. It attaches to a target
//! through an [`InstrumentationRuntime`], loads one script per job into the
//! resulting [`RuntimeSession`], and receives what the scripts emit through a
//! [`MessageCallback`].
//!
//! Implementations must not invoke the callback synchronously from inside
//! `load`; the controller holds the job's lock across that call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hooklane_protocol::ErrorCode;

/// Errors reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The target or process cannot be resolved.
    #[error("target not found: {0}")]
    NotFound(String),

    /// The target or process is gone or unreachable.
    #[error("target unavailable: {0}")]
    Unavailable(String),

    /// The attach did not complete within the allotted time.
    #[error("attach timed out after {0:?}")]
    Timeout(Duration),

    /// The runtime refused the script (compile or validation error).
    #[error("script rejected: {0}")]
    Rejected(String),

    #[error("runtime failure: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Unavailable(_) | Self::Timeout(_) => ErrorCode::Unavailable,
            Self::Rejected(_) => ErrorCode::InvalidArgument,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Opaque runtime identifier of a loaded script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptHandle(pub String);

impl fmt::Display for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the controller asks the runtime to run.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Echoed back in every [`RuntimeEvent`] the script produces.
    pub job_id: String,
    pub source: String,
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// One payload emitted by a script.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedPayload {
    pub artifact_type: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
    pub name: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Asynchronous notifications from a session.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A running script produced data.
    Payload { job_id: String, payload: EmittedPayload },
    /// A script finished on its own; `error` is set if it died of an exception.
    Exited { job_id: String, error: Option<String> },
    /// The session itself is gone (process died, device unplugged).
    Detached { reason: String },
}

/// Callback receiving a session's events. May be called from any thread.
pub type MessageCallback = Box<dyn Fn(RuntimeEvent) + Send + Sync>;

/// Entry point to the external runtime.
pub trait InstrumentationRuntime: Send + Sync {
    /// Attach to `target_id`, failing after `timeout`.
    fn attach(&self, target_id: &str, timeout: Duration) -> Result<Arc<dyn RuntimeSession>, RuntimeError>;
}

/// A live attach to one target.
pub trait RuntimeSession: Send + Sync {
    /// Load and start a script.
    fn load(&self, request: &LoadRequest) -> Result<ScriptHandle, RuntimeError>;

    /// Stop and unload a script. May block until the runtime confirms.
    fn unload(&self, handle: &ScriptHandle) -> Result<(), RuntimeError>;

    /// Install the event callback, replacing any previous one.
    fn on_message(&self, callback: MessageCallback);

    /// Liveness probe.
    fn is_alive(&self) -> bool;

    /// Tear the attach down.
    fn detach(&self);
}
