//! `cancel` and `cancel_all` payloads.

use serde::{Deserialize, Serialize};
use super::job::JobState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub job_id: String,
}

/// Acknowledgement of a cancel. Cancelling a finished job is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: String,
    /// State after the request; the existing terminal state if there was one.
    pub state: JobState,
    /// The job had already reached a terminal state; nothing was done.
    pub already_terminal: bool,
    /// The runtime confirmed unload within the wait bound.
    pub cleanup_confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAllRequest {
    pub target_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAllResponse {
    pub target_id: String,
    /// Jobs moved to CANCELLED by this call.
    pub cancelled: Vec<String>,
    /// Whether the target's session was torn down.
    pub session_closed: bool,
}
