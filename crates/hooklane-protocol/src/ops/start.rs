//! Start operation types.

use serde::{Deserialize, Serialize};
use super::job::{JobState, JobType, ModuleSelector};

/// Start request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Target to run against.
    pub target_id: String,
    /// Job type.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Where the module source comes from.
    pub module: ModuleSelector,
    /// Opaque parameters handed to the module; must be a JSON object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Lifetime for daemon/interactive jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

/// Start response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    /// The newly assigned job ID.
    pub job_id: String,
    /// State right after the start call returned.
    pub state: JobState,
}
