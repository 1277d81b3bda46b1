//! Status and list operation types.

use serde::{Deserialize, Serialize};
use super::job::JobSnapshot;

/// `status` answers with a bare [`JobSnapshot`], reconciled first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub target_id: String,
}

/// Every retained job for the target, terminal history included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    /// Jobs, newest first.
    pub jobs: Vec<JobSnapshot>,
}
