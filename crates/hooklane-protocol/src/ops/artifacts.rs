//! Artifact operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of one payload emitted by a running job.
///
/// `sha256` and `size_bytes` describe the payload as emitted;
/// `stored_size_bytes` is the size of the blob backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub target_id: String,
    pub job_id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub size_bytes: u64,
    pub stored_size_bytes: u64,
    pub sha256: String,
    pub mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Store-relative location of the blob.
    pub storage_ref: String,
}

/// Artifacts list request payload.
///
/// At least one of `target_id` and `job_id` must be given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Resume after this artifact ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Artifacts list response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsListResponse {
    /// Records, oldest first.
    pub artifacts: Vec<ArtifactRecord>,
    /// Cursor for the next page, when more records exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_after: Option<String>,
}

/// Artifacts get request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsGetRequest {
    pub artifact_id: String,
}

/// Artifacts get response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsGetResponse {
    pub record: ArtifactRecord,
    pub storage_ref: String,
    /// Base64 payload, present only for small artifacts whose blob was readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_base64: Option<String>,
}
