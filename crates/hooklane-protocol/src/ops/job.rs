//! Job types shared by the start, status, list and cancel operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ErrorCode;

/// Job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Runs once and exits on its own.
    Oneshot,
    /// Keeps running until cancelled or expired.
    Daemon,
    /// Long-lived, driven by the caller.
    Interactive,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oneshot => "oneshot",
            Self::Daemon => "daemon",
            Self::Interactive => "interactive",
        }
    }

    /// Whether a ttl may be attached to this type.
    pub fn accepts_ttl(&self) -> bool {
        !matches!(self, Self::Oneshot)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oneshot" => Ok(Self::Oneshot),
            "daemon" => Ok(Self::Daemon),
            "interactive" => Ok(Self::Interactive),
            other => Err(format!(
                "unknown job type '{}' (expected oneshot, daemon or interactive)",
                other
            )),
        }
    }
}

/// Job state enumeration.
///
/// PENDING → RUNNING → {COMPLETED | FAILED | CANCELLED | EXPIRED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Record created, module not yet acknowledged by the runtime.
    Pending,
    /// Module loaded and executing.
    Running,
    /// Module exited on its own.
    Completed,
    /// Load failed, the script errored, or the target went away.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
    /// ttl elapsed.
    Expired,
}

impl JobState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Check if transition from this state to target is valid.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        match (self, target) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Failed) => true,
            (Self::Pending, Self::Cancelled) => true,

            (Self::Running, Self::Completed) => true,
            (Self::Running, Self::Failed) => true,
            (Self::Running, Self::Cancelled) => true,
            (Self::Running, Self::Expired) => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing selector naming where a job's module comes from.
///
/// Exactly one source is selected; the variant is the selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleSelector {
    /// Source text supplied in the request.
    Inline { source: String },
    /// A draft held by the draft store.
    Draft { draft_id: String },
    /// A published module version.
    Module { name: String, version: String },
}

/// Recorded origin of a job's module source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Inline,
    Draft { draft_id: String },
    Module { name: String, version: String },
}

impl Provenance {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Draft { .. } => "draft",
            Self::Module { .. } => "module",
        }
    }
}

/// Last error recorded against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Point-in-time view of a job, without its module source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub state: JobState,
    pub provenance: Provenance,
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// SHA-256 hex of the module source.
    pub source_sha256: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
}
