//! Durable job record
//!
//! One record per job, persisted as `jobs/<job_id>.json`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::{source_digest, JobError, JobSnapshot, JobState, JobType, Provenance};

/// Schema version for job records
pub const SCHEMA_VERSION: u32 = 1;

/// Everything needed to create a record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub target_id: String,
    pub job_type: JobType,
    pub module_source: String,
    pub provenance: Provenance,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub ttl_ms: Option<u64>,
}

/// Job record (jobs/<job_id>.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Schema version
    pub schema_version: u32,

    pub job_id: String,

    pub target_id: String,

    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Current state
    pub state: JobState,

    /// Never rewritten after creation.
    pub module_source: String,

    /// SHA-256 of `module_source`
    pub source_sha256: String,

    pub provenance: Provenance,

    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,

    pub created_at: DateTime<Utc>,

    /// When the state was last updated
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
}

/// Errors for job state operations
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl JobRecord {
    /// Create a new job in PENDING state
    pub fn new(job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            source_sha256: source_digest(&job.module_source),
            job_id: job.job_id,
            target_id: job.target_id,
            job_type: job.job_type,
            state: JobState::Pending,
            module_source: job.module_source,
            provenance: job.provenance,
            params: job.params,
            ttl_ms: job.ttl_ms,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            last_error: None,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: JobState, at: DateTime<Utc>) -> Result<(), JobStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(JobStateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = at;
        if new_state == JobState::Running {
            self.started_at = Some(at);
        }
        if new_state.is_terminal() {
            self.ended_at = Some(at);
        }

        Ok(())
    }

    /// Module acknowledged by the runtime (PENDING → RUNNING)
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), JobStateError> {
        self.transition(JobState::Running, at)
    }

    /// Natural exit
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), JobStateError> {
        self.transition(JobState::Completed, at)
    }

    pub fn fail(&mut self, error: JobError, at: DateTime<Utc>) -> Result<(), JobStateError> {
        self.transition(JobState::Failed, at)?;
        self.last_error = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), JobStateError> {
        self.transition(JobState::Cancelled, at)
    }

    pub fn expire(&mut self, at: DateTime<Utc>) -> Result<(), JobStateError> {
        self.transition(JobState::Expired, at)
    }

    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Instant at which the ttl runs out, for job types that expire.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.job_type.accepts_ttl() {
            return None;
        }
        let ttl = i64::try_from(self.ttl_ms?).ok()?;
        Some(self.started_at? + Duration::milliseconds(ttl))
    }

    /// Caller-facing view without the module source.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            target_id: self.target_id.clone(),
            job_type: self.job_type,
            state: self.state,
            provenance: self.provenance.clone(),
            params: self.params.clone(),
            ttl_ms: self.ttl_ms,
            source_sha256: self.source_sha256.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_error: self.last_error.clone(),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), JobStateError> {
        let json = self.to_json()?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, JobStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}
