//! Controller error type and its mapping to the outward taxonomy.

use hooklane_protocol::{ErrorCode, RpcError};
use serde_json::json;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::config::ConfigError;
use crate::runtime::RuntimeError;
use crate::source::SourceError;
use crate::state::JobStateError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("attach to {target_id} failed: {source}")]
    Attach {
        target_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("job {job_id} failed to load: {source}")]
    Load {
        job_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("module source: {0}")]
    Source(#[from] SourceError),

    #[error("job store: {0}")]
    Store(#[from] StoreError),

    #[error("job record: {0}")]
    Record(#[from] JobStateError),

    #[error("artifacts: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ControllerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Attach { source, .. } | Self::Load { source, .. } => source.code(),
            Self::Source(e) => e.code(),
            Self::Artifact(e) => e.code(),
            Self::Store(_) | Self::Record(_) | Self::Config(_) => ErrorCode::Internal,
        }
    }

    /// The job this error belongs to, when a record was created before failing.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Load { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Outward error with a remediation hint.
    pub fn to_rpc_error(&self) -> RpcError {
        let code = self.code();
        let error = RpcError::new(code, self.to_string());

        let error = match self {
            Self::NotFound { kind, id } => error.with_data(json!({ "kind": kind, "id": id })),
            Self::Attach { target_id, .. } => error.with_data(json!({ "target_id": target_id })),
            Self::Load { job_id, .. } => error.with_data(json!({ "job_id": job_id })),
            _ => error,
        };

        let hint = match (self, code) {
            (Self::NotFound { kind: "job", .. }, _) => "list the target's jobs to find a valid job_id",
            (Self::NotFound { kind: "artifact", .. }, _) => {
                "list artifacts by target or job; the record may have been pruned"
            }
            (Self::Attach { .. }, ErrorCode::NotFound) => "check the target_id against the target inventory",
            (_, ErrorCode::NotFound) => "check the referenced id",
            (_, ErrorCode::InvalidArgument) => "fix the request and send it again",
            (_, ErrorCode::Unavailable) => "the target may have disconnected; reconnect it and retry",
            (_, ErrorCode::AlreadyExists) => "publish under a new version",
            (_, ErrorCode::Internal) => "check the controller log for details",
        };
        error.with_hint(hint)
    }
}
