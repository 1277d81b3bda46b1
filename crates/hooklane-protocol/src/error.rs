//! Error taxonomy for the control plane.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in RPC error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unknown job, artifact, target, draft or module reference.
    NotFound,
    /// Malformed type, ttl, params or selector.
    InvalidArgument,
    /// Target or session unreachable or crashed.
    Unavailable,
    /// Unexpected persistence or runtime-boundary failure.
    Internal,
    /// Conflict reported by a provenance store.
    AlreadyExists,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
            Self::AlreadyExists => "ALREADY_EXISTS",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC error response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Mirrors `code.is_retryable()` so clients need not hardcode the table.
    pub retryable: bool,
    /// Suggested next step for the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Create a new RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
            hint: None,
            data: None,
        }
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach machine-readable details.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create a NOT_FOUND error for a referenced entity.
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} '{}' not found", kind, id))
            .with_data(serde_json::json!({ "kind": kind, "id": id }))
    }

    /// Create an INVALID_ARGUMENT error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    /// Create an UNAVAILABLE error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    /// Create an INTERNAL error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Create an ALREADY_EXISTS error.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    /// Create the error returned for an operation name nobody handles.
    pub fn unknown_operation(op: &str) -> Self {
        Self::invalid_argument(format!("unknown operation: {}", op))
            .with_data(serde_json::json!({ "op": op }))
    }

    /// Create the error returned for a protocol version mismatch.
    pub fn unsupported_protocol(version: i32, supported: i32) -> Self {
        Self::invalid_argument(format!(
            "protocol_version {} is not supported (expected {})",
            version, supported
        ))
        .with_data(serde_json::json!({ "requested": version, "supported": supported }))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
