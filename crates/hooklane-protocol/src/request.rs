//! RPC request types.

use serde::{Deserialize, Serialize};

/// RPC request envelope.
///
/// One JSON object per line; `payload` is interpreted according to `op`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version the caller speaks.
    pub protocol_version: i32,
    /// Operation name (see [`crate::ops::names`]).
    pub op: String,
    /// Caller-chosen request ID for correlation.
    pub request_id: String,
    /// Operation-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RpcRequest {
    /// Build a request for the current protocol version.
    pub fn new(op: &str, request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            op: op.to_string(),
            request_id: request_id.into(),
            payload,
        }
    }
}
