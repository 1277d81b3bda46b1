//! RPC response envelope.

use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::request::RpcRequest;

/// One response line. Exactly one of `payload` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed from the request; 0 when the request could not be parsed.
    pub protocol_version: i32,
    pub request_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Answer `request` with a payload.
    pub fn success(request: &RpcRequest, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: request.protocol_version,
            request_id: request.request_id.clone(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Answer `request` with an error.
    pub fn failure(request: &RpcRequest, error: RpcError) -> Self {
        Self {
            protocol_version: request.protocol_version,
            request_id: request.request_id.clone(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Answer a line that was not a request at all.
    pub fn malformed(error: RpcError) -> Self {
        Self {
            protocol_version: 0,
            request_id: String::new(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Split into the success payload or the error.
    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        match (self.ok, self.payload, self.error) {
            (true, Some(payload), _) => Ok(payload),
            (true, None, _) => Ok(serde_json::Value::Null),
            (false, _, Some(error)) => Err(error),
            (false, _, None) => Err(RpcError::internal("error response without error details")),
        }
    }
}
