//! hooklane protocol types
//!
//! Defines the JSON envelope, per-operation payloads and the stable error
//! taxonomy that callers of the job control plane see.

pub mod error;
pub mod ops;
pub mod request;
pub mod response;

pub use error::{ErrorCode, RpcError};
pub use request::RpcRequest;
pub use response::RpcResponse;

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: i32 = 1;

/// Payloads at or below this size are echoed inline by `artifacts_get`.
pub const INLINE_MAX_BYTES: u64 = 64 * 1024;
