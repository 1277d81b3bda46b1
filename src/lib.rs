//! hooklane - job controller and artifact pipeline for runtime instrumentation
//!
//! Tracks instrumentation jobs against live, unreliable remote targets,
//! shares one runtime session per target between the jobs running on it,
//! and captures everything those jobs emit into a content-addressed
//! artifact store.

pub mod artifact;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod job;
pub mod keyed_lock;
pub mod mock;
pub mod runtime;
pub mod service;
pub mod session;
pub mod source;
pub mod state;
pub mod store;

pub use artifact::{ArtifactInput, ArtifactPipeline, ArtifactQuery, INLINE_MAX_BYTES};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ControllerConfig, LoadedConfig};
pub use error::ControllerError;
pub use job::JobController;
pub use runtime::{InstrumentationRuntime, RuntimeError, RuntimeEvent, RuntimeSession};
pub use service::RpcHandler;
pub use source::{SourceResolver, StaticSourceResolver};
pub use hooklane_protocol::{ErrorCode, RpcError, RpcRequest, RpcResponse};
