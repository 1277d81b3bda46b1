//! Mock Instrumentation Runtime
//!
//! An in-process [`InstrumentationRuntime`](crate::runtime::InstrumentationRuntime)
//! used by unit and integration tests and by `hooklane serve`.
//!
//! Tests drive it from the outside:
//!
//! - `emit` / `exit`: deliver script events through the installed callback
//! - `kill`: make the liveness probe fail without any event
//! - `disconnect`: fail the probe and deliver a `Detached` event
//! - failure injection per operation and target (missing target, delays,
//!   rejected loads, slow unloads)

mod failure;
mod runtime;
mod state;

pub use failure::{FailureConfig, FailureInjector, RuntimeOp};
pub use runtime::{MockRuntime, MockSession};
pub use state::{MockSessionState, MockState};
