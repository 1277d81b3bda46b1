//! Job record and state machine
//!
//! Job states: PENDING → RUNNING → {COMPLETED | FAILED | CANCELLED | EXPIRED}
//! with PENDING → FAILED when the module never loads.
//!
//! Crash and expiry detection is a pure function over a record, applied at
//! every read or write entry point instead of from a timer.

mod job_state;
mod reconcile;

pub use hooklane_protocol::ops::{JobError, JobSnapshot, JobState, JobType, Provenance};
pub use job_state::{JobRecord, JobStateError, NewJob, SCHEMA_VERSION};
pub use reconcile::{reconcile, Reconciliation, SessionHealth};

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a module source.
pub fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}
