//! Lazy reconciliation of a job against its session and the clock.

use chrono::{DateTime, Utc};
use hooklane_protocol::ErrorCode;

use super::{JobError, JobRecord, JobState, JobStateError};

/// What the session registry knows about the session a job is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    Alive,
    /// Disconnected or crashed. `at` is the moment of the loss when the
    /// runtime reported it (`exact`), otherwise only when it was first noticed.
    Lost { at: DateTime<Utc>, exact: bool },
}

/// Outcome of reconciling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Unchanged,
    /// The ttl ran out at `at`.
    Expired { at: DateTime<Utc> },
    /// The session went away at `at` before the job finished.
    Lost { at: DateTime<Utc> },
}

/// Decide what a job's state should be at `now`.
///
/// When the session is gone, the job expired only if the loss is known to
/// have happened at or after the deadline. A loss found by a liveness probe
/// may have happened any time before it was noticed, so it always wins.
pub fn reconcile(job: &JobRecord, now: DateTime<Utc>, health: SessionHealth) -> Reconciliation {
    if job.is_terminal() {
        return Reconciliation::Unchanged;
    }

    let deadline = match job.state {
        JobState::Running => job.expires_at(),
        _ => None,
    };

    match (health, deadline) {
        (SessionHealth::Lost { at, exact: true }, Some(deadline)) if deadline <= at => {
            Reconciliation::Expired { at: deadline }
        }
        (SessionHealth::Lost { at, .. }, _) => Reconciliation::Lost { at },
        (SessionHealth::Alive, Some(deadline)) if deadline <= now => {
            Reconciliation::Expired { at: deadline }
        }
        (SessionHealth::Alive, _) => Reconciliation::Unchanged,
    }
}

impl Reconciliation {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Write the outcome into the record.
    pub fn apply(&self, job: &mut JobRecord) -> Result<(), JobStateError> {
        match *self {
            Self::Unchanged => Ok(()),
            Self::Expired { at } => job.expire(at),
            Self::Lost { at } => job.fail(
                JobError::new(ErrorCode::Unavailable, "target session lost before the job finished"),
                at,
            ),
        }
    }
}
