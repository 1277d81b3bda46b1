//! Cancellation
//!
//! Cancel is cooperative with a bounded wait: the job is marked CANCELLED
//! and persisted first, then the runtime is asked to unload the script. An
//! unload the runtime does not confirm within `detach_wait_ms` is logged and
//! left behind.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use hooklane_protocol::ops::{CancelAllResponse, CancelResponse, JobState};

use super::JobController;
use crate::error::ControllerError;
use crate::runtime::{RuntimeSession, ScriptHandle};

impl JobController {
    /// Cancel one job. Cancelling a terminal job is a no-op that still succeeds.
    pub fn cancel_job(&self, job_id: &str) -> Result<CancelResponse, ControllerError> {
        self.inner.job_locks.with_lock(job_id, || -> Result<CancelResponse, ControllerError> {
            let record = self.record(job_id)?;
            let mut record = self.observe(record)?;

            if record.is_terminal() {
                return Ok(CancelResponse {
                    job_id: job_id.to_string(),
                    state: record.state,
                    already_terminal: true,
                    cleanup_confirmed: true,
                });
            }

            record.cancel(self.inner.clock.now())?;
            self.persist(&record)?;
            let cleanup_confirmed = self.unbind(job_id, true);
            log::info!("job {} cancelled on {}", job_id, record.target_id);

            Ok(CancelResponse {
                job_id: job_id.to_string(),
                state: JobState::Cancelled,
                already_terminal: false,
                cleanup_confirmed,
            })
        })
    }

    /// Cancel every non-terminal job on a target and let its session go.
    pub fn cancel_all_jobs_for_target(&self, target_id: &str) -> Result<CancelAllResponse, ControllerError> {
        if target_id.trim().is_empty() {
            return Err(ControllerError::invalid("target_id is required"));
        }

        let mut active = self.store().active_ids_for_target(target_id);
        active.reverse();

        let mut cancelled = Vec::new();
        for job_id in active {
            match self.cancel_job(&job_id) {
                Ok(ack) if !ack.already_terminal => cancelled.push(job_id),
                Ok(_) => {}
                // Pruned since the listing.
                Err(ControllerError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.inner.sessions.teardown_if_unreferenced(target_id);
        let session_closed = !self.inner.sessions.is_attached(target_id);
        log::info!(
            "cancelled {} job(s) on {}; session {}",
            cancelled.len(),
            target_id,
            if session_closed { "closed" } else { "still held" }
        );

        Ok(CancelAllResponse {
            target_id: target_id.to_string(),
            cancelled,
            session_closed,
        })
    }

    /// Ask the runtime to unload a script, waiting at most `detach_wait`.
    pub(super) fn unload_bounded(
        &self,
        job_id: &str,
        session: Arc<dyn RuntimeSession>,
        handle: ScriptHandle,
    ) -> bool {
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("unload-{}", job_id))
            .spawn(move || {
                let _ = tx.send(session.unload(&handle));
            });
        if let Err(e) = spawned {
            log::warn!("could not start unload of job {}: {}", job_id, e);
            return false;
        }

        let wait = self.inner.config.detach_wait();
        match rx.recv_timeout(wait) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::warn!("runtime failed to unload job {}: {}", job_id, e);
                false
            }
            Err(_) => {
                log::warn!(
                    "unload of job {} not confirmed within {:?}; leaving it to the runtime",
                    job_id,
                    wait
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::ControllerConfig;
    use crate::job::JobController;
    use crate::mock::MockRuntime;
    use crate::source::StaticSourceResolver;
    use hooklane_protocol::ops::{JobState, JobType, ModuleSelector, StartRequest};
    use hooklane_protocol::ErrorCode;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn open(dir: &TempDir, runtime: &MockRuntime) -> JobController {
        let mut config = ControllerConfig::with_data_dir(dir.path());
        config.detach_wait_ms = 100;
        JobController::open(
            config,
            Arc::new(runtime.clone()),
            Arc::new(StaticSourceResolver::new()),
            Arc::new(ManualClock::default()),
        )
        .unwrap()
    }

    fn daemon(target_id: &str) -> StartRequest {
        StartRequest {
            target_id: target_id.to_string(),
            job_type: JobType::Daemon,
            module: ModuleSelector::Inline {
                source: "hook()".to_string(),
            },
            params: None,
            ttl_ms: None,
        }
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime::new();
        let controller = open(&dir, &runtime);
        let job = controller.start_job(daemon("t1")).unwrap();

        let first = controller.cancel_job(&job.job_id).unwrap();
        assert_eq!(first.state, JobState::Cancelled);
        assert!(!first.already_terminal);
        assert!(first.cleanup_confirmed);
        assert_eq!(runtime.unload_count("t1"), 1);

        let second = controller.cancel_job(&job.job_id).unwrap();
        assert_eq!(second.state, JobState::Cancelled);
        assert!(second.already_terminal);
        assert_eq!(runtime.unload_count("t1"), 1);
    }

    #[test]
    fn test_cancel_keeps_shared_session() {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime::new();
        let controller = open(&dir, &runtime);
        let a = controller.start_job(daemon("t1")).unwrap();
        let b = controller.start_job(daemon("t1")).unwrap();

        controller.cancel_job(&a.job_id).unwrap();
        assert!(controller.session_attached("t1"));
        controller.cancel_job(&b.job_id).unwrap();
        assert!(!controller.session_attached("t1"));
        assert_eq!(runtime.attach_count("t1"), 1);
        assert_eq!(runtime.detach_count("t1"), 1);
    }

    #[test]
    fn test_slow_unload_is_bounded() {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime::new();
        runtime.set_unload_delay(Duration::from_secs(2));
        let controller = open(&dir, &runtime);
        let job = controller.start_job(daemon("t1")).unwrap();

        let started = Instant::now();
        let ack = controller.cancel_job(&job.job_id).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(ack.state, JobState::Cancelled);
        assert!(!ack.cleanup_confirmed);
        assert_eq!(
            controller.job_status(&job.job_id).unwrap().state,
            JobState::Cancelled
        );
    }

    #[test]
    fn test_cancel_unknown_not_found() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir, &MockRuntime::new());
        let err = controller.cancel_job("01unknown").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_cancel_all() {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime::new();
        let controller = open(&dir, &runtime);
        let a = controller.start_job(daemon("t1")).unwrap();
        let b = controller.start_job(daemon("t1")).unwrap();
        let other = controller.start_job(daemon("t2")).unwrap();
        controller.cancel_job(&a.job_id).unwrap();

        let ack = controller.cancel_all_jobs_for_target("t1").unwrap();
        assert_eq!(ack.cancelled, vec![b.job_id.clone()]);
        assert!(ack.session_closed);
        assert_eq!(
            controller.job_status(&other.job_id).unwrap().state,
            JobState::Running
        );

        let empty = controller.cancel_all_jobs_for_target("t-empty").unwrap();
        assert!(empty.cancelled.is_empty());
        assert!(empty.session_closed);
    }
}
