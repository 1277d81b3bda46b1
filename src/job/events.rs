//! Runtime event handling.
//!
//! Runs on whatever thread the runtime delivers callbacks on. Payloads and
//! exits take the job lock like every other entry point.

use hooklane_protocol::ErrorCode;

use super::JobController;
use crate::artifact::ArtifactInput;
use crate::error::ControllerError;
use crate::runtime::{EmittedPayload, RuntimeEvent};
use crate::session::SessionKey;
use crate::state::{JobError, JobState};

impl JobController {
    /// Dispatch one event from the session identified by `key`.
    pub(super) fn handle_event(&self, key: &SessionKey, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Payload { job_id, payload } => self.on_payload(key, &job_id, payload),
            RuntimeEvent::Exited { job_id, error } => self.on_exit(key, &job_id, error),
            RuntimeEvent::Detached { reason } => {
                let at = self.inner.clock.now();
                if self.inner.sessions.invalidate(key, at) {
                    log::warn!("session to {} detached: {}", key.target_id, reason);
                }
            }
        }
    }

    /// Whether `job_id` is currently bound to the session generation `key`.
    fn bound_to(&self, job_id: &str, key: &SessionKey) -> bool {
        self.bindings()
            .get(job_id)
            .map(|b| &b.key == key)
            .unwrap_or(false)
    }

    fn on_payload(&self, key: &SessionKey, job_id: &str, payload: EmittedPayload) {
        let result = self.inner.job_locks.with_lock(job_id, || -> Result<bool, ControllerError> {
            let Ok(record) = self.record(job_id) else {
                return Ok(false);
            };
            if record.target_id != key.target_id || !self.bound_to(job_id, key) {
                return Ok(false);
            }
            let record = self.observe(record)?;
            if record.is_terminal() {
                return Ok(false);
            }
            let artifact = self
                .inner
                .artifacts
                .ingest(&record.target_id, job_id, ArtifactInput::from(payload))?;
            log::debug!("job {} emitted artifact {}", job_id, artifact.artifact_id);
            Ok(true)
        });

        match result {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "dropped payload for job {} on {}: job unknown, finished, or not bound to this session",
                job_id,
                key.target_id
            ),
            Err(e) => log::warn!("failed to capture payload of job {}: {}", job_id, e),
        }
    }

    fn on_exit(&self, key: &SessionKey, job_id: &str, error: Option<String>) {
        let result = self.inner.job_locks.with_lock(job_id, || -> Result<Option<JobState>, ControllerError> {
            let Ok(mut record) = self.record(job_id) else {
                return Ok(None);
            };
            // A natural exit wins over an expiry nobody has observed yet, so
            // the record is not reconciled first.
            if record.state != JobState::Running || !self.bound_to(job_id, key) {
                return Ok(None);
            }

            let now = self.inner.clock.now();
            match &error {
                None => record.complete(now)?,
                Some(message) => record.fail(
                    JobError::new(ErrorCode::Internal, format!("script error: {}", message)),
                    now,
                )?,
            }
            self.persist(&record)?;
            self.unbind(job_id, false);
            Ok(Some(record.state))
        });

        match result {
            Ok(Some(state)) => log::info!("job {} exited: {}", job_id, state),
            Ok(None) => log::debug!("ignored exit of job {}: not running on this session", job_id),
            Err(e) => log::warn!("failed to record exit of job {}: {}", job_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::ControllerConfig;
    use crate::job::JobController;
    use crate::mock::MockRuntime;
    use crate::runtime::EmittedPayload;
    use crate::source::StaticSourceResolver;
    use hooklane_protocol::ops::{JobState, JobType, ModuleSelector, StartRequest};
    use hooklane_protocol::ErrorCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MockRuntime, Arc<ManualClock>, JobController) {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime::new();
        let clock = Arc::new(ManualClock::default());
        let controller = JobController::open(
            ControllerConfig::with_data_dir(dir.path()),
            Arc::new(runtime.clone()),
            Arc::new(StaticSourceResolver::new()),
            clock.clone(),
        )
        .unwrap();
        (dir, runtime, clock, controller)
    }

    fn request(job_type: JobType, ttl_ms: Option<u64>) -> StartRequest {
        StartRequest {
            target_id: "t1".to_string(),
            job_type,
            module: ModuleSelector::Inline {
                source: "emit()".to_string(),
            },
            params: None,
            ttl_ms,
        }
    }

    fn payload(body: &[u8]) -> EmittedPayload {
        EmittedPayload {
            artifact_type: "trace".to_string(),
            bytes: body.to_vec(),
            mime: Some("text/plain".to_string()),
            name: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_payload_becomes_artifact() {
        let (_dir, runtime, _, controller) = setup();
        let job = controller.start_job(request(JobType::Daemon, None)).unwrap();

        assert!(runtime.emit("t1", &job.job_id, payload(b"line 1")));
        let artifacts = controller.artifacts().list_by_job(&job.job_id);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].target_id, "t1");
        assert_eq!(artifacts[0].mime, "text/plain");
    }

    #[test]
    fn test_payload_for_unknown_or_finished_job_dropped() {
        let (_dir, runtime, _, controller) = setup();
        let job = controller.start_job(request(JobType::Daemon, None)).unwrap();

        runtime.emit("t1", "01notajob", payload(b"x"));
        let other = controller.start_job(request(JobType::Daemon, None)).unwrap();
        controller.cancel_job(&job.job_id).unwrap();
        runtime.emit("t1", &job.job_id, payload(b"late"));

        assert!(controller.artifacts().is_empty());
        assert_eq!(controller.job_status(&other.job_id).unwrap().state, JobState::Running);
    }

    #[test]
    fn test_exit_completes_oneshot() {
        let (_dir, runtime, _, controller) = setup();
        let job = controller.start_job(request(JobType::Oneshot, None)).unwrap();

        runtime.exit("t1", &job.job_id, None);
        let snap = controller.job_status(&job.job_id).unwrap();
        assert_eq!(snap.state, JobState::Completed);
        assert!(snap.ended_at.is_some());
        assert!(!controller.session_attached("t1"));
    }

    #[test]
    fn test_exit_with_error_fails_job() {
        let (_dir, runtime, _, controller) = setup();
        let job = controller.start_job(request(JobType::Oneshot, None)).unwrap();

        runtime.exit("t1", &job.job_id, Some("TypeError: x is undefined"));
        let snap = controller.job_status(&job.job_id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        let error = snap.last_error.unwrap();
        assert_eq!(error.code, ErrorCode::Internal);
        assert!(error.message.contains("TypeError"));
    }

    #[test]
    fn test_exit_beats_unobserved_expiry() {
        let (_dir, runtime, clock, controller) = setup();
        let job = controller
            .start_job(request(JobType::Interactive, Some(1000)))
            .unwrap();

        clock.advance(Duration::from_millis(1500));
        runtime.exit("t1", &job.job_id, None);
        assert_eq!(
            controller.job_status(&job.job_id).unwrap().state,
            JobState::Completed
        );
    }

    #[test]
    fn test_detach_fails_running_jobs() {
        let (_dir, runtime, _, controller) = setup();
        let job = controller.start_job(request(JobType::Daemon, None)).unwrap();

        assert!(runtime.disconnect("t1", "device unplugged"));
        let snap = controller.job_status(&job.job_id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(snap.last_error.unwrap().code, ErrorCode::Unavailable);

        // The next start attaches a fresh session.
        let next = controller.start_job(request(JobType::Daemon, None)).unwrap();
        assert_eq!(next.state, JobState::Running);
        assert_eq!(runtime.attach_count("t1"), 2);
    }
}
