//! Job controller
//!
//! Owns the job state machine. Every entry point takes the per-job lock,
//! reconciles the job against its session and the clock, and persists any
//! change before answering. There is no background poller: crashes and ttl
//! expiry surface at the next observation.
//!
//! Sessions come from the [`SessionRegistry`]; a job keeps one reference on
//! its target's session from a successful attach until it reaches a terminal
//! state.

mod cancel;
mod events;

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use hooklane_protocol::ops::{JobSnapshot, StartRequest};
use hooklane_protocol::ErrorCode;

use crate::artifact::ArtifactPipeline;
use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::ids::IdGenerator;
use crate::keyed_lock::KeyedLocks;
use crate::runtime::{InstrumentationRuntime, LoadRequest, MessageCallback, RuntimeSession, ScriptHandle};
use crate::session::{SessionKey, SessionLease, SessionRegistry};
use crate::source::SourceResolver;
use crate::state::{reconcile, JobError, JobRecord, NewJob, Reconciliation, SessionHealth};
use crate::store::JobStore;

/// What a non-terminal job holds on the runtime.
struct Binding {
    key: SessionKey,
    session: Arc<dyn RuntimeSession>,
    handle: Option<ScriptHandle>,
}

struct Inner {
    config: ControllerConfig,
    sessions: SessionRegistry,
    sources: Arc<dyn SourceResolver>,
    store: Mutex<JobStore>,
    artifacts: ArtifactPipeline,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    job_locks: KeyedLocks,
    bindings: Mutex<HashMap<String, Binding>>,
}

/// Handle to the controller. Clones share state.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    /// Open the controller over `config.data_dir`.
    ///
    /// Jobs a previous process left PENDING or RUNNING are failed with
    /// UNAVAILABLE, since their sessions are gone.
    pub fn open(
        config: ControllerConfig,
        runtime: Arc<dyn InstrumentationRuntime>,
        sources: Arc<dyn SourceResolver>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir).map_err(crate::store::StoreError::from)?;

        let mut store = JobStore::open(config.jobs_dir(), config.history_limit)?;
        let recovered = store.recover_interrupted(clock.now())?;
        if !recovered.is_empty() {
            log::warn!(
                "failed {} job(s) interrupted by a controller restart",
                recovered.len()
            );
        }

        let ids = IdGenerator::new();
        for record in store.all() {
            ids.observe(&record.job_id);
        }

        let artifacts = ArtifactPipeline::open(config.artifacts_dir(), Arc::clone(&clock))?;
        log::info!(
            "controller ready at {} ({} job(s), {} artifact(s))",
            config.data_dir.display(),
            store.len(),
            artifacts.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                sessions: SessionRegistry::new(runtime, Arc::clone(&clock)),
                config,
                sources,
                store: Mutex::new(store),
                artifacts,
                clock,
                ids,
                job_locks: KeyedLocks::new(),
                bindings: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn artifacts(&self) -> &ArtifactPipeline {
        &self.inner.artifacts
    }

    /// Whether the controller currently holds a session for the target.
    pub fn session_attached(&self, target_id: &str) -> bool {
        self.inner.sessions.is_attached(target_id)
    }

    fn store(&self) -> MutexGuard<'_, JobStore> {
        self.inner.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.inner.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, job_id: &str) -> Result<JobRecord, ControllerError> {
        self.store()
            .get(job_id)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("job", job_id))
    }

    fn persist(&self, record: &JobRecord) -> Result<(), ControllerError> {
        let pruned = self.store().update(record)?;
        if !pruned.is_empty() {
            log::debug!("retention pruned {:?}", pruned);
        }
        Ok(())
    }

    fn callback_for(&self, key: &SessionKey) -> MessageCallback {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = key.clone();
        Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                JobController { inner }.handle_event(&key, event);
            }
        })
    }

    /// Start a job: resolve its source, attach (or reuse the target's
    /// session), record it PENDING, load it, and mark it RUNNING.
    pub fn start_job(&self, request: StartRequest) -> Result<JobSnapshot, ControllerError> {
        let target_id = request.target_id.trim().to_string();
        if target_id.is_empty() {
            return Err(ControllerError::invalid("target_id is required"));
        }
        let ttl_ms = self.validate_ttl(&request)?;
        let params = self.validate_params(request.params)?;

        let resolved = self.inner.sources.resolve(&request.module)?;
        if resolved.source.trim().is_empty() {
            return Err(ControllerError::invalid("module source is empty"));
        }

        let lease = self
            .inner
            .sessions
            .acquire(&target_id, self.inner.config.attach_timeout(), |key| self.callback_for(key))
            .map_err(|source| ControllerError::Attach {
                target_id: target_id.clone(),
                source,
            })?;

        let now = self.inner.clock.now();
        let job_id = self.inner.ids.next(now);
        let mut record = JobRecord::new(
            NewJob {
                job_id: job_id.clone(),
                target_id: target_id.clone(),
                job_type: request.job_type,
                module_source: resolved.source,
                provenance: resolved.provenance,
                params,
                ttl_ms,
            },
            now,
        );

        self.inner.job_locks.with_lock(&job_id, || -> Result<JobSnapshot, ControllerError> {
            if let Err(e) = self.store().insert(record.clone()) {
                self.inner.sessions.release(&lease.key);
                return Err(e.into());
            }

            let loaded = lease.session.load(&LoadRequest {
                job_id: job_id.clone(),
                source: record.module_source.clone(),
                params: record.params.clone(),
            });
            let now = self.inner.clock.now();

            match loaded {
                Ok(handle) => {
                    let started = match record.start(now) {
                        Ok(()) => self.persist(&record),
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = started {
                        self.abandon_loaded(&mut record, &lease, handle, &e);
                        return Err(e);
                    }
                    self.bindings().insert(
                        job_id.clone(),
                        Binding {
                            key: lease.key.clone(),
                            session: Arc::clone(&lease.session),
                            handle: Some(handle),
                        },
                    );
                    log::info!(
                        "job {} ({}) running on {} (session generation {})",
                        job_id,
                        record.job_type,
                        target_id,
                        lease.key.generation
                    );
                    Ok(record.snapshot())
                }
                Err(source) => {
                    self.inner.sessions.release(&lease.key);
                    record.fail(JobError::new(source.code(), source.to_string()), now)?;
                    self.persist(&record)?;
                    log::warn!("job {} failed to load on {}: {}", job_id, target_id, source);
                    Err(ControllerError::Load { job_id: job_id.clone(), source })
                }
            }
        })
    }

    /// Undo a load whose RUNNING transition could not be recorded.
    fn abandon_loaded(
        &self,
        record: &mut JobRecord,
        lease: &SessionLease,
        handle: ScriptHandle,
        cause: &ControllerError,
    ) {
        log::warn!(
            "job {} loaded on {} but could not be recorded: {}",
            record.job_id,
            record.target_id,
            cause
        );
        if !self.unload_bounded(&record.job_id, Arc::clone(&lease.session), handle) {
            log::warn!("job {} may still be loaded on {}", record.job_id, record.target_id);
        }
        self.inner.sessions.release(&lease.key);

        let now = self.inner.clock.now();
        let error = JobError::new(ErrorCode::Internal, format!("could not record job start: {}", cause));
        let failed = record
            .fail(error, now)
            .map_err(ControllerError::from)
            .and_then(|()| self.persist(record));
        if let Err(e) = failed {
            log::warn!("job {} could not be marked failed: {}", record.job_id, e);
        }
    }

    fn validate_ttl(&self, request: &StartRequest) -> Result<Option<u64>, ControllerError> {
        let Some(ttl) = request.ttl_ms else {
            return Ok(None);
        };
        if !request.job_type.accepts_ttl() {
            return Err(ControllerError::invalid(format!(
                "ttl_ms is not accepted for {} jobs",
                request.job_type
            )));
        }
        if ttl == 0 || ttl > self.inner.config.max_ttl_ms {
            return Err(ControllerError::invalid(format!(
                "ttl_ms must be between 1 and {}",
                self.inner.config.max_ttl_ms
            )));
        }
        Ok(Some(ttl))
    }

    fn validate_params(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ControllerError> {
        let map = match params {
            None | Some(serde_json::Value::Null) => return Ok(serde_json::Map::new()),
            Some(serde_json::Value::Object(map)) => map,
            Some(_) => return Err(ControllerError::invalid("params must be a JSON object")),
        };
        let size = serde_json::to_vec(&map)
            .map_err(|e| ControllerError::invalid(format!("params are not serializable: {}", e)))?
            .len();
        if size > self.inner.config.max_params_bytes {
            return Err(ControllerError::invalid(format!(
                "params are {} bytes; the limit is {}",
                size, self.inner.config.max_params_bytes
            )));
        }
        Ok(map)
    }

    /// Current snapshot of a job, reconciled first.
    pub fn job_status(&self, job_id: &str) -> Result<JobSnapshot, ControllerError> {
        self.inner.job_locks.with_lock(job_id, || -> Result<JobSnapshot, ControllerError> {
            let record = self.record(job_id)?;
            Ok(self.observe(record)?.snapshot())
        })
    }

    /// Jobs for a target, newest first, terminal history included.
    pub fn list_jobs(&self, target_id: &str) -> Result<Vec<JobSnapshot>, ControllerError> {
        if target_id.trim().is_empty() {
            return Err(ControllerError::invalid("target_id is required"));
        }
        let listed: Vec<JobRecord> = self
            .store()
            .list_for_target(target_id)
            .into_iter()
            .cloned()
            .collect();

        let mut snapshots = Vec::with_capacity(listed.len());
        for record in listed {
            if record.is_terminal() {
                snapshots.push(record.snapshot());
                continue;
            }
            let job_id = record.job_id.clone();
            let observed = self.inner.job_locks.with_lock(&job_id, || match self.record(&job_id) {
                Ok(current) => self.observe(current).map(Some),
                // Pruned between the listing and the lock.
                Err(ControllerError::NotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            })?;
            if let Some(record) = observed {
                snapshots.push(record.snapshot());
            }
        }
        Ok(snapshots)
    }

    /// The module source a job was started with.
    pub fn get_job_source(&self, job_id: &str) -> Result<String, ControllerError> {
        Ok(self.record(job_id)?.module_source)
    }

    /// Apply lazy reconciliation. Caller holds the job lock.
    fn observe(&self, record: JobRecord) -> Result<JobRecord, ControllerError> {
        if record.is_terminal() {
            return Ok(record);
        }

        let now = self.inner.clock.now();
        let key = self.bindings().get(&record.job_id).map(|b| b.key.clone());
        let health = match &key {
            Some(key) => self.inner.sessions.health(key),
            None => SessionHealth::Lost { at: now, exact: false },
        };

        let outcome = reconcile(&record, now, health);
        if !outcome.is_change() {
            return Ok(record);
        }

        let mut record = record;
        outcome.apply(&mut record)?;
        self.persist(&record)?;

        match outcome {
            Reconciliation::Expired { at } => {
                log::info!("job {} expired at {}", record.job_id, at);
                self.unbind(&record.job_id, true);
            }
            Reconciliation::Lost { at } => {
                log::warn!(
                    "job {} failed: session to {} lost at {}",
                    record.job_id,
                    record.target_id,
                    at
                );
                self.unbind(&record.job_id, false);
            }
            Reconciliation::Unchanged => {}
        }
        Ok(record)
    }

    /// Drop a job's hold on its session, unloading its script first if asked.
    ///
    /// Returns whether the runtime confirmed the unload; true when no unload
    /// was needed.
    fn unbind(&self, job_id: &str, unload: bool) -> bool {
        let Some(binding) = self.bindings().remove(job_id) else {
            return true;
        };

        let confirmed = match (unload, binding.handle) {
            (true, Some(handle)) => self.unload_bounded(job_id, Arc::clone(&binding.session), handle),
            _ => true,
        };

        if self.inner.sessions.release(&binding.key) {
            log::debug!("job {} released the last reference to {}", job_id, binding.key.target_id);
        }
        confirmed
    }
}
