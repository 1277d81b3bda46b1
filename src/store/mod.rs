//! Job record store
//!
//! In-memory table of job records keyed by job_id with a secondary index by
//! target_id, backed by one JSON file per job under `<data_dir>/jobs/`.
//! Every mutation reaches disk before it reaches memory.
//!
//! Terminal jobs are retained per target up to `history_limit`; the records
//! that finished earliest are pruned first. The record being written is never
//! pruned by its own update.

use chrono::{DateTime, Utc};
use hooklane_protocol::ErrorCode;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::state::{JobError, JobRecord, JobStateError};

/// Errors from job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("job record error: {0}")]
    Record(#[from] JobStateError),

    #[error("job '{0}' already exists")]
    Duplicate(String),

    #[error("job '{0}' is not in the store")]
    Missing(String),
}

/// Durable job catalog.
#[derive(Debug)]
pub struct JobStore {
    jobs_dir: PathBuf,
    records: HashMap<String, JobRecord>,
    /// job_ids per target in creation order.
    by_target: HashMap<String, Vec<String>>,
    history_limit: usize,
}

impl JobStore {
    /// Open the store, loading every record found under `jobs_dir`.
    ///
    /// Unreadable record files are skipped with a warning; leftover temp
    /// files from interrupted writes are removed.
    pub fn open(jobs_dir: impl AsRef<Path>, history_limit: usize) -> Result<Self, StoreError> {
        let jobs_dir = jobs_dir.as_ref().to_path_buf();
        fs::create_dir_all(&jobs_dir)?;

        let mut store = Self {
            jobs_dir,
            records: HashMap::new(),
            by_target: HashMap::new(),
            history_limit: history_limit.max(1),
        };

        for entry in fs::read_dir(&store.jobs_dir)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            if name.ends_with(".json.tmp") {
                let _ = fs::remove_file(&path);
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }

            match JobRecord::from_file(&path) {
                Ok(record) => store.index(record),
                Err(e) => log::warn!("skipping unreadable job record {}: {}", path.display(), e),
            }
        }

        for ids in store.by_target.values_mut() {
            ids.sort();
        }

        log::debug!(
            "job store opened at {} with {} record(s)",
            store.jobs_dir.display(),
            store.records.len()
        );
        Ok(store)
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", job_id))
    }

    fn index(&mut self, record: JobRecord) {
        self.by_target
            .entry(record.target_id.clone())
            .or_default()
            .push(record.job_id.clone());
        self.records.insert(record.job_id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.records.contains_key(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.records.get(job_id)
    }

    /// Persist and index a new record.
    pub fn insert(&mut self, record: JobRecord) -> Result<(), StoreError> {
        if self.contains(&record.job_id) {
            return Err(StoreError::Duplicate(record.job_id));
        }
        record.write_to_file(&self.record_path(&record.job_id))?;

        let ids = self.by_target.entry(record.target_id.clone()).or_default();
        match ids.binary_search(&record.job_id) {
            Ok(_) => {}
            Err(pos) => ids.insert(pos, record.job_id.clone()),
        }
        self.records.insert(record.job_id.clone(), record);
        Ok(())
    }

    /// Persist a changed record, pruning history if it became terminal.
    ///
    /// Returns the job_ids pruned as a consequence.
    pub fn update(&mut self, record: &JobRecord) -> Result<Vec<String>, StoreError> {
        if !self.contains(&record.job_id) {
            return Err(StoreError::Missing(record.job_id.clone()));
        }
        record.write_to_file(&self.record_path(&record.job_id))?;
        self.records.insert(record.job_id.clone(), record.clone());

        if record.is_terminal() {
            self.prune(&record.target_id, &record.job_id)
        } else {
            Ok(Vec::new())
        }
    }

    /// Records for a target, newest first.
    pub fn list_for_target(&self, target_id: &str) -> Vec<&JobRecord> {
        self.by_target
            .get(target_id)
            .map(|ids| ids.iter().rev().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    /// job_ids of jobs that have not reached a terminal state.
    pub fn active_ids_for_target(&self, target_id: &str) -> Vec<String> {
        self.list_for_target(target_id)
            .into_iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.job_id.clone())
            .collect()
    }

    /// Every record, oldest first.
    pub fn all(&self) -> Vec<&JobRecord> {
        let mut all: Vec<&JobRecord> = self.records.values().collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        all
    }

    fn prune(&mut self, target_id: &str, keep: &str) -> Result<Vec<String>, StoreError> {
        let Some(ids) = self.by_target.get(target_id) else {
            return Ok(Vec::new());
        };

        let mut terminal: Vec<(DateTime<Utc>, &String)> = ids
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| r.is_terminal())
            .map(|r| (r.ended_at.unwrap_or(r.created_at), &r.job_id))
            .collect();
        if terminal.len() <= self.history_limit {
            return Ok(Vec::new());
        }
        terminal.sort();

        let excess = terminal.len() - self.history_limit;
        let pruned: Vec<String> = terminal
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| id.as_str() != keep)
            .take(excess)
            .cloned()
            .collect();
        for job_id in &pruned {
            match fs::remove_file(self.record_path(job_id)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
            self.records.remove(job_id);
        }
        if let Some(ids) = self.by_target.get_mut(target_id) {
            ids.retain(|id| !pruned.contains(id));
        }

        log::debug!("pruned {} terminal job(s) for target {}", pruned.len(), target_id);
        Ok(pruned)
    }

    /// Fail every job a previous controller process left PENDING or RUNNING.
    ///
    /// Sessions do not survive a restart, so such jobs can never be resumed.
    pub fn recover_interrupted(&mut self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let interrupted: Vec<JobRecord> = self
            .records
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect();

        let mut recovered = Vec::with_capacity(interrupted.len());
        for mut record in interrupted {
            record.fail(
                JobError::new(
                    ErrorCode::Unavailable,
                    "controller restarted; the job's session could not be resumed",
                ),
                now,
            )?;
            self.update(&record)?;
            recovered.push(record.job_id);
        }
        recovered.sort();
        Ok(recovered)
    }
}
