//! Artifact pipeline
//!
//! Captures every payload a running job emits. Payload bytes go to the
//! content-addressed [`BlobStore`]; one [`ArtifactRecord`] per payload is
//! appended to the catalog and indexed by target and by job.
//!
//! Every payload is stored the same way regardless of size.
//! [`INLINE_MAX_BYTES`] only decides whether `artifacts_get` echoes the bytes
//! back inline.

pub mod blob_store;
pub mod catalog;

use base64::Engine as _;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use hooklane_protocol::ErrorCode;

use crate::clock::Clock;
use crate::ids::IdGenerator;
use crate::runtime::EmittedPayload;

pub use blob_store::{BlobError, BlobStats, BlobStore, PutOutcome};
pub use catalog::Catalog;
pub use hooklane_protocol::ops::ArtifactRecord;
pub use hooklane_protocol::INLINE_MAX_BYTES;

const DEFAULT_MIME: &str = "application/octet-stream";
const DEFAULT_PAGE_LIMIT: usize = 100;
const MAX_PAGE_LIMIT: usize = 1000;

/// Errors from the artifact pipeline.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("invalid artifact request: {0}")]
    Invalid(String),
}

impl ArtifactError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid(_) => ErrorCode::InvalidArgument,
            Self::Io(_) | Self::Blob(_) => ErrorCode::Internal,
        }
    }
}

/// One payload handed to [`ArtifactPipeline::ingest`].
#[derive(Debug, Clone, Default)]
pub struct ArtifactInput {
    pub artifact_type: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
    pub name: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<EmittedPayload> for ArtifactInput {
    fn from(p: EmittedPayload) -> Self {
        Self {
            artifact_type: p.artifact_type,
            bytes: p.bytes,
            mime: p.mime,
            name: p.name,
            metadata: p.metadata,
        }
    }
}

/// Selector for a page of records.
#[derive(Debug, Clone, Default)]
pub struct ArtifactQuery {
    pub target_id: Option<String>,
    pub job_id: Option<String>,
    /// Resume strictly after this artifact_id.
    pub after: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPage {
    pub artifacts: Vec<ArtifactRecord>,
    pub next_after: Option<String>,
}

#[derive(Debug)]
struct Index {
    catalog: Catalog,
    /// Append order.
    records: Vec<ArtifactRecord>,
    by_id: HashMap<String, usize>,
    by_target: HashMap<String, Vec<usize>>,
    by_job: HashMap<String, Vec<usize>>,
}

impl Index {
    fn push(&mut self, record: ArtifactRecord) {
        let pos = self.records.len();
        self.by_id.insert(record.artifact_id.clone(), pos);
        self.by_target.entry(record.target_id.clone()).or_default().push(pos);
        self.by_job.entry(record.job_id.clone()).or_default().push(pos);
        self.records.push(record);
    }

    fn collect(&self, positions: Option<&Vec<usize>>) -> Vec<ArtifactRecord> {
        positions
            .map(|p| p.iter().map(|&i| self.records[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// Durable artifact capture.
pub struct ArtifactPipeline {
    root: PathBuf,
    blobs: BlobStore,
    index: Mutex<Index>,
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
}

impl ArtifactPipeline {
    /// Open the pipeline under `root` (`<data_dir>/artifacts`), reloading the
    /// catalog.
    pub fn open(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, ArtifactError> {
        let root = root.as_ref().to_path_buf();
        let blobs = BlobStore::open(root.join("blobs"))?;
        let (catalog, existing) = Catalog::open(root.join("catalog.jsonl"))?;

        let ids = IdGenerator::new();
        let mut index = Index {
            catalog,
            records: Vec::with_capacity(existing.len()),
            by_id: HashMap::new(),
            by_target: HashMap::new(),
            by_job: HashMap::new(),
        };
        for record in existing {
            ids.observe(&record.artifact_id);
            index.push(record);
        }
        log::debug!(
            "artifact catalog at {} holds {} record(s)",
            root.display(),
            index.records.len()
        );

        Ok(Self {
            root,
            blobs,
            index: Mutex::new(index),
            ids,
            clock,
        })
    }

    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn len(&self) -> usize {
        self.index().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist one emitted payload and record it.
    pub fn ingest(
        &self,
        target_id: &str,
        job_id: &str,
        input: ArtifactInput,
    ) -> Result<ArtifactRecord, ArtifactError> {
        if input.artifact_type.trim().is_empty() {
            return Err(ArtifactError::Invalid("artifact type is empty".to_string()));
        }

        // The blob write happens outside the index lock; only same-hash
        // writers wait on each other.
        let put = self.blobs.put(&input.bytes)?;

        let ts = self.clock.now();
        let record = ArtifactRecord {
            artifact_id: self.ids.next(ts),
            target_id: target_id.to_string(),
            job_id: job_id.to_string(),
            ts,
            artifact_type: input.artifact_type,
            size_bytes: put.size_bytes,
            stored_size_bytes: put.stored_size_bytes,
            sha256: put.sha256,
            mime: input.mime.unwrap_or_else(|| DEFAULT_MIME.to_string()),
            name: input.name,
            metadata: input.metadata,
            storage_ref: put.storage_ref,
        };

        let mut index = self.index();
        index.catalog.append(&record)?;
        index.push(record.clone());
        drop(index);

        log::debug!(
            "artifact {} from job {} ({} bytes, {})",
            record.artifact_id,
            job_id,
            record.size_bytes,
            if put.written { "new blob" } else { "deduplicated" }
        );
        Ok(record)
    }

    pub fn get(&self, artifact_id: &str) -> Option<ArtifactRecord> {
        let index = self.index();
        index.by_id.get(artifact_id).map(|&i| index.records[i].clone())
    }

    /// Records for a target, oldest first.
    pub fn list_by_target(&self, target_id: &str) -> Vec<ArtifactRecord> {
        let index = self.index();
        index.collect(index.by_target.get(target_id))
    }

    /// Records for a job, oldest first.
    pub fn list_by_job(&self, job_id: &str) -> Vec<ArtifactRecord> {
        let index = self.index();
        index.collect(index.by_job.get(job_id))
    }

    /// A resumable page of records matching every given selector.
    pub fn page(&self, query: &ArtifactQuery) -> Result<ArtifactPage, ArtifactError> {
        let mut records = match (&query.target_id, &query.job_id) {
            (None, None) => {
                return Err(ArtifactError::Invalid(
                    "target_id or job_id is required".to_string(),
                ))
            }
            (_, Some(job_id)) => self.list_by_job(job_id),
            (Some(target_id), None) => self.list_by_target(target_id),
        };
        if let Some(target_id) = &query.target_id {
            records.retain(|r| &r.target_id == target_id);
        }
        if let Some(after) = &query.after {
            records.retain(|r| r.artifact_id.as_str() > after.as_str());
        }

        let limit = match query.limit {
            Some(0) => return Err(ArtifactError::Invalid("limit must be positive".to_string())),
            Some(n) => n.min(MAX_PAGE_LIMIT),
            None => DEFAULT_PAGE_LIMIT,
        };
        let next_after = if records.len() > limit {
            records.truncate(limit);
            records.last().map(|r| r.artifact_id.clone())
        } else {
            None
        };

        Ok(ArtifactPage {
            artifacts: records,
            next_after,
        })
    }

    /// Payload bytes of an artifact.
    ///
    /// Unknown artifacts, missing blobs and blobs that fail verification all
    /// come back as `None`.
    pub fn read_payload(&self, artifact_id: &str) -> Option<Vec<u8>> {
        let record = self.get(artifact_id)?;
        match self.blobs.read_verified(&record.sha256) {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => {
                log::warn!(
                    "payload of artifact {} unavailable (blob {})",
                    artifact_id,
                    record.sha256
                );
                None
            }
            Err(e) => {
                log::warn!("reading payload of artifact {} failed: {}", artifact_id, e);
                None
            }
        }
    }

    /// Base64 payload for records small enough to echo inline.
    pub fn inline_payload_b64(&self, record: &ArtifactRecord) -> Option<String> {
        if record.size_bytes > INLINE_MAX_BYTES {
            return None;
        }
        self.read_payload(&record.artifact_id)
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}
