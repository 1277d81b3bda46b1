//! Content-addressed blob store.
//!
//! Payloads are stored once per SHA-256 digest under a two-level fan-out:
//! `<root>/<sha256[0:2]>/<sha256>`
//!
//! - Atomic writes via write-to-temp-then-rename
//! - Writes of the same digest are serialized; the second writer finds the
//!   blob present and writes nothing
//! - Reads can verify content against the digest

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

use crate::keyed_lock::KeyedLocks;

const TEMP_DIR: &str = ".tmp";
const TEMP_PREFIX: &str = ".tmp.";

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid digest '{0}'")]
    InvalidDigest(String),

    #[error("blob walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Result of a `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub sha256: String,
    pub size_bytes: u64,
    /// Bytes occupied on disk by the blob.
    pub stored_size_bytes: u64,
    /// Path relative to the artifacts directory.
    pub storage_ref: String,
    /// False when the blob was already present.
    pub written: bool,
}

/// Totals over the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobStats {
    pub blobs: u64,
    pub bytes: u64,
    pub temp_files: u64,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn is_valid_digest(sha256: &str) -> bool {
    sha256.len() == 64 && sha256.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Content-addressed payload store.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    write_locks: KeyedLocks,
    temp_seq: AtomicU64,
    /// Temp files younger than this are assumed to belong to a live writer.
    orphan_threshold: Duration,
}

impl BlobStore {
    /// Open the store at `root`, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TEMP_DIR))?;
        Ok(Self {
            root,
            write_locks: KeyedLocks::new(),
            temp_seq: AtomicU64::new(0),
            orphan_threshold: Duration::from_secs(3600),
        })
    }

    pub fn with_orphan_threshold(mut self, threshold: Duration) -> Self {
        self.orphan_threshold = threshold;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, sha256: &str) -> PathBuf {
        self.root.join(&sha256[..2]).join(sha256)
    }

    /// Reference recorded in artifact records: `blobs/<aa>/<sha256>`.
    pub fn storage_ref(sha256: &str) -> String {
        format!("blobs/{}/{}", &sha256[..2], sha256)
    }

    pub fn contains(&self, sha256: &str) -> bool {
        is_valid_digest(sha256) && self.blob_path(sha256).is_file()
    }

    /// Store `bytes` under their digest.
    pub fn put(&self, bytes: &[u8]) -> Result<PutOutcome, BlobError> {
        let sha256 = sha256_hex(bytes);
        let path = self.blob_path(&sha256);

        let written = self.write_locks.with_lock(&sha256, || -> Result<bool, BlobError> {
            if path.is_file() {
                return Ok(false);
            }
            self.write_atomic(&path, bytes)?;
            Ok(true)
        })?;

        let stored_size_bytes = fs::metadata(&path)?.len();
        if written {
            log::debug!("stored blob {} ({} bytes)", sha256, bytes.len());
        }

        Ok(PutOutcome {
            storage_ref: Self::storage_ref(&sha256),
            sha256,
            size_bytes: bytes.len() as u64,
            stored_size_bytes,
            written,
        })
    }

    fn write_atomic(&self, final_path: &Path, bytes: &[u8]) -> Result<(), BlobError> {
        let temp_path = self.root.join(TEMP_DIR).join(format!(
            "{}{}.{}",
            TEMP_PREFIX,
            std::process::id(),
            self.temp_seq.fetch_add(1, Ordering::Relaxed)
        ));

        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&temp_path, final_path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(BlobError::Io(e));
        }
        Ok(())
    }

    /// Read a blob. A missing blob is `Ok(None)`.
    pub fn read(&self, sha256: &str) -> Result<Option<Vec<u8>>, BlobError> {
        if !is_valid_digest(sha256) {
            return Err(BlobError::InvalidDigest(sha256.to_string()));
        }
        match fs::read(self.blob_path(sha256)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    /// Read a blob and check it still hashes to its name.
    ///
    /// Returns `Ok(None)` for a missing or corrupted blob.
    pub fn read_verified(&self, sha256: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let Some(bytes) = self.read(sha256)? else {
            return Ok(None);
        };
        let actual = sha256_hex(&bytes);
        if actual != sha256 {
            log::warn!("blob {} is corrupt (content hashes to {})", sha256, actual);
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    /// Count blobs and bytes.
    pub fn stats(&self) -> Result<BlobStats, BlobError> {
        let mut stats = BlobStats::default();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with(TEMP_PREFIX) {
                stats.temp_files += 1;
            } else if is_valid_digest(&name) {
                stats.blobs += 1;
                stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(stats)
    }

    /// Remove temp files left behind by interrupted writes.
    pub fn cleanup_orphaned_temps(&self) -> Result<usize, BlobError> {
        let temp_dir = self.root.join(TEMP_DIR);
        if !temp_dir.exists() {
            return Ok(0);
        }

        let mut cleaned = 0;
        for entry in fs::read_dir(&temp_dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(TEMP_PREFIX))
                .unwrap_or(false);
            if !is_temp {
                continue;
            }

            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            if age.map(|a| a >= self.orphan_threshold).unwrap_or(false) && fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            log::info!("removed {} orphaned blob temp file(s)", cleaned);
        }
        Ok(cleaned)
    }
}
