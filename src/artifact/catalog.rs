//! Append-only artifact catalog: one JSON record per line.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use hooklane_protocol::ops::ArtifactRecord;

#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    file: File,
    /// The file ends in a partial line; the next append starts a new one.
    torn: bool,
}

impl Catalog {
    /// Open (or create) the catalog and return every readable record in
    /// append order.
    ///
    /// A torn final line from an interrupted append is skipped with a warning.
    pub fn open(path: impl AsRef<Path>) -> io::Result<(Self, Vec<ArtifactRecord>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut records = Vec::new();
        let mut torn_tail = false;
        if path.exists() {
            let mut reader = BufReader::new(File::open(&path)?);
            let mut buf = Vec::new();
            let mut lineno = 0;
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf)? == 0 {
                    break;
                }
                lineno += 1;
                torn_tail = buf.last() != Some(&b'\n');
                let line = String::from_utf8_lossy(&buf);
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ArtifactRecord>(line.trim_end()) {
                    Ok(record) => records.push(record),
                    Err(e) => log::warn!(
                        "skipping unreadable catalog line {} in {}: {}",
                        lineno,
                        path.display(),
                        e
                    ),
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            Self {
                path,
                file,
                torn: torn_tail,
            },
            records,
        ))
    }

    /// Append one record and flush it to disk.
    ///
    /// A failed write is truncated away so the bytes it left cannot swallow
    /// the next record.
    pub fn append(&mut self, record: &ArtifactRecord) -> io::Result<()> {
        let mut line = Vec::new();
        if self.torn {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record).map_err(io::Error::other)?;
        line.push(b'\n');

        let len = self.file.metadata()?.len();
        match self.file.write_all(&line).and_then(|()| self.file.sync_data()) {
            Ok(()) => {
                self.torn = false;
                Ok(())
            }
            Err(e) => {
                self.rollback(len);
                Err(e)
            }
        }
    }

    fn rollback(&mut self, len: u64) {
        if let Err(e) = self.file.set_len(len) {
            log::warn!(
                "could not truncate partial append to {}: {}",
                self.path.display(),
                e
            );
            self.torn = true;
        }
    }
}
