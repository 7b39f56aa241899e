//! Append-only snapshot history.
//!
//! One JSON snapshot per line. Reads keep the longest valid prefix of the
//! file and report whatever follows it; the next append truncates that
//! tail before writing.

use crate::models::Snapshot;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// History store errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Snapshot at {attempted} is not after the latest snapshot at {latest}")]
    NonMonotonic {
        latest: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("History file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invalid data found after the last valid record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    /// 1-based line number of the first invalid record.
    pub line: usize,
    pub reason: String,
    /// Bytes following the valid prefix.
    pub discarded_bytes: u64,
}

/// File-backed, chronologically ordered snapshot history.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    snapshots: Vec<Snapshot>,
    /// Length of the valid prefix in bytes.
    valid_len: u64,
    /// The valid prefix ends without a newline.
    needs_newline: bool,
    corruption: Option<Corruption>,
    tail_pending: bool,
}

/// Result of scanning a history file.
struct Scan {
    snapshots: Vec<Snapshot>,
    valid_len: u64,
    needs_newline: bool,
    corruption: Option<Corruption>,
}

fn scan(bytes: &[u8]) -> Scan {
    let mut snapshots: Vec<Snapshot> = Vec::new();
    let mut offset = 0usize;
    let mut needs_newline = false;
    let mut line_no = 0usize;

    while offset < bytes.len() {
        line_no += 1;
        let rest = &bytes[offset..];
        let (record, has_newline) = match rest.iter().position(|b| *b == b'\n') {
            Some(end) => (&rest[..end], true),
            None => (rest, false),
        };
        let next = offset + record.len() + usize::from(has_newline);

        if record.iter().all(u8::is_ascii_whitespace) {
            offset = next;
            continue;
        }

        let invalid = match serde_json::from_slice::<Snapshot>(record) {
            Ok(snapshot) => match snapshots.last() {
                Some(prev) if snapshot.run_timestamp <= prev.run_timestamp => Some(format!(
                    "timestamp {} does not follow {}",
                    snapshot.run_timestamp, prev.run_timestamp
                )),
                _ => {
                    snapshots.push(snapshot);
                    None
                }
            },
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = invalid {
            return Scan {
                snapshots,
                valid_len: offset as u64,
                needs_newline,
                corruption: Some(Corruption {
                    line: line_no,
                    reason,
                    discarded_bytes: (bytes.len() - offset) as u64,
                }),
            };
        }

        needs_newline = !has_newline;
        offset = next;
    }

    Scan {
        snapshots,
        valid_len: offset as u64,
        needs_newline,
        corruption: None,
    }
}

impl HistoryStore {
    /// Open (or lazily create) the history at `path`.
    ///
    /// A missing file is an empty history. Trailing corruption is logged
    /// and exposed via [`HistoryStore::corruption`], never returned as an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let scan = scan(&bytes);
        if let Some(ref corruption) = scan.corruption {
            warn!(
                path = %path.display(),
                line = corruption.line,
                discarded_bytes = corruption.discarded_bytes,
                reason = %corruption.reason,
                "History has an invalid tail; keeping {} valid snapshots",
                scan.snapshots.len()
            );
        }
        debug!(path = %path.display(), snapshots = scan.snapshots.len(), "History loaded");

        Ok(Self {
            path,
            snapshots: scan.snapshots,
            valid_len: scan.valid_len,
            needs_newline: scan.needs_newline,
            tail_pending: scan.corruption.is_some(),
            corruption: scan.corruption,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a snapshot whose timestamp is strictly after the latest one.
    ///
    /// On error nothing is written and the history is unchanged.
    pub fn append(&mut self, snapshot: Snapshot) -> Result<(), HistoryError> {
        if let Some(latest) = self.latest() {
            if snapshot.run_timestamp <= latest.run_timestamp {
                return Err(HistoryError::NonMonotonic {
                    latest: latest.run_timestamp,
                    attempted: snapshot.run_timestamp,
                });
            }
        }

        let mut line = serde_json::to_string(&snapshot)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        if self.tail_pending {
            warn!(
                path = %self.path.display(),
                "Truncating invalid history tail at byte {}",
                self.valid_len
            );
            file.set_len(self.valid_len)?;
        }

        file.seek(SeekFrom::Start(self.valid_len))?;
        let mut written = 0u64;
        if self.needs_newline {
            file.write_all(b"\n")?;
            written += 1;
        }
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        written += line.len() as u64;

        self.valid_len += written;
        self.needs_newline = false;
        self.tail_pending = false;
        self.snapshots.push(snapshot);

        Ok(())
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// All snapshots, oldest first.
    pub fn all(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[allow(dead_code)] // Pairs with `len`
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Trailing corruption found when the file was opened.
    pub fn corruption(&self) -> Option<&Corruption> {
        self.corruption.as_ref()
    }
}
