//! Durable action log.
//!
//! `FileActionLog` keeps the in-memory indices of [`InMemoryActionLog`] and
//! mirrors every append to a write-ahead file before the record becomes
//! visible. Opening an existing file replays it.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte][FLOOR: 8 bytes LE]
//! [ENTRY 1: codec-framed ActionRecord]
//! [ENTRY 2: codec-framed ActionRecord]
//! ...
//! ```
//!
//! `FLOOR` is the last sequence assigned when the file was written. It keeps
//! numbering monotonic after a compaction removed every record.

mod codec;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;

use crate::action::{ActionRecord, ActionRef, Completion, FlowId, Sequence};
use crate::error::LogError;

use super::memory::InMemoryActionLog;
use super::traits::ActionLog;

/// Configuration for the file-backed log.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// Whether to fsync after every append (slower but safer).
    pub sync_on_write: bool,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self { sync_on_write: true }
    }
}

/// Append handle of the backing file.
#[derive(Debug)]
struct Tail {
    file: File,
    /// File length up to the end of the last complete entry.
    committed: u64,
    /// Set when a failed write could not be rolled back; appends are refused
    /// until a compaction rewrites the file.
    broken: bool,
}

/// Action log persisted to a single append-only file.
pub struct FileActionLog {
    path: PathBuf,
    config: FileLogConfig,
    index: InMemoryActionLog,
    tail: Mutex<Tail>,
}

impl std::fmt::Debug for FileActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileActionLog")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FileActionLog {
    /// Open or create a log file, replaying any records it holds.
    ///
    /// Replay stops at the first entry that fails to decode; the torn or
    /// corrupt tail is cut off so later appends stay readable.
    pub fn open(path: impl AsRef<Path>, config: FileLogConfig) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let index = InMemoryActionLog::new();

        let existing_len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let committed = if existing_len >= codec::HEADER_LEN {
            let valid_end = Self::replay(&path, existing_len, &index)?;
            if valid_end < existing_len {
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_end)?;
                file.sync_all()?;
            }
            valid_end
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            codec::write_header(&mut file, Sequence::ZERO.value())?;
            if config.sync_on_write {
                file.sync_all()?;
            }
            codec::HEADER_LEN
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        tracing::debug!(path = %path.display(), records = index.len()?, "action log opened");

        Ok(Self {
            path,
            config,
            index,
            tail: Mutex::new(Tail {
                file,
                committed,
                broken: false,
            }),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(path: &Path, file_len: u64, index: &InMemoryActionLog) -> Result<u64, LogError> {
        let mut reader = BufReader::new(File::open(path)?);
        let floor = codec::read_header(&mut reader)?;

        let mut valid_end = codec::HEADER_LEN;
        while valid_end < file_len {
            match codec::decode::<ActionRecord>(&mut reader) {
                Ok(record) => {
                    index.restore(record)?;
                    valid_end = reader.stream_position()?;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::warn!(path = %path.display(), offset = valid_end, "torn action log tail discarded");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        offset = valid_end,
                        error = %e,
                        "corrupt action log entry, replay stopped"
                    );
                    break;
                }
            }
        }
        index.resume_after(Sequence::new(floor))?;
        Ok(valid_end)
    }

    fn lock_tail(&self) -> Result<MutexGuard<'_, Tail>, LogError> {
        self.tail
            .lock()
            .map_err(|_| LogError::Backend("poisoned lock: file_log.tail".to_string()))
    }

    fn write_entry(&self, record: &ActionRecord) -> Result<(), LogError> {
        let encoded = codec::encode(record)?;
        let mut tail = self.lock_tail()?;
        if tail.broken {
            return Err(LogError::Backend(format!(
                "{} has an unrecovered partial write",
                self.path.display()
            )));
        }

        let written = match tail.file.write_all(&encoded) {
            Ok(()) if self.config.sync_on_write => tail.file.sync_data(),
            other => other,
        };
        match written {
            Ok(()) => {
                tail.committed += encoded.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Cut any partial frame so the next entry starts on a boundary.
                if let Err(rollback) = self.roll_back(&mut tail) {
                    tracing::error!(path = %self.path.display(), error = %rollback, "action log rollback failed");
                    tail.broken = true;
                }
                Err(e.into())
            }
        }
    }

    fn roll_back(&self, tail: &mut Tail) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(tail.committed)?;
        tail.file = file;
        Ok(())
    }

    fn rewrite(&self, records: &[Arc<ActionRecord>], last: Sequence) -> Result<(), LogError> {
        let mut tail = self.lock_tail()?;

        let tmp = self.path.with_extension("compact");
        let committed = match Self::write_compacted(&tmp, records, last) {
            Ok(len) => len,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        };
        fs::rename(&tmp, &self.path)?;

        match OpenOptions::new().append(true).open(&self.path) {
            Ok(file) => {
                *tail = Tail {
                    file,
                    committed,
                    broken: false,
                };
                Ok(())
            }
            Err(e) => {
                tail.broken = true;
                Err(e.into())
            }
        }
    }

    fn write_compacted(tmp: &Path, records: &[Arc<ActionRecord>], last: Sequence) -> io::Result<u64> {
        let mut out = BufWriter::new(
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(tmp)?,
        );
        codec::write_header(&mut out, last.value())?;
        let mut len = codec::HEADER_LEN;
        for record in records {
            let encoded = codec::encode(record.as_ref())?;
            out.write_all(&encoded)?;
            len += encoded.len() as u64;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(len)
    }
}

impl ActionLog for FileActionLog {
    fn append(&self, completion: Completion) -> Result<Arc<ActionRecord>, LogError> {
        self.index.append_with(completion, |record| self.write_entry(record))
    }

    fn get(&self, sequence: Sequence) -> Result<Option<Arc<ActionRecord>>, LogError> {
        self.index.get(sequence)
    }

    fn since(&self, action: &ActionRef, after: Sequence) -> Result<Vec<Arc<ActionRecord>>, LogError> {
        self.index.since(action, after)
    }

    fn in_flow(
        &self,
        flow: FlowId,
        action: &ActionRef,
        before: Sequence,
    ) -> Result<Vec<Arc<ActionRecord>>, LogError> {
        self.index.in_flow(flow, action, before)
    }

    fn flow(&self, flow: FlowId) -> Result<Vec<Arc<ActionRecord>>, LogError> {
        self.index.flow(flow)
    }

    fn latest_matching(
        &self,
        action: &ActionRef,
        before: Sequence,
        matches: &dyn Fn(&ActionRecord) -> bool,
    ) -> Result<Option<Arc<ActionRecord>>, LogError> {
        self.index.latest_matching(action, before, matches)
    }

    fn last_sequence(&self) -> Result<Sequence, LogError> {
        self.index.last_sequence()
    }

    fn len(&self) -> Result<usize, LogError> {
        self.index.len()
    }

    fn truncate_before(&self, sequence: Sequence) -> Result<usize, LogError> {
        let removed = self
            .index
            .truncate_with(sequence, |retained, last| self.rewrite(retained, last))?;
        tracing::info!(path = %self.path.display(), removed, before = %sequence, "action log compacted");
        Ok(removed)
    }
}
