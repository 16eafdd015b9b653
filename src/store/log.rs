use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::codec;
use crate::error::{ParleyError, Result};
use crate::model::Record;
use crate::store::lock;

/// Upper bound on one encoded record. A single append of this size is issued
/// as one `write` call, which local filesystems apply atomically in append
/// mode.
pub const MAX_RECORD_BYTES: usize = 4096;

/// The append-only log shared by every participant.
#[derive(Debug, Clone)]
pub struct SharedLog {
    path: PathBuf,
}

impl SharedLog {
    /// Open the log, creating it (and its parent directory) when absent.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Returns once the bytes are written, flushed and
    /// synced to storage.
    pub fn append(&self, record: &Record) -> Result<()> {
        if record.body.contains(['\n', '\r']) || record.sender.contains(['\n', '\r']) {
            return Err(ParleyError::InvalidMessage(
                "record fields must not contain line breaks".into(),
            ));
        }
        let line = codec::encode_record(record);
        if line.len() > MAX_RECORD_BYTES {
            return Err(ParleyError::RecordTooLong(line.len(), MAX_RECORD_BYTES));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let guard = lock::lock_for_append(&file);
        let mut writer = &file;
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        if let Err(err) = file.sync_all() {
            // Some network shares reject fsync; the write itself went through.
            warn!(path = %self.path.display(), error = %err, "sync after append failed");
        }
        drop(guard);

        debug!(sender = %record.sender, bytes = line.len(), "appended record");
        Ok(())
    }

    /// Byte length of the log right now.
    pub fn end_position(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// A tail that sees only bytes at or after `position`.
    pub fn tail_from(&self, position: u64) -> LogTail {
        LogTail {
            path: self.path.clone(),
            cursor: position,
        }
    }

    pub fn tail_from_end(&self) -> Result<LogTail> {
        Ok(self.tail_from(self.end_position()?))
    }

    /// The last `limit` well-formed records (all of them when `limit` is
    /// `None`). Malformed lines are skipped.
    pub fn read_records(&self, limit: Option<usize>) -> Result<Vec<Record>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        let content = String::from_utf8_lossy(&bytes);
        let mut records: Vec<Record> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| codec::decode(l).ok())
            .collect();
        if let Some(n) = limit {
            let len = records.len();
            if len > n {
                records = records.split_off(len - n);
            }
        }
        Ok(records)
    }
}

/// A cursor over the shared log that yields complete lines only.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    cursor: u64,
}

impl LogTail {
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Read every complete line appended since the last poll.
    ///
    /// A trailing line without its newline is left for a later poll, so the
    /// cursor only ever moves past whole lines.
    pub fn poll(&mut self) -> Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        let len = file.metadata()?.len();
        if len < self.cursor {
            warn!(
                path = %self.path.display(),
                cursor = self.cursor,
                len,
                "shared log shrank below cursor; re-anchoring at end"
            );
            self.cursor = len;
            return Ok(vec![]);
        }
        if len == self.cursor {
            return Ok(vec![]);
        }

        file.seek(SeekFrom::Start(self.cursor))?;
        let mut buf = Vec::new();
        file.take(len - self.cursor).read_to_end(&mut buf)?;

        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(vec![]);
        };
        self.cursor += last_newline as u64 + 1;

        Ok(buf[..last_newline]
            .split(|b| *b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect())
    }
}
