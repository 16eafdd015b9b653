use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ParleyError, Result};
use crate::model::Username;

pub const CHUNK_SIZE: usize = 8192;

const PART_SUFFIX: &str = ".part";

/// A completed file drop into a participant's transfer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub filename: String,
    pub source_path: PathBuf,
    pub dest_user: String,
    pub dest_path: PathBuf,
}

/// Per-recipient drop directories under a shared transfer root:
/// `<root>/<user>/<filename>`.
#[derive(Debug, Clone)]
pub struct TransferChannel {
    root: PathBuf,
}

impl TransferChannel {
    pub fn open(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn user_dir(&self, user: &Username) -> PathBuf {
        self.root.join(user.as_str())
    }

    pub fn ensure_user_dir(&self, user: &Username) -> Result<PathBuf> {
        let dir = self.user_dir(user);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Copy `source` into `dest_user`'s directory, replacing any file of the
    /// same name.
    ///
    /// Bytes land in a hidden `.part` file first and are renamed into place,
    /// so a polling recipient never lists a half-written file.
    pub fn send(&self, source: &Path, dest_user: &Username) -> Result<TransferRecord> {
        if !source.is_file() {
            return Err(ParleyError::FileNotFound(source.display().to_string()));
        }
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ParleyError::FileNotFound(source.display().to_string()))?;

        let dir = self.ensure_user_dir(dest_user)?;
        let dest_path = dir.join(&filename);
        let part_path = dir.join(format!(".{filename}{PART_SUFFIX}"));

        let copied = match copy_chunked(source, &part_path) {
            Ok(copied) => copied,
            Err(err) => {
                let _ = fs::remove_file(&part_path);
                return Err(match err.kind() {
                    ErrorKind::NotFound => ParleyError::FileNotFound(source.display().to_string()),
                    _ => err.into(),
                });
            }
        };
        if let Err(err) = fs::rename(&part_path, &dest_path) {
            let _ = fs::remove_file(&part_path);
            return Err(err.into());
        }

        debug!(
            file = %filename,
            to = %dest_user,
            bytes = copied,
            "transferred file"
        );
        Ok(TransferRecord {
            filename,
            source_path: source.to_path_buf(),
            dest_user: dest_user.to_string(),
            dest_path,
        })
    }

    /// Names of the files currently in `user`'s directory. In-flight `.part`
    /// files are not listed; a missing directory lists as empty.
    pub fn list(&self, user: &Username) -> Result<BTreeSet<String>> {
        Ok(self.listing(user)?.unwrap_or_default())
    }

    /// Like `list`, but `None` when the directory does not exist.
    pub fn listing(&self, user: &Username) -> Result<Option<BTreeSet<String>>> {
        let dir = self.user_dir(user);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.ends_with(PART_SUFFIX) {
                continue;
            }
            names.insert(name);
        }
        Ok(Some(names))
    }
}

fn copy_chunked(source: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut src = File::open(source)?;
    let mut dst = File::create(dest)?;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
    dst.flush()?;
    if let Err(err) = dst.sync_all() {
        warn!(path = %dest.display(), error = %err, "sync after transfer failed");
    }
    Ok(total)
}

/// The set of filenames a reader has already seen in its own transfer
/// directory. Each poll reports names that were not there last time.
#[derive(Debug)]
pub struct ArrivalWatch {
    user: Username,
    known: BTreeSet<String>,
}

impl ArrivalWatch {
    /// Seed with the current listing so files already present are not
    /// reported as arrivals.
    pub fn new(channel: &TransferChannel, user: Username) -> Result<Self> {
        let known = channel.list(&user)?;
        Ok(Self { user, known })
    }

    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    /// New filenames since the previous poll, sorted. A file removed and later
    /// dropped again counts as a new arrival; an overwrite in place does not.
    ///
    /// A directory that has gone missing (an unmounted share) reports nothing
    /// and leaves the known set alone until it is back.
    pub fn poll(&mut self, channel: &TransferChannel) -> Result<Vec<String>> {
        let Some(current) = channel.listing(&self.user)? else {
            debug!(user = %self.user, "transfer directory missing; keeping known files");
            return Ok(Vec::new());
        };
        let arrived = current.difference(&self.known).cloned().collect();
        self.known = current;
        Ok(arrived)
    }
}
