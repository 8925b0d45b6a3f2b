//! Metadata Writer - atomic-replace persistence for records and directories
//!
//! Every write goes to a temporary sibling of its destination (same directory,
//! so the same filesystem), is synced, and is then renamed over the
//! destination. A reader sees the previous complete record or the new complete
//! record, never a torn one. New entity directories are built under a
//! temporary name and renamed into place the same way, so a concurrent lister
//! never observes a half-built directory.
//!
//! An interrupted writer leaves at most an orphaned temporary behind. Orphans
//! are invisible to listings and are removed by [`MetadataWriter::sweep_orphans`].

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::id::new_id;
use crate::layout::{TEMP_PREFIX, TOMBSTONE_PREFIX};
use crate::{EntityKind, Error, Result};

/// Atomic writer for metadata records and entity directories.
#[derive(Debug, Clone, Copy)]
pub struct MetadataWriter {
    durable: bool,
}

/// A record serialized to its temporary file but not yet visible.
///
/// Dropping a `PendingWrite` without committing leaves the destination
/// untouched; the temporary is left for [`MetadataWriter::sweep_orphans`],
/// exactly as after a crash between the write and the rename.
#[derive(Debug)]
#[must_use = "a pending write is invisible until committed"]
pub struct PendingWrite {
    temp: PathBuf,
    dest: PathBuf,
    durable: bool,
}

impl PendingWrite {
    /// Temporary file holding the staged content.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Destination the content becomes visible at on commit.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Atomically replace the destination with the staged content.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the rename fails; the destination is untouched.
    pub fn commit(self) -> Result<()> {
        fs::rename(&self.temp, &self.dest)?;
        if self.durable {
            sync_parent(&self.dest);
        }
        Ok(())
    }
}

impl MetadataWriter {
    /// Create a writer; `durable` controls fsync of files and directories.
    #[must_use]
    pub const fn new(durable: bool) -> Self {
        Self { durable }
    }

    /// Serialize `record` as JSON and atomically replace `path` with it.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the temporary cannot be written or renamed.
    pub fn write<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        self.stage(path, record)?.commit()
    }

    /// Serialize `record` to a temporary beside `path` without publishing it.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the temporary cannot be written.
    pub fn stage<T: Serialize>(&self, path: &Path, record: &T) -> Result<PendingWrite> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::InvalidInput(format!("record is not serializable: {e}")))?;
        self.stage_with(path, |file| {
            file.write_all(&bytes)?;
            Ok(())
        })
    }

    /// Atomically replace `path` with whatever `fill` writes.
    ///
    /// # Errors
    ///
    /// Returns the error of `fill`, or an IO error from the temporary or rename.
    pub fn write_with(&self, path: &Path, fill: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
        self.stage_with(path, fill)?.commit()
    }

    /// Atomically place a copy of `src` at `dest`, returning the bytes copied.
    ///
    /// # Errors
    ///
    /// Returns an IO error if `src` cannot be read or `dest` cannot be written.
    pub fn copy_file(&self, src: &Path, dest: &Path) -> Result<u64> {
        let mut source = File::open(src)?;
        let mut copied = 0;
        self.write_with(dest, |file| {
            copied = io::copy(&mut source, file)?;
            Ok(())
        })?;
        Ok(copied)
    }

    fn stage_with(
        &self,
        path: &Path,
        fill: impl FnOnce(&mut File) -> Result<()>,
    ) -> Result<PendingWrite> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .map_or_else(|| "record".into(), |n| n.to_string_lossy());
        let temp = parent.join(format!("{TEMP_PREFIX}{}.{file_name}", new_id()));

        let result: Result<()> = (|| {
            let mut file = File::create(&temp)?;
            fill(&mut file)?;
            file.flush()?;
            if self.durable {
                file.sync_all()?;
            }
            Ok(())
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }

        Ok(PendingWrite {
            temp,
            dest: path.to_path_buf(),
            durable: self.durable,
        })
    }

    /// Build a new directory `parent/name` and publish it with one rename.
    ///
    /// `build` populates the directory while it is still under a temporary
    /// name. If `parent/name` already exists the build is discarded and
    /// `AlreadyExists` is returned; nothing is ever overwritten.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` on collision, or the error of `build` / IO.
    pub fn materialize_dir(
        &self,
        parent: &Path,
        name: &str,
        kind: EntityKind,
        build: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<PathBuf> {
        let target = parent.join(name);
        if target.exists() {
            return Err(Error::already_exists(kind, name));
        }

        let staging = parent.join(format!("{TEMP_PREFIX}{name}.{}", new_id()));
        fs::create_dir(&staging)?;
        let built = build(&staging).and_then(|()| {
            if self.durable {
                sync_dir(&staging)?;
            }
            Ok(())
        });
        if let Err(err) = built {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        // Linux refuses to rename a directory over a non-empty one, so a
        // racing creator surfaces here instead of being overwritten.
        if target.exists() {
            let _ = fs::remove_dir_all(&staging);
            return Err(Error::already_exists(kind, name));
        }
        if let Err(err) = fs::rename(&staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            if target.exists() {
                return Err(Error::already_exists(kind, name));
            }
            return Err(err.into());
        }
        if self.durable {
            sync_parent(&target);
        }
        debug!(path = %target.display(), "materialized directory");
        Ok(target)
    }

    /// Remove the directory tree at `dir` so that it disappears atomically
    /// from listings: it is first renamed to a hidden tombstone, then deleted.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the rename fails. A failure while deleting the
    /// tombstone is logged and left for [`Self::sweep_orphans`].
    pub fn remove_dir(&self, dir: &Path) -> Result<()> {
        let parent = dir
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no parent", dir.display())))?;
        let name = dir
            .file_name()
            .map_or_else(|| "entry".into(), |n| n.to_string_lossy());
        let tombstone = parent.join(format!("{TOMBSTONE_PREFIX}{name}.{}", new_id()));
        fs::rename(dir, &tombstone)?;
        if self.durable {
            sync_dir(parent)?;
        }
        if let Err(err) = fs::remove_dir_all(&tombstone) {
            warn!(path = %tombstone.display(), error = %err, "tombstone left for sweep");
        }
        Ok(())
    }

    /// Remove temporaries and tombstones under `root` older than `older_than`.
    ///
    /// Returns the number of entries removed. Never required for correctness.
    ///
    /// # Errors
    ///
    /// Returns an IO error if `root` cannot be listed.
    pub fn sweep_orphans(&self, root: &Path, older_than: Duration) -> Result<usize> {
        if !root.exists() {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        sweep_dir(root, cutoff, &mut removed)?;
        if removed > 0 {
            debug!(root = %root.display(), removed, "swept orphaned temporaries");
        }
        Ok(removed)
    }
}

impl Default for MetadataWriter {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Treat an entry that vanished mid-walk (renamed or removed by a live
/// writer) as already handled.
fn unless_gone<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn sweep_dir(dir: &Path, cutoff: SystemTime, removed: &mut usize) -> Result<()> {
    let Some(entries) = unless_gone(fs::read_dir(dir))? else {
        return Ok(());
    };
    for entry in entries {
        let Some(entry) = unless_gone(entry)? else {
            continue;
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(file_type) = unless_gone(entry.file_type())? else {
            continue;
        };
        let path = entry.path();

        if name.starts_with(TEMP_PREFIX) || name.starts_with(TOMBSTONE_PREFIX) {
            let Some(modified) = unless_gone(entry.metadata().and_then(|m| m.modified()))? else {
                continue;
            };
            if modified <= cutoff && remove_orphan(&path, file_type.is_dir())? {
                *removed += 1;
            }
        } else if file_type.is_dir() {
            sweep_dir(&path, cutoff, removed)?;
        }
    }
    Ok(())
}

/// Returns `false` if someone else removed the entry first.
fn remove_orphan(path: &Path, is_dir: bool) -> io::Result<bool> {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    Ok(unless_gone(result)?.is_some())
}

/// Read and parse the JSON record at `path`.
///
/// Returns `Ok(None)` if there is no record. A record that exists but does
/// not parse is reported as `CorruptRecord` carrying the path.
///
/// # Errors
///
/// Returns `CorruptRecord` on parse failure, or an IO error on read failure.
pub fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::corrupt(path, e))
}

fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

fn sync_parent(path: &Path) {
    // Directory fsync is unsupported on some platforms; the rename is still atomic.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}
