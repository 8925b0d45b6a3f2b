//! Scoped lock file with bounded wait and stale-holder reclaim
//!
//! The lock is a file created with `O_CREAT | O_EXCL`; whoever creates it
//! holds the lock until the guard drops. The file records the holder's pid,
//! a random token, and the acquisition time, so an abandoned lock (holder
//! crashed) can be recognized once it is older than the staleness threshold
//! and reclaimed by another process.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::id::new_id;
use crate::layout::TOMBSTONE_PREFIX;
use crate::{Error, Result};

/// Timing policy for [`LockFile::acquire`].
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    /// Give up after waiting this long.
    pub timeout: Duration,
    /// Sleep between attempts.
    pub poll_interval: Duration,
    /// A lock older than this is considered abandoned.
    pub stale_after: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct Holder {
    pid: u32,
    token: String,
    acquired_at: DateTime<Utc>,
}

/// Held lock; released when dropped, on every exit path.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    token: String,
}

impl LockFile {
    /// Acquire the lock at `path`, waiting at most `policy.timeout`.
    ///
    /// `label` names the guarded resource in the timeout error.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock stays held by a live holder for the
    /// whole wait, or an IO error if the lock file cannot be created.
    pub fn acquire(path: &Path, label: &str, policy: &LockPolicy) -> Result<Self> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if Self::is_stale(path, policy.stale_after) && Self::reclaim(path) {
                continue;
            }
            let waited = started.elapsed();
            if waited >= policy.timeout {
                return Err(Error::LockTimeout {
                    model_name: label.to_string(),
                    waited,
                });
            }
            thread::sleep(policy.poll_interval.min(policy.timeout - waited));
        }
    }

    /// Single non-blocking attempt.
    ///
    /// # Errors
    ///
    /// Returns an IO error other than "already exists".
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let holder = Holder {
            pid: std::process::id(),
            token: new_id(),
            acquired_at: Utc::now(),
        };
        let written = serde_json::to_vec(&holder)
            .map_err(|e| Error::InvalidInput(format!("lock holder: {e}")))
            .and_then(|payload| {
                file.write_all(&payload)?;
                file.sync_all()?;
                Ok(())
            });
        if let Err(err) = written {
            let _ = fs::remove_file(path);
            return Err(err);
        }
        debug!(path = %path.display(), "acquired lock");
        Ok(Some(Self {
            path: path.to_path_buf(),
            token: holder.token,
        }))
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        let acquired = fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Holder>(&bytes).ok())
            .map(|holder| SystemTime::from(holder.acquired_at))
            .or_else(|| fs::metadata(path).and_then(|m| m.modified()).ok());
        acquired
            .and_then(|at| SystemTime::now().duration_since(at).ok())
            .is_some_and(|age| age > stale_after)
    }

    /// Move an abandoned lock aside, making sure it is the one judged stale.
    ///
    /// Returns `false` when nothing was reclaimed: the entry could not be
    /// read or moved (not a regular file, no permission), or a fresh holder
    /// had replaced it and was handed back its lock.
    ///
    /// A holder released while its lock sits aside deletes the aside copy
    /// and then rechecks the lock path, so a restore either fails or is
    /// seen and released by the `Drop` impl.
    fn reclaim(path: &Path) -> bool {
        let Ok(observed) = fs::read(path) else {
            return false;
        };
        let Some(dir) = path.parent() else {
            return false;
        };
        let aside = dir.join(format!("{TOMBSTONE_PREFIX}lock.{}", new_id()));
        if fs::rename(path, &aside).is_err() {
            // Another waiter reclaimed it first, retry straight away.
            return !path.exists();
        }
        let reclaimed = match fs::read(&aside) {
            Ok(moved) if moved == observed => {
                warn!(path = %path.display(), "reclaimed stale lock");
                true
            }
            _ => {
                // A fresh holder replaced the stale lock between our read and
                // rename; hand its lock back unless someone already re-took it.
                if fs::hard_link(&aside, path).is_err() {
                    warn!(path = %path.display(), "could not restore lock taken during reclaim");
                }
                false
            }
        };
        let _ = fs::remove_file(&aside);
        reclaimed
    }

    fn holds(&self, path: &Path) -> bool {
        fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Holder>(&bytes).ok())
            .is_some_and(|holder| holder.token == self.token)
    }

    fn release(&self) -> bool {
        if !self.holds(&self.path) {
            return false;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release lock");
        }
        true
    }

    /// Delete copies of our lock that a reclaimer moved aside.
    fn discard_moved_aside(&self) {
        let Some(dir) = self.path.parent() else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let aside_prefix = format!("{TOMBSTONE_PREFIX}lock.");
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with(&aside_prefix) && self.holds(&path) {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

impl Drop for LockFile {
    /// Releases the lock if it is still ours.
    ///
    /// When the lock path is empty a reclaimer may have our lock aside and
    /// be about to restore it. Deleting the aside copy first makes a later
    /// restore fail; a restore that already happened shows up on the
    /// second look at the path.
    fn drop(&mut self) {
        if self.release() {
            return;
        }
        if self.path.exists() {
            warn!(path = %self.path.display(), "lock was reclaimed while held");
            return;
        }
        self.discard_moved_aside();
        self.release();
    }
}
