//! Advisory lock file guarding the progress ledger.
//!
//! The lock is a marker file: it is held while the file exists. Acquisition
//! uses an exclusive create, so two processes can never both observe the lock
//! as acquired. Waiting is a bounded poll with a fixed sleep, which gives no
//! fairness between waiters. This is adequate for a handful of processes
//! updating the ledger now and then, not for heavy contention.
//!
//! Breaking stale markers is opt-in. A marker is claimed by renaming it aside,
//! so only one waiter can break it. A waiter that moves a live marker aside
//! while checking it links it back, leaving a short window in which a third
//! process can take the lock.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Content of the marker file. Diagnostic only: the file's existence is the lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMarker {
    /// Process holding the lock.
    pub pid: u32,

    /// When the lock was taken.
    pub created_at: DateTime<Utc>,
}

impl LockMarker {
    /// Read the marker at `path`, if present and parseable.
    pub fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Proof of lock ownership. The marker is removed when the guard is released
/// or dropped, whichever comes first.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Path of the marker this guard owns.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker, reporting any failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_marker(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = remove_marker(&self.path) {
                warn!("Failed to remove lock file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Poll for the lock up to `max_attempts` times, sleeping `poll_interval`
/// between attempts.
///
/// Returns `None` when every attempt found the marker present. When
/// `stale_after` is set, a marker older than that is removed and the attempt
/// retried.
pub async fn acquire(
    path: &Path,
    max_attempts: u32,
    poll_interval: Duration,
    stale_after: Option<Duration>,
) -> Result<Option<LockGuard>> {
    for attempt in 1..=max_attempts {
        match try_create(path) {
            Ok(guard) => {
                debug!("Acquired lock {:?} (attempt {})", path, attempt);
                return Ok(Some(guard));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if let Some(max_age) = stale_after {
                    if break_if_stale(path, max_age)? {
                        continue;
                    }
                }
                debug!(
                    "Lock {:?} is held, attempt {}/{}",
                    path, attempt, max_attempts
                );
                if attempt < max_attempts {
                    tokio::time::sleep(poll_interval).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(None)
}

fn try_create(path: &Path) -> std::io::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    // From here on the guard owns the marker, so a failed write still removes it.
    let guard = LockGuard {
        path: path.to_path_buf(),
        released: false,
    };

    let marker = LockMarker {
        pid: std::process::id(),
        created_at: Utc::now(),
    };
    let content = serde_json::to_string(&marker).map_err(std::io::Error::other)?;
    file.write_all(content.as_bytes())?;

    Ok(guard)
}

/// Remove the marker if it is older than `max_age`. Returns true if the
/// caller should retry at once.
fn break_if_stale(path: &Path, max_age: Duration) -> Result<bool> {
    match marker_age(path) {
        Ok(age) if age < max_age => Ok(false),
        Ok(_) => claim_stale(path, max_age),
        // Released between our create attempt and now.
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Move the marker aside and delete it if it is still stale.
///
/// Only one waiter can rename a given marker away, so two waiters that both
/// judged the same marker stale cannot both break it. A waiter that loses
/// that race may instead move away the fresh marker of the winner; it finds
/// it young and links it back.
fn claim_stale(path: &Path, max_age: Duration) -> Result<bool> {
    let claim = claim_path(path);
    match std::fs::rename(path, &claim) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    }

    let age = match marker_age(&claim) {
        Ok(age) => age,
        Err(e) => {
            remove_marker(&claim)?;
            return Err(e.into());
        }
    };

    if age < max_age {
        debug!("Lock {:?} was re-taken before it could be broken", path);
        if let Err(e) = std::fs::hard_link(&claim, path) {
            if e.kind() == ErrorKind::AlreadyExists {
                warn!("Lock {:?} changed hands while a live marker was restored", path);
            } else {
                remove_marker(&claim)?;
                return Err(e.into());
            }
        }
        remove_marker(&claim)?;
        return Ok(false);
    }

    match LockMarker::read(&claim) {
        Some(marker) => warn!(
            "Breaking stale lock {:?} held by pid {} since {} ({}s old)",
            path,
            marker.pid,
            marker.created_at,
            age.as_secs()
        ),
        None => warn!("Breaking stale lock {:?} ({}s old)", path, age.as_secs()),
    }
    remove_marker(&claim)?;
    Ok(true)
}

fn marker_age(path: &Path) -> std::io::Result<Duration> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default())
}

/// Unique sibling path a stale marker is moved to while it is inspected.
fn claim_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".stale.{}", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

fn remove_marker(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
