//! Lock files in a shared directory.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DistributedLock, LockError, LockHandle, LockOptions};

/// On-disk content of a lock file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFileBody {
    token: Uuid,
    key: String,
    created_at: DateTime<Utc>,
    pid: u32,
    hostname: String,
}

/// `DistributedLock` backed by exclusive file creation.
///
/// One file per key: `<dir>/<sanitised-key>.lock`. Creation with `create_new`
/// is atomic on local filesystems, which gives at most one holder per key.
/// Liveness is judged only by the file's modification time.
#[derive(Debug, Clone)]
pub struct FileLock {
    dir: PathBuf,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", sanitise_key(key)))
    }

    async fn try_create(&self, key: &str, path: &Path) -> Result<Option<LockHandle>, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };

        let body = LockFileBody {
            token: Uuid::now_v7(),
            key: key.to_string(),
            created_at: Utc::now(),
            pid: std::process::id(),
            hostname: hostname().to_string(),
        };
        let bytes = serde_json::to_vec(&body)?;

        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            // Leave no half-written lock behind.
            let _ = tokio::fs::remove_file(path).await;
            return Err(io_err(e));
        }

        Ok(Some(LockHandle {
            key: body.key,
            path: path.to_path_buf(),
            token: body.token,
            created_at: body.created_at,
            pid: body.pid,
            hostname: body.hostname,
        }))
    }

    /// Remove the lock file when its mtime is older than `ttl`.
    ///
    /// Returns `true` when the caller should retry creation immediately (stale
    /// file removed, or the file vanished in the meantime).
    async fn reclaim_if_stale(&self, key: &str, path: &Path, ttl: Duration) -> Result<bool, LockError> {
        let target = path.to_path_buf();
        match under_guard(path, move || remove_if_stale(&target, ttl)).await? {
            Reclaim::Absent => Ok(true),
            Reclaim::Fresh => Ok(false),
            Reclaim::Removed(age) => {
                warn!(lock_key = key, age_secs = age.as_secs(), "reclaimed stale lock");
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl DistributedLock for FileLock {
    async fn acquire(&self, key: &str, options: &LockOptions) -> Result<Option<LockHandle>, LockError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| LockError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path_for(key);
        let deadline = Instant::now() + options.wait;

        loop {
            if let Some(handle) = self.try_create(key, &path).await? {
                debug!(lock_key = key, token = %handle.token, "lock acquired");
                return Ok(Some(handle));
            }

            if self.reclaim_if_stale(key, &path, options.ttl).await? {
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock_key = key, "lock held elsewhere");
                return Ok(None);
            }
            let pause = options.poll.max(Duration::from_millis(1));
            tokio::time::sleep(pause.min(deadline - now)).await;
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<bool, LockError> {
        let (path, token) = (handle.path.clone(), handle.token);
        match under_guard(&handle.path, move || remove_if_owned(&path, token)).await? {
            Release::Removed => {
                debug!(lock_key = %handle.key, "lock released");
                Ok(true)
            }
            Release::Gone => {
                warn!(lock_key = %handle.key, "lock file already gone on release");
                Ok(false)
            }
            Release::Foreign => {
                warn!(lock_key = %handle.key, "lock now owned by another holder, leaving it in place");
                Ok(false)
            }
        }
    }
}

enum Reclaim {
    Absent,
    Fresh,
    Removed(Duration),
}

enum Release {
    Removed,
    Gone,
    Foreign,
}

/// Run `op` while holding an exclusive `flock` on `<lock>.reclaim`.
///
/// Every removal of a lock file goes through here, so the staleness or
/// ownership check and the unlink are one step for all processes sharing the
/// directory. Creation stays lock-free: `create_new` alone decides the holder.
/// The guard file is never deleted; the kernel drops the flock if its holder
/// dies.
async fn under_guard<T, F>(lock_path: &Path, op: F) -> Result<T, LockError>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let path = lock_path.to_path_buf();
    let guard_path = lock_path.with_extension("lock.reclaim");
    let io_err = |source| LockError::Io {
        path: lock_path.to_path_buf(),
        source,
    };

    tokio::task::spawn_blocking(move || {
        let guard = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&guard_path)?;
        guard.lock_exclusive()?;
        let result = op();
        if let Err(e) = FileExt::unlock(&guard) {
            warn!(path = %path.display(), error = %e, "failed to unlock reclaim guard");
        }
        result
    })
    .await
    .map_err(|e| io_err(io::Error::other(e)))?
    .map_err(io_err)
}

fn remove_if_stale(path: &Path, ttl: Duration) -> io::Result<Reclaim> {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Reclaim::Absent),
        Err(e) => return Err(e),
    };

    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if age <= ttl {
        return Ok(Reclaim::Fresh);
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(Reclaim::Removed(age)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Reclaim::Absent),
        Err(e) => Err(e),
    }
}

fn remove_if_owned(path: &Path, token: Uuid) -> io::Result<Release> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Release::Gone),
        Err(e) => return Err(e),
    };

    // A file still being written by its creator does not parse and is not ours.
    let owned = serde_json::from_slice::<LockFileBody>(&raw)
        .map(|body| body.token == token)
        .unwrap_or(false);
    if !owned {
        return Ok(Release::Foreign);
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(Release::Removed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Release::Gone),
        Err(e) => Err(e),
    }
}

fn sanitise_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| "unknown".to_string())
    })
}
