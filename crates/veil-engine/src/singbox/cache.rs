//! Cache-file acquisition under contention.
//!
//! The engine keeps an exclusively-locked store file in its data directory.
//! A previous engine that has not released it yet (or a foreign holder) makes
//! the preferred file unusable; after a bounded wait we switch to a uniquely
//! named fallback file and prune old fallbacks.

use crate::singbox::settings::CachePolicy;
use crate::singbox::types::*;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::time::Instant;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The cache file chosen for one engine launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResolution {
    pub path: PathBuf,
    /// Why the preferred file was abandoned; `None` when it was usable.
    pub fallback_reason: Option<String>,
}

impl CacheResolution {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }

    /// Notice for the log sink naming the file in use.
    pub fn notice(&self, preferred_name: &str) -> String {
        match &self.fallback_reason {
            Some(reason) => format!(
                "{} busy ({}), switched to {}",
                preferred_name,
                reason,
                self.path.display()
            ),
            None => format!("using cache file {}", self.path.display()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one attempt to open the preferred file.
#[derive(Debug)]
enum Probe {
    Ready,
    /// Held by someone else; worth waiting for.
    Contended(io::Error),
    /// Unwritable leftover; delete and retry.
    Stale(io::Error),
    /// Anything else; stop waiting.
    Fatal(io::Error),
}

fn open_rw(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

fn probe(path: &Path) -> Probe {
    let file = match open_rw(path) {
        Ok(f) => f,
        Err(e) if is_sharing_violation(&e) => return Probe::Contended(e),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => return Probe::Stale(e),
        Err(e) => return Probe::Fatal(e),
    };
    match try_flock_exclusive(&file) {
        Ok(true) => Probe::Ready,
        Ok(false) => Probe::Contended(io::Error::new(
            io::ErrorKind::WouldBlock,
            "locked by another process",
        )),
        Err(e) => Probe::Fatal(e),
    }
    // `file` drops here, releasing the probe lock.
}

/// Windows reports exclusive-open conflicts as sharing/lock violations.
fn is_sharing_violation(err: &io::Error) -> bool {
    #[cfg(windows)]
    {
        const ERROR_SHARING_VIOLATION: i32 = 32;
        const ERROR_LOCK_VIOLATION: i32 = 33;
        matches!(
            err.raw_os_error(),
            Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
        )
    }
    #[cfg(not(windows))]
    {
        let _ = err;
        false
    }
}

/// Non-blocking exclusive `flock`. `Ok(false)` means another descriptor
/// holds the lock. Always succeeds on platforms without `flock`, where the
/// open itself fails on contention.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for this call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Preferred file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Poll the preferred file until it is writable or the policy timeout runs out.
pub async fn wait_for_writable(path: &Path, policy: &CachePolicy) -> io::Result<()> {
    let deadline = Instant::now() + policy.contention_timeout();
    loop {
        let last = match probe(path) {
            Probe::Ready => return Ok(()),
            Probe::Contended(e) => e,
            Probe::Stale(e) => {
                log::debug!("removing unwritable cache file {}: {}", path.display(), e);
                let _ = std::fs::remove_file(path);
                e
            }
            Probe::Fatal(e) => return Err(e),
        };
        if Instant::now() >= deadline {
            return Err(last);
        }
        tokio::time::sleep(policy.poll_interval()).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Fallback files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn unique_suffix() -> i64 {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

/// Create a fresh `cache-<nanos>.db` with exclusive-create semantics.
pub async fn create_fallback(dir: &Path, policy: &CachePolicy) -> io::Result<PathBuf> {
    for _ in 0..policy.fallback_attempts {
        let path = dir.join(policy.fallback_name(unique_suffix()));
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        match opts.open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists || is_sharing_violation(&e) => {
                tokio::time::sleep(policy.fallback_backoff()).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "no alternative cache file available",
    ))
}

/// Keep `keep` plus the most recently modified fallbacks, `policy.retain` in
/// total; delete the rest. Errors are ignored.
pub fn prune_fallbacks(dir: &Path, keep: &Path, policy: &CachePolicy) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut others: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| policy.is_fallback_name(n))
        })
        .map(|e| e.path())
        .filter(|p| p != keep)
        .map(|p| {
            let modified = std::fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (p, modified)
        })
        .collect();
    others.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in others.into_iter().skip(policy.retain.saturating_sub(1)) {
        if std::fs::remove_file(&path).is_ok() {
            log::debug!("pruned stale cache file {}", path.display());
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pick the cache file for the next engine launch in `dir`.
pub async fn resolve_cache_file(
    dir: &Path,
    policy: &CachePolicy,
) -> Result<CacheResolution, SingBoxError> {
    let preferred = dir.join(&policy.file_name);
    let busy = match wait_for_writable(&preferred, policy).await {
        Ok(()) => {
            log::debug!("using cache file {}", preferred.display());
            return Ok(CacheResolution {
                path: preferred,
                fallback_reason: None,
            });
        }
        Err(e) => e,
    };

    let path = create_fallback(dir, policy).await.map_err(|e| {
        SingBoxError::new(SingBoxErrorKind::CacheUnavailable, "No usable cache file")
            .with_detail(format!("{}: {}; fallback: {}", policy.file_name, busy, e))
    })?;
    prune_fallbacks(dir, &path, policy);
    log::warn!(
        "{} busy ({}), switched to {}",
        policy.file_name,
        busy,
        path.display()
    );
    Ok(CacheResolution {
        path,
        fallback_reason: Some(busy.to_string()),
    })
}
