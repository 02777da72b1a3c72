//! Advisory, cross-process, cooperative lock anchored at a sentinel
//! file under `.relay/`. Exclusive ownership is an OS-level file lock
//! (`fs2`); the sentinel's mtime additionally records liveness so a
//! lock abandoned by a crashed process can be reclaimed.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use fs2::FileExt;
use rand::Rng;

use crate::config::RelayConfig;
use crate::errors::{RelayError, Result};

/// Holds the lock for `<root>/.relay/state.json` while a transaction
/// runs. Dropping it releases the OS lock and stops the refresh
/// thread; `release()` does the same thing explicitly and is
/// idempotent.
pub struct LockGuard {
    file: Option<File>,
    stop: Arc<AtomicBool>,
    refresher: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl LockGuard {
    /// Releases the lock. Safe to call once; a second call, or letting
    /// the guard drop afterward, is a no-op.
    pub fn release(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.refresher.take() {
            let _ = handle.join();
        }
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Manages acquisition of the feature lock for a given project root.
pub struct LockManager {
    root: PathBuf,
    sentinel_name: &'static str,
}

impl LockManager {
    /// Locks `<root>/.relay/state.json.lock`, the feature lock used by
    /// every transaction after the store has been initialized.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            sentinel_name: "state.json.lock",
        }
    }

    /// Locks `<root>/.relay/init.lock`, a sentinel distinct from the
    /// feature lock so that `Store::init()` (which may run concurrently
    /// with another process's first pulse before `state.json` exists)
    /// never contends with ordinary transactions over the same file.
    pub fn for_init(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            sentinel_name: "init.lock",
        }
    }

    /// The sentinel path this manager locks.
    pub fn sentinel_path(&self) -> PathBuf {
        self.root.join(".relay").join(self.sentinel_name)
    }

    /// Attempts to acquire exclusive ownership within `config.lock_timeout()`
    /// (or a caller override). Retries with exponential backoff and
    /// jitter, capped at `config.lock_retry_cap()`. Fatal OS errors
    /// (permission, read-only filesystem, name-too-long, …) are not
    /// retried.
    pub fn acquire(&self, config: &RelayConfig) -> Result<LockGuard> {
        self.acquire_with_timeout(config, config.lock_timeout())
    }

    pub fn acquire_with_timeout(&self, config: &RelayConfig, timeout: Duration) -> Result<LockGuard> {
        let path = self.sentinel_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| classify_io_error(&path, e))?;
        }

        let deadline = Instant::now() + timeout;
        let mut backoff_ms: u64 = 20;

        loop {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| classify_io_error(&path, e))?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    touch(&path);
                    return Ok(spawn_guard(file, path, config));
                }
                Err(e) if is_fatal(&e) => {
                    return Err(RelayError::LockFatal(path.display().to_string(), e.to_string()));
                }
                Err(_) => {
                    // lock held by someone else; see if it's gone stale
                    if is_stale(&path, config) {
                        if steal(&file).is_ok() {
                            touch(&path);
                            return Ok(spawn_guard(file, path, config));
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(RelayError::LockBusy(path.display().to_string()));
            }

            let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 2 + 1);
            std::thread::sleep(Duration::from_millis(backoff_ms + jitter));
            backoff_ms = (backoff_ms * 2).min(config.lock_retry_cap_ms);
        }
    }
}

fn spawn_guard(file: File, path: PathBuf, config: &RelayConfig) -> LockGuard {
    let stop = Arc::new(AtomicBool::new(false));
    let refresh_interval = config.lock_refresh();
    let refresh_path = path.clone();
    let refresh_stop = Arc::clone(&stop);
    let refresher = std::thread::spawn(move || {
        while !refresh_stop.load(Ordering::SeqCst) {
            std::thread::sleep(refresh_interval);
            if refresh_stop.load(Ordering::SeqCst) {
                break;
            }
            touch(&refresh_path);
        }
    });

    LockGuard {
        file: Some(file),
        stop,
        refresher: Some(refresher),
        path,
    }
}

/// Attempts to take over an abandoned lock: steal the flock on the
/// existing sentinel by re-opening and relocking it. Only called once
/// `is_stale` has already confirmed the mtime is old.
fn steal(file: &File) -> io::Result<()> {
    file.try_lock_exclusive()
}

fn is_stale(path: &Path, config: &RelayConfig) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    match modified.elapsed() {
        Ok(age) => age > config.lock_stale(),
        Err(_) => false,
    }
}

fn touch(path: &Path) {
    let now = std::time::SystemTime::now();
    if let Ok(file) = OpenOptions::new().write(true).open(path) {
        let _ = file.set_modified(now);
    }
}

fn is_fatal(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::PermissionDenied
        || e.raw_os_error().is_some_and(is_fatal_errno)
}

#[cfg(unix)]
fn is_fatal_errno(errno: i32) -> bool {
    const EACCES: i32 = 13;
    const EPERM: i32 = 1;
    const EROFS: i32 = 30;
    const ENOTDIR: i32 = 20;
    const ENAMETOOLONG: i32 = 36;
    matches!(errno, EACCES | EPERM | EROFS | ENOTDIR | ENAMETOOLONG)
}

#[cfg(not(unix))]
fn is_fatal_errno(_errno: i32) -> bool {
    false
}

fn classify_io_error(path: &Path, e: io::Error) -> RelayError {
    if is_fatal(&e) {
        RelayError::LockFatal(path.display().to_string(), e.to_string())
    } else {
        RelayError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn acquire_and_release_round_trips() {
        let dir = TempDir::new().unwrap();
        let manager = LockManager::new(dir.path());
        let config = RelayConfig::default();
        let mut guard = manager.acquire(&config).unwrap();
        assert!(manager.sentinel_path().exists());
        guard.release();
    }

    #[test]
    #[serial]
    fn init_lock_is_a_distinct_sentinel_from_the_feature_lock() {
        let dir = TempDir::new().unwrap();
        let feature = LockManager::new(dir.path());
        let init = LockManager::for_init(dir.path());
        assert_ne!(feature.sentinel_path(), init.sentinel_path());

        let config = RelayConfig::default();
        // Holding the feature lock must not block acquiring the init lock.
        let mut feature_guard = feature.acquire(&config).unwrap();
        let mut init_guard = init.acquire(&config).unwrap();
        init_guard.release();
        feature_guard.release();
    }

    #[test]
    #[serial]
    fn second_acquire_fails_with_busy_while_first_is_held() {
        let dir = TempDir::new().unwrap();
        let manager = LockManager::new(dir.path());
        let mut config = RelayConfig::default();
        config.lock_timeout_ms = 200;
        config.lock_retry_cap_ms = 50;

        let _first = manager.acquire(&config).unwrap();
        let result = manager.acquire_with_timeout(&config, Duration::from_millis(200));
        assert!(matches!(result, Err(RelayError::LockBusy(_))));
    }

    #[test]
    #[serial]
    fn release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = LockManager::new(dir.path());
        let config = RelayConfig::default();
        let mut guard = manager.acquire(&config).unwrap();
        guard.release();
        guard.release();
    }

    #[test]
    #[serial]
    fn stale_lock_can_be_reclaimed() {
        let dir = TempDir::new().unwrap();
        let manager = LockManager::new(dir.path());
        let mut config = RelayConfig::default();
        config.lock_stale_secs = 0;
        config.lock_timeout_ms = 500;
        config.lock_retry_cap_ms = 50;

        std::fs::create_dir_all(dir.path().join(".relay")).unwrap();
        let sentinel = manager.sentinel_path();
        std::fs::write(&sentinel, b"").unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(120);
        let f = OpenOptions::new().write(true).open(&sentinel).unwrap();
        f.set_modified(old).unwrap();
        drop(f);

        let mut guard = manager.acquire(&config).unwrap();
        guard.release();
    }
}
