//! Transactional state store: the only place `state.json` is read or
//! written. Every mutation happens under the feature lock; exchange
//! writes happen-before the state write they accompany, so a crash
//! between the two leaves a detectable orphan rather than a dangling
//! reference.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::RelayConfig;
use crate::errors::{RelayError, Result};
use crate::exchange_log;
use crate::lock::LockManager;
use crate::model::{Action, RelayState};
use crate::path_algebra;

pub struct Store {
    root: PathBuf,
    config: RelayConfig,
    locks: LockManager,
}

impl Store {
    pub fn new(root: &Path, config: RelayConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            locks: LockManager::new(root),
            config,
        }
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(".relay").join("state.json")
    }

    fn backup_path(&self) -> PathBuf {
        self.root.join(".relay").join("state.json.bak")
    }

    fn exchanges_dir(&self) -> PathBuf {
        self.root.join(".relay").join("exchanges")
    }

    /// Creates `.relay/state.json` with the default state if missing.
    /// Safe to call repeatedly; a pre-existing document is left alone.
    ///
    /// Guarded by `init.lock`, a sentinel distinct from the feature
    /// lock on `state.json.lock`: two processes racing to initialize a
    /// brand-new workspace contend with each other here, not with a
    /// transaction already in flight against an existing document.
    pub fn init(&self) -> Result<()> {
        let path = self.state_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(self.exchanges_dir())?;
        cleanup_tmp(&path)?;

        let init_lock = LockManager::for_init(&self.root);
        let guard = init_lock.acquire(&self.config)?;
        let result = if !path.exists() {
            let initial = RelayState::initial(now_ms());
            atomic_write_json(&path, &initial)
        } else {
            Ok(())
        };
        drop(guard);
        result
    }

    /// Locks, cleans up any leftover `.tmp`, reads the current state,
    /// applies `reducer_fn`, and atomically writes the result back.
    pub fn update<F>(&self, reducer_fn: F) -> Result<RelayState>
    where
        F: FnOnce(&RelayState) -> Result<RelayState>,
    {
        let mut guard = self.locks.acquire(&self.config)?;
        cleanup_tmp(&self.state_path())?;
        let state = self.load_state()?;
        let next = reducer_fn(&state)?;
        atomic_write_json(&self.state_path(), &next)?;
        guard.release();
        Ok(next)
    }

    /// Like `update`, but runs `side_effect(&new_state)` after the
    /// reducer and before the atomic write. If the side effect fails,
    /// the state file is not touched.
    pub fn update_with_side_effect<F, S>(&self, reducer_fn: F, side_effect: S) -> Result<RelayState>
    where
        F: FnOnce(&RelayState) -> Result<RelayState>,
        S: FnOnce(&RelayState) -> Result<()>,
    {
        let mut guard = self.locks.acquire(&self.config)?;
        cleanup_tmp(&self.state_path())?;
        let state = self.load_state()?;
        let next = reducer_fn(&state)?;
        side_effect(&next)?;
        atomic_write_json(&self.state_path(), &next)?;
        guard.release();
        Ok(next)
    }

    /// Reconciles orphan exchanges, computes the new state, writes the
    /// exchange for it, then atomically persists the state. Exchange
    /// write happens-before the state write by construction.
    pub fn update_with_exchange<F, W>(&self, reducer_fn: F, exchange_write: W) -> Result<RelayState>
    where
        F: FnOnce(&RelayState) -> Result<RelayState>,
        W: FnOnce(&RelayState) -> Result<()>,
    {
        let mut guard = self.locks.acquire(&self.config)?;
        cleanup_tmp(&self.state_path())?;
        let state = self.load_state()?;
        self.reconcile_orphans(&state)?;
        let next = reducer_fn(&state)?;
        exchange_write(&next)?;
        atomic_write_json(&self.state_path(), &next)?;
        guard.release();
        Ok(next)
    }

    /// Lock-held read of the current state. Intended for callers that
    /// need a consistent snapshot alongside a pending write, not for
    /// routine display reads.
    pub fn read_locked(&self) -> Result<RelayState> {
        let mut guard = self.locks.acquire(&self.config)?;
        let state = self.load_state()?;
        guard.release();
        Ok(state)
    }

    /// Lock-held read of the state plus the latest exchange artifact,
    /// if any, as a single consistent snapshot.
    pub fn read_context(&self) -> Result<(RelayState, Option<String>)> {
        let mut guard = self.locks.acquire(&self.config)?;
        let state = self.load_state()?;
        let content = exchange_log::latest_content(&self.root, &state)?;
        guard.release();
        Ok((state, content))
    }

    /// Atomically persists an already-computed state document, used by
    /// the pulse runner's `persist_state` effect when the exchange
    /// artifact for the transition was written out-of-band (by a human
    /// or agent editing the prompted file directly) rather than by a
    /// Store transaction.
    pub fn persist(&self, state: &RelayState) -> Result<()> {
        let mut guard = self.locks.acquire(&self.config)?;
        cleanup_tmp(&self.state_path())?;
        atomic_write_json(&self.state_path(), state)?;
        guard.release();
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Deletes every exchange file whose `(task_id, iter)` can no
    /// longer be reached from `state`: a different active task, or the
    /// same task at an iteration beyond what `state` has recorded.
    /// Failures to remove are logged, not propagated — this is a
    /// best-effort correctness net, not a transactional guarantee.
    fn reconcile_orphans(&self, state: &RelayState) -> Result<()> {
        let dir = self.exchanges_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some((task_id, iter, _role)) = path_algebra::parse_exchange_filename(&name) else {
                continue;
            };
            let is_orphan = match &state.active_task_id {
                Some(active) if active == &task_id => iter > state.iteration,
                _ => true,
            };
            if is_orphan {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(file = %name, error = %e, "failed to remove orphan exchange file");
                }
            }
        }
        Ok(())
    }

    /// Reads `state.json`, attempting one recovery from `state.json.bak`
    /// if the primary document fails to parse. A successful recovery is
    /// re-persisted and logged; a failed one is fatal.
    fn load_state(&self) -> Result<RelayState> {
        let path = self.state_path();
        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<RelayState>(&content) {
            Ok(state) => Ok(state),
            Err(parse_err) => {
                warn!(error = %parse_err, "state.json failed to parse, attempting backup recovery");
                let backup = self.backup_path();
                let recovered = std::fs::read_to_string(&backup)
                    .ok()
                    .and_then(|c| serde_json::from_str::<RelayState>(&c).ok());
                match recovered {
                    Some(state) => {
                        warn!("recovered state from state.json.bak");
                        atomic_write_json(&path, &state)?;
                        Ok(state)
                    }
                    None => Err(RelayError::CorruptState(path.display().to_string())),
                }
            }
        }
    }
}

fn cleanup_tmp(state_path: &Path) -> Result<()> {
    let tmp = state_path.with_extension("json.tmp");
    if tmp.exists() {
        std::fs::remove_file(&tmp)?;
    }
    Ok(())
}

/// Writes `value` to `path.tmp` then renames over `path`. Once the
/// rename succeeds, also refreshes `path.bak` with the same content,
/// so a later parse failure of `path` can recover the last document
/// that was actually, successfully persisted.
fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    use std::io::Write as _;

    let content = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(content.as_bytes())?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;

    let backup = path.with_extension("json.bak");
    let _ = std::fs::write(&backup, &content);
    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Appends one audit-log line to `exchanges/tasks.jsonl`. Never read
/// back by the kernel; a side effect purely for external observers.
pub fn append_task_log(root: &Path, entry: &crate::model::TaskLogEntry) -> Result<()> {
    use std::io::Write as _;

    let dir = root.join(".relay").join("exchanges");
    std::fs::create_dir_all(&dir)?;
    let line = serde_json::to_string(entry)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("tasks.jsonl"))?;
    writeln!(file, "{line}")?;
    Ok(())
}
