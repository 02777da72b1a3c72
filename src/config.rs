//! Tunables for the lock manager, the pulse runner, and safe I/O.
//!
//! `RelayConfig` mirrors the defaults in the specification; none of
//! these are required to be set. Loaded from `.relay/config.toml` if
//! present, else `RelayConfig::default()`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, Result};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RelayConfig {
    /// Lock mtime age after which a non-refreshed lock is considered stale.
    pub lock_stale_secs: u64,
    /// How often the lock holder refreshes its mtime while held.
    pub lock_refresh_secs: u64,
    /// Cap on exponential backoff between lock acquisition retries.
    pub lock_retry_cap_ms: u64,
    /// Default deadline for a single `acquire` call.
    pub lock_timeout_ms: u64,
    /// Safe-I/O size cap in bytes; larger files return the sentinel.
    pub safe_io_max_bytes: u64,
    /// Polling fallback interval when filesystem notifications are unavailable.
    pub poll_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            lock_stale_secs: 30,
            lock_refresh_secs: 5,
            lock_retry_cap_ms: 2_000,
            lock_timeout_ms: 5_000,
            safe_io_max_bytes: 50 * 1024,
            poll_interval_ms: 1_000,
        }
    }
}

impl RelayConfig {
    /// Load `<root>/.relay/config.toml`, falling back to defaults if absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(".relay").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| RelayError::Config(e.to_string()))
    }

    pub fn lock_stale(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    pub fn lock_refresh(&self) -> Duration {
        Duration::from_secs(self.lock_refresh_secs)
    }

    pub fn lock_retry_cap(&self) -> Duration {
        Duration::from_millis(self.lock_retry_cap_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
