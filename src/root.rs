//! Project root discovery: walk ancestor directories looking for a
//! `.relay/` directory, stopping at the filesystem root or the user's
//! home directory, whichever is hit first. Stopping at `$HOME` means a
//! workspace that happens to be (or be under) the user's home
//! directory never silently matches some unrelated global `.relay/`.

use std::path::{Path, PathBuf};

use crate::errors::{RelayError, Result};

/// Searches `start` and its ancestors for a directory containing
/// `.relay/`. Returns the first such ancestor.
pub fn discover(start: &Path) -> Result<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut current = std::path::absolute(start)?;

    loop {
        if current.join(".relay").is_dir() {
            return Ok(current);
        }
        if let Some(home) = &home {
            if &current == home {
                break;
            }
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    Err(RelayError::ProjectNotFound)
}
