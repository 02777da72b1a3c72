//! Size-bounded, traversal-proof file reads.
//!
//! `read_safe` is the only sanctioned way to read a file that a
//! relative path pointed at from outside the trusted kernel code (e.g.
//! a path mentioned in a directive or report). It refuses to read
//! outside the project root and never hands back more than
//! `RelayConfig::safe_io_max_bytes` of content.

use std::path::Path;

use path_absolutize::Absolutize;

use crate::config::RelayConfig;
use crate::errors::{RelayError, Result};

/// Returned instead of file content when the file exceeds the size cap.
/// Callers must treat this as "do not inject this content" rather than
/// as real file data.
pub const FILE_TOO_LARGE_SENTINEL: &str = "<<ERROR: FILE_TOO_LARGE>>";

/// Resolves `rel_path` against `root`, refusing to read outside it.
///
/// Returns `Ok(None)` if the (safely resolved) path doesn't exist,
/// `Ok(Some(FILE_TOO_LARGE_SENTINEL))` if it's larger than the
/// configured cap, and `Ok(Some(content))` otherwise.
pub fn read_safe(root: &Path, rel_path: &str, config: &RelayConfig) -> Result<Option<String>> {
    let target = resolve_within_root(root, rel_path)?;
    if !target.exists() {
        return Ok(None);
    }
    let metadata = std::fs::metadata(&target)?;
    if metadata.len() > config.safe_io_max_bytes {
        return Ok(Some(FILE_TOO_LARGE_SENTINEL.to_string()));
    }
    Ok(Some(std::fs::read_to_string(&target)?))
}

/// Synchronous variant for template helpers. Semantics are identical to
/// `read_safe`; this crate has no async I/O, so the two are the same
/// function kept as separate names to match the specification's
/// "synchronous variant exists for template helpers" requirement.
pub fn read_safe_sync(root: &Path, rel_path: &str, config: &RelayConfig) -> Result<Option<String>> {
    read_safe(root, rel_path, config)
}

fn resolve_within_root(root: &Path, rel_path: &str) -> Result<std::path::PathBuf> {
    let root_abs = root
        .absolutize()
        .map_err(|e| RelayError::PathTraversal(e.to_string()))?
        .to_path_buf();
    let joined = root_abs.join(rel_path);
    let target_abs = joined
        .absolutize()
        .map_err(|e| RelayError::PathTraversal(e.to_string()))?
        .to_path_buf();

    if !target_abs.starts_with(&root_abs) {
        return Err(RelayError::PathTraversal(rel_path.to_string()));
    }
    Ok(target_abs)
}
