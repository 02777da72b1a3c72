//! Pure functions mapping `(root, task-id, iteration, role)` to exchange
//! file paths. No I/O; every function here is a total function over its
//! inputs except where the specification calls for a rejection.

use std::path::{Path, PathBuf};

use crate::errors::{RelayError, Result};
use crate::model::Role;

/// Platform basename byte cap. Exchange filenames must fit this.
const MAX_BASENAME_BYTES: usize = 255;
/// Slug is truncated to this many characters before the byte cap is
/// enforced, leaving room for the `{task_id}-{iter:03}-{role}-` prefix
/// and the `.md` suffix.
const MAX_SLUG_CHARS: usize = 172;
#[cfg(windows)]
const MAX_PATH_BYTES: usize = 259;
#[cfg(not(windows))]
const MAX_PATH_BYTES: usize = 4095;

/// Validates a task id against `^[A-Za-z0-9_-]{1,64}$`.
pub fn validate_task_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 {
        return Err(RelayError::InvalidTaskId(id.to_string()));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(RelayError::InvalidTaskId(id.to_string()));
    }
    Ok(())
}

/// Lowercases, strips non-word characters, collapses whitespace to `-`,
/// and trims leading/trailing `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_sep = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
            last_was_sep = false;
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !last_was_sep && !slug.is_empty() {
                slug.push('-');
                last_was_sep = true;
            }
        }
        // other punctuation is dropped entirely
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Builds `{task_id}-{iter:03}-{role}-{slug[:172]}.md`, truncating the
/// slug so the basename fits in 255 bytes.
pub fn exchange_filename(task_id: &str, title: &str, iteration: u32, role: Role) -> String {
    let mut slug = slugify(title);
    if slug.chars().count() > MAX_SLUG_CHARS {
        slug = slug.chars().take(MAX_SLUG_CHARS).collect();
    }
    let mut name = format!("{task_id}-{iteration:03}-{role}-{slug}.md");
    while name.len() > MAX_BASENAME_BYTES && !slug.is_empty() {
        slug.pop();
        name = format!("{task_id}-{iteration:03}-{role}-{slug}.md");
    }
    name
}

/// Joins `<root>/.relay/exchanges/<basename>`, failing if the resulting
/// path would exceed the platform path length maximum.
pub fn exchange_path(root: &Path, task_id: &str, title: &str, iteration: u32, role: Role) -> Result<PathBuf> {
    validate_task_id(task_id)?;
    let basename = exchange_filename(task_id, title, iteration, role);
    let path = root.join(".relay").join("exchanges").join(&basename);
    if path.as_os_str().len() > MAX_PATH_BYTES {
        return Err(RelayError::PathTraversal(path.display().to_string()));
    }
    Ok(path)
}

/// Parses an exchange basename back into `(task_id, iteration, role)`.
/// Returns `None` for any file that doesn't match the
/// `{task_id}-{iter:03}-{role}-{slug}.md` grammar (e.g. `tasks.jsonl`).
///
/// `task_id` (opaque, often a UUID) and `slug` may themselves contain
/// `-`, so this can't split left-to-right on the separator. Instead it
/// scans for the leftmost occurrence of the fixed-shape infix
/// `-{3 digits}-{role}-`, which only the iteration/role field can
/// produce, and splits the task id and slug around it.
pub fn parse_exchange_filename(name: &str) -> Option<(String, u32, Role)> {
    let stem = name.strip_suffix(".md")?;
    let bytes = stem.as_bytes();

    // Work in raw bytes throughout: the slug half of the infix search
    // may contain multi-byte UTF-8 characters, and slicing a `&str` at
    // an arbitrary byte offset panics unless it lands on a char
    // boundary. Byte-slice comparisons have no such constraint.
    for i in 0..bytes.len() {
        if bytes[i] != b'-' || i == 0 {
            continue;
        }
        let digits_start = i + 1;
        let digits_end = digits_start + 3;
        if digits_end > bytes.len()
            || !bytes[digits_start..digits_end].iter().all(u8::is_ascii_digit)
            || bytes.get(digits_end) != Some(&b'-')
        {
            continue;
        }
        let role_start = digits_end + 1;
        for role_str in ["architect", "engineer"] {
            let role_bytes = role_str.as_bytes();
            let role_end = role_start + role_bytes.len();
            if role_end > bytes.len()
                || &bytes[role_start..role_end] != role_bytes
                || bytes.get(role_end) != Some(&b'-')
            {
                continue;
            }
            // `i` indexes an ASCII `-`, which is always a char boundary.
            let task_id = stem[..i].to_string();
            let iteration: u32 = std::str::from_utf8(&bytes[digits_start..digits_end])
                .ok()?
                .parse()
                .ok()?;
            let role = Role::from_str_opt(role_str)?;
            return Some((task_id, iteration, role));
        }
    }
    None
}
