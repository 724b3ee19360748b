//! Node path helpers.
//!
//! Paths follow the coordination store's rules: absolute, `/`-separated, no
//! empty, `.` or `..` components and no trailing slash except for the root.

use crate::error::{RegistryError, RegistryResult};

/// Width of the zero-padded counter the store appends to sequential nodes.
pub const SEQUENCE_WIDTH: usize = 10;

/// Check that `path` is a legal absolute node path.
pub fn validate(path: &str) -> RegistryResult<()> {
    let invalid = |reason: &str| Err(RegistryError::InvalidPath(format!("'{path}' {reason}")));

    if !path.starts_with('/') {
        return invalid("must start with '/'");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("must not end with '/'");
    }
    if path.contains('\0') {
        return invalid("must not contain a null character");
    }
    for component in path[1..].split('/') {
        match component {
            "" => return invalid("contains an empty component"),
            "." | ".." => return invalid("contains a relative component"),
            _ => {}
        }
    }
    Ok(())
}

/// Join a child name onto a parent path.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of `path`, `/` for top-level nodes.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last component of `path`.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Every non-root prefix of `path`, shortest first, ending with `path` itself.
///
/// `"/a/b/c"` yields `["/a", "/a/b", "/a/b/c"]`.
pub fn ancestors(path: &str) -> Vec<&str> {
    if path == "/" {
        return Vec::new();
    }
    path.match_indices('/')
        .skip(1)
        .map(|(idx, _)| &path[..idx])
        .chain(std::iter::once(path))
        .collect()
}

/// Name the store gives a sequential node created as `base` with counter `seq`.
pub fn sequential_name(base: &str, seq: u64) -> String {
    format!("{base}{seq:0width$}", width = SEQUENCE_WIDTH)
}

/// Sequence number of a node called `name` created with `prefix`, if the name
/// has that shape.
pub fn sequence(name: &str, prefix: &str) -> Option<u64> {
    let digits = name.strip_prefix(prefix)?;
    if digits.len() != SEQUENCE_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
