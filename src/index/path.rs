//! Virtual path normalization
//!
//! Virtual paths are `/`-separated, relative to the archive root, with no
//! leading or trailing separator, no empty or `.` components and no `..`.
//! The empty string is the root.

use crate::errors::{ArcdError, ArcdResult};

/// Normalize a virtual path
pub fn normalize_path(path: &str) -> ArcdResult<String> {
    let mut components = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(ArcdError::invalid_path(path, "parent references are not allowed")),
            c if c.contains('\0') => {
                return Err(ArcdError::invalid_path(path, "contains a NUL byte"))
            }
            c => components.push(c),
        }
    }
    Ok(components.join("/"))
}

/// Final component of a normalized path
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether `path` is `dir` or lies below it
pub fn is_within(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path("/docs//a.txt").unwrap(), "docs/a.txt");
        assert_eq!(normalize_path("./docs/./a.txt/").unwrap(), "docs/a.txt");
        assert_eq!(normalize_path("/").unwrap(), "");
        assert_eq!(normalize_path("").unwrap(), "");
    }

    #[test]
    fn test_parent_reference_rejected() {
        let err = normalize_path("docs/../../etc/passwd").unwrap_err();
        assert_eq!(err.code(), crate::errors::ArcdErrorCode::InvalidPath);
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("docs/a.txt", "docs"));
        assert!(is_within("docs", "docs"));
        assert!(is_within("anything", ""));
        assert!(!is_within("docsx/a.txt", "docs"));
        assert!(!is_within("doc", "docs"));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("docs/a.txt"), "a.txt");
        assert_eq!(basename("a.txt"), "a.txt");
    }
}
