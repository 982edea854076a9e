//! Source tree scanning
//!
//! Walks the requested subtrees of the source root in sorted order and
//! yields one [`SourceFile`] per regular file. Symlinks are not followed.
//! Ignored directories are pruned whole; ignored names and prefixes apply
//! to files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::errors::{ArcdError, ArcdResult, ItemFailure};
use crate::index::normalize_path;

/// A regular file found under the source root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Virtual path, relative to the source root
    pub path: String,
    pub source: PathBuf,
    pub size: u64,
    pub mode: u32,
    pub modified: i64,
}

/// Files found plus the subtrees or entries that could not be read
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Sorted by virtual path, no duplicates
    pub files: Vec<SourceFile>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    ignore_directories: Vec<String>,
    ignore_files: Vec<String>,
    ignore_prefixes: Vec<String>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore_directories: Vec::new(),
            ignore_files: Vec::new(),
            ignore_prefixes: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.source_root.clone(),
            ignore_directories: config.ignore_directories.clone(),
            ignore_files: config.ignore_files.clone(),
            ignore_prefixes: config.ignore_prefixes.clone(),
        }
    }

    /// Scan subtrees given relative to the source root
    pub fn scan(&self, subtrees: &[String]) -> ScanResult {
        let mut files = BTreeMap::new();
        let mut failures = Vec::new();

        for subtree in subtrees {
            let relative = match self.relative(subtree) {
                Ok(relative) => relative,
                Err(e) => {
                    failures.push(ItemFailure::new(subtree, &e));
                    continue;
                }
            };
            let start = if relative.is_empty() {
                self.root.clone()
            } else {
                self.root.join(&relative)
            };
            if !start.exists() {
                failures.push(ItemFailure::new(
                    subtree,
                    &ArcdError::not_found(start.display().to_string()),
                ));
                continue;
            }

            let walker = WalkDir::new(&start)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !self.is_ignored_dir(e));

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let item = e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| subtree.clone());
                        let reason = e.to_string();
                        failures.push(ItemFailure::new(
                            item,
                            &ArcdError::io_error(reason, e.into()),
                        ));
                        continue;
                    }
                };
                if !entry.file_type().is_file() || self.is_ignored_file(&entry) {
                    continue;
                }
                match self.source_file(&entry) {
                    Ok(file) => {
                        files.insert(file.path.clone(), file);
                    }
                    Err(e) => failures.push(ItemFailure::new(entry.path().display().to_string(), &e)),
                }
            }
        }

        ScanResult {
            files: files.into_values().collect(),
            failures,
        }
    }

    /// Turn a subtree argument into a virtual path below the root
    fn relative(&self, subtree: &str) -> ArcdResult<String> {
        let path = Path::new(subtree);
        let stripped = if path.is_absolute() {
            path.strip_prefix(&self.root).map_err(|_| {
                ArcdError::invalid_path(subtree, "outside the source root")
            })?
        } else {
            path
        };
        let text = stripped
            .to_str()
            .ok_or_else(|| ArcdError::invalid_path(subtree, "not valid UTF-8"))?;
        normalize_path(text)
    }

    fn is_ignored_dir(&self, entry: &DirEntry) -> bool {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.ignore_directories.iter().any(|d| d == name))
                .unwrap_or(false)
    }

    fn is_ignored_file(&self, entry: &DirEntry) -> bool {
        let Some(name) = entry.file_name().to_str() else {
            return false;
        };
        self.ignore_files.iter().any(|f| f == name)
            || self.ignore_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    fn source_file(&self, entry: &DirEntry) -> ArcdResult<SourceFile> {
        let source = entry.path();
        let relative = source
            .strip_prefix(&self.root)
            .map_err(|_| ArcdError::invalid_path(&source.display().to_string(), "outside the source root"))?;
        let text = relative
            .to_str()
            .ok_or_else(|| ArcdError::invalid_path(&source.display().to_string(), "not valid UTF-8"))?;
        let path = normalize_path(text)?;

        let metadata = entry
            .metadata()
            .map_err(|e| ArcdError::io_error(format!("Failed to stat {}", source.display()), e.into()))?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(SourceFile {
            path,
            source: source.to_path_buf(),
            size: metadata.len(),
            mode: file_mode(&metadata),
            modified,
        })
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::create_dir_all(root.join("photos/@eaDir")).unwrap();
        fs::write(root.join("docs/a.txt"), b"a").unwrap();
        fs::write(root.join("docs/deep/b.txt"), b"bb").unwrap();
        fs::write(root.join("docs/Thumbs.db"), b"x").unwrap();
        fs::write(root.join("docs/arcdiscvist-tmp"), b"x").unwrap();
        fs::write(root.join("photos/p.jpg"), b"ppp").unwrap();
        fs::write(root.join("photos/@eaDir/thumb.jpg"), b"x").unwrap();
        temp
    }

    fn scanner(root: &Path) -> Scanner {
        let mut config = Config::with_state_dir("/unused");
        config.source_root = root.to_path_buf();
        Scanner::from_config(&config)
    }

    #[test]
    fn test_scan_sorted_and_ignores_applied() {
        let temp = tree();
        let result = scanner(temp.path()).scan(&["".to_string()]);

        let paths: Vec<&str> = result.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/a.txt", "docs/deep/b.txt", "photos/p.jpg"]);
        assert!(result.failures.is_empty());
        assert_eq!(result.files[1].size, 2);
    }

    #[test]
    fn test_overlapping_subtrees_deduplicated() {
        let temp = tree();
        let result = scanner(temp.path()).scan(&["docs".to_string(), "docs/deep".to_string()]);
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_single_file_subtree() {
        let temp = tree();
        let result = scanner(temp.path()).scan(&["photos/p.jpg".to_string()]);
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].path, "photos/p.jpg");
    }

    #[test]
    fn test_missing_subtree_reported() {
        let temp = tree();
        let result = scanner(temp.path()).scan(&["nope".to_string(), "docs".to_string()]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].code, "ARCD_NOT_FOUND");
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_absolute_subtree_under_root() {
        let temp = tree();
        let absolute = temp.path().join("docs").display().to_string();
        let result = scanner(temp.path()).scan(&[absolute]);
        assert_eq!(result.files.len(), 2);
    }
}
