//! Glob patterns over virtual paths
//!
//! `*` matches any run of characters within one component and `?` exactly
//! one character; neither crosses a `/`. A pattern containing `/` is
//! anchored to the full path, otherwise it is matched against the basename.

use regex::Regex;

use super::path::{basename, normalize_path};
use crate::errors::{ArcdError, ArcdResult};

/// A compiled glob
#[derive(Debug, Clone)]
pub struct GlobPattern {
    regex: Regex,
    whole_path: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> ArcdResult<Self> {
        let whole_path = pattern.contains('/');
        let pattern = if whole_path {
            normalize_path(pattern)?
        } else {
            pattern.to_string()
        };

        let mut source = String::with_capacity(pattern.len() * 2 + 2);
        source.push('^');
        for c in pattern.chars() {
            match c {
                '*' => source.push_str("[^/]*"),
                '?' => source.push_str("[^/]"),
                c => source.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
            }
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| ArcdError::invalid_path(&pattern, &format!("bad pattern: {}", e)))?;
        Ok(Self { regex, whole_path })
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.whole_path {
            self.regex.is_match(path)
        } else {
            self.regex.is_match(basename(path))
        }
    }
}
