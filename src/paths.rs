//! Expansion of user path patterns into concrete filesystem paths.
//!
//! Symbolic links are never followed: a link matches as itself, and neither
//! literal paths nor glob walks pass through a linked directory.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CacheError, Result};

/// Expands glob patterns relative to a working directory.
pub struct PathResolver {
    working_dir: PathBuf,
}

impl PathResolver {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        PathResolver {
            working_dir: working_dir.into(),
        }
    }

    /// Expand every pattern and return the union of existing matches.
    ///
    /// The result is deduplicated and sorted by raw path bytes, so the order
    /// never depends on pattern order. Zero matches is not an error.
    pub fn resolve(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let mut found: BTreeSet<OsString> = BTreeSet::new();

        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }

            let matches = self.expand(pattern)?;
            if matches.is_empty() {
                warn!(pattern, "Path pattern matched nothing");
            }
            found.extend(matches.into_iter().map(PathBuf::into_os_string));
        }

        Ok(found.into_iter().map(PathBuf::from).collect())
    }

    fn expand(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let trimmed = if pattern.len() > 1 {
            pattern.trim_end_matches('/')
        } else {
            pattern
        };
        let (base, rest) = split_pattern(trimmed);

        // An absolute base is taken as given; only links below it are checked.
        let (anchor, relative_base) = if base.is_absolute() {
            (base.clone(), PathBuf::new())
        } else {
            (self.working_dir.clone(), base.clone())
        };
        if crosses_symlink(&anchor, &relative_base) {
            debug!(pattern, "Pattern passes through a symlinked directory");
            return Ok(Vec::new());
        }

        let base_dir = self.working_dir.join(&base);
        let Some(rest) = rest else {
            return Ok(match base_dir.symlink_metadata() {
                Ok(_) => vec![base_dir],
                Err(_) => Vec::new(),
            });
        };

        // WalkDir always follows its root, so a linked root is refused here.
        if !base.as_os_str().is_empty() && is_symlink(&base_dir) {
            debug!(pattern, "Pattern base is a symlink");
            return Ok(Vec::new());
        }

        let matcher = build_matcher(pattern, &rest)?;
        let mut walker = WalkDir::new(&base_dir).follow_links(false).min_depth(1);
        if !rest.contains("**") {
            walker = walker.max_depth(rest.split('/').count());
        }

        let mut matches = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    let Ok(relative) = entry.path().strip_prefix(&base_dir) else {
                        continue;
                    };
                    if matcher.is_match(relative) {
                        matches.push(entry.into_path());
                    }
                }
                Err(e) => debug!(error = %e, "Skipping unreadable match"),
            }
        }
        Ok(matches)
    }
}

fn is_glob(part: &str) -> bool {
    part.contains(['*', '?', '[', '{'])
}

/// Split a pattern into its literal leading directories and the glob remainder.
fn split_pattern(pattern: &str) -> (PathBuf, Option<String>) {
    let mut base = PathBuf::new();
    if pattern.starts_with('/') {
        base.push("/");
    }

    let mut rest: Vec<&str> = Vec::new();
    for part in pattern.split('/') {
        if !rest.is_empty() || is_glob(part) {
            rest.push(part);
        } else if !part.is_empty() && part != "." {
            base.push(part);
        }
    }

    let rest = (!rest.is_empty()).then(|| rest.join("/"));
    (base, rest)
}

fn build_matcher(pattern: &str, glob: &str) -> Result<GlobSet> {
    let invalid = |e: globset::Error| CacheError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    };

    let glob = GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map_err(invalid)?;
    GlobSetBuilder::new().add(glob).build().map_err(invalid)
}

fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Whether any directory between `anchor` and the last component of
/// `relative` is a symlink.
fn crosses_symlink(anchor: &Path, relative: &Path) -> bool {
    let components: Vec<_> = relative.components().collect();
    let mut current = anchor.to_path_buf();
    for component in components.iter().take(components.len().saturating_sub(1)) {
        current.push(component);
        if is_symlink(&current) {
            return true;
        }
    }
    false
}
