//! Save and restore orchestration.
//!
//! Both operations catch every error at the top and report it as
//! [`SaveOutcome::Degraded`] / [`RestoreOutcome::Degraded`]: a cache outage
//! must never fail the build that uses it.

mod restore;
mod save;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::{ArchiveTransport, CompressionFormat};
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, KeyBuilder};
use crate::manifest::{RestoreReport, VersionPolicy};
use crate::store::ObjectStore;

/// Name of the archive inside the per-invocation temp directory
const ARCHIVE_NAME: &str = "cache.tar";

/// Result of a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Archive uploaded under `key`
    Saved {
        key: CacheKey,
        format: CompressionFormat,
        entries: usize,
    },
    /// Nothing to cache; no upload happened
    Skipped { key: CacheKey, reason: String },
    /// The save failed part-way and was abandoned
    Degraded { key: CacheKey, error: String },
}

impl SaveOutcome {
    pub fn key(&self) -> &CacheKey {
        match self {
            SaveOutcome::Saved { key, .. }
            | SaveOutcome::Skipped { key, .. }
            | SaveOutcome::Degraded { key, .. } => key,
        }
    }
}

/// Result of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// An archive was found and replayed
    Hit {
        key: CacheKey,
        /// Found under the requested key rather than a fallback
        exact: bool,
        report: RestoreReport,
    },
    /// No candidate key exists
    Miss { primary: CacheKey },
    /// The restore failed part-way and was abandoned
    Degraded { primary: CacheKey, error: String },
}

impl RestoreOutcome {
    /// Value of the `cache-hit` output: true only for an exact match
    pub fn cache_hit(&self) -> bool {
        matches!(self, RestoreOutcome::Hit { exact: true, .. })
    }

    /// Key the archive was restored from
    pub fn matched_key(&self) -> Option<&CacheKey> {
        match self {
            RestoreOutcome::Hit { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Runs saves and restores against one store and working directory
pub struct CacheManager {
    store: Arc<dyn ObjectStore>,
    transport: ArchiveTransport,
    keys: KeyBuilder,
    working_dir: PathBuf,
    version_policy: VersionPolicy,
    temp_root: Option<PathBuf>,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transport: ArchiveTransport,
        keys: KeyBuilder,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        CacheManager {
            store,
            transport,
            keys,
            working_dir: working_dir.into(),
            version_policy: VersionPolicy::default(),
            temp_root: None,
        }
    }

    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Create per-invocation scratch directories under `root` instead of
    /// the system temp directory
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Scratch directory for one invocation, removed when dropped
    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        let root = self.temp_root.clone().unwrap_or_else(std::env::temp_dir);
        tempfile::Builder::new()
            .prefix("s3cache-")
            .tempdir_in(&root)
            .map_err(|e| CacheError::io("Failed to create temp directory", root, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_only_for_exact_match() {
        let key = CacheKey::from("o/r/b/w/k.tar.lz4");
        let exact = RestoreOutcome::Hit {
            key: key.clone(),
            exact: true,
            report: RestoreReport::default(),
        };
        let fallback = RestoreOutcome::Hit {
            key: key.clone(),
            exact: false,
            report: RestoreReport::default(),
        };
        let miss = RestoreOutcome::Miss {
            primary: key.clone(),
        };

        assert!(exact.cache_hit());
        assert!(!fallback.cache_hit());
        assert!(!miss.cache_hit());
        assert_eq!(fallback.matched_key(), Some(&key));
        assert_eq!(miss.matched_key(), None);
    }

    #[test]
    fn test_save_outcome_key() {
        let key = CacheKey::from("o/r/b/w/k.tar.lz4");
        let outcome = SaveOutcome::Skipped {
            key: key.clone(),
            reason: "nothing to cache".into(),
        };
        assert_eq!(outcome.key(), &key);
    }
}
