use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{ARCHIVE_NAME, CacheManager, SaveOutcome};
use crate::error::Result;
use crate::key::CacheKey;
use crate::manifest::{Manifest, ManifestFile};
use crate::paths::PathResolver;

/// Filesystem half of a save, prepared off the async runtime
enum Prepared {
    Skip(&'static str),
    Ready(Manifest, ManifestFile),
}

impl CacheManager {
    /// Archive the paths matched by `patterns` and upload them under the key
    /// built from `template`. Never fails; see [`SaveOutcome`].
    pub async fn save(&self, template: &str, patterns: &[String]) -> SaveOutcome {
        let key = self.keys.build(template);
        info!(%key, "Saving cache");

        match self.try_save(&key, patterns).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%key, error = %e, "Failed to save cache");
                SaveOutcome::Degraded {
                    key,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_save(&self, key: &CacheKey, patterns: &[String]) -> Result<SaveOutcome> {
        let working_dir = self.working_dir.clone();
        let patterns = patterns.to_vec();
        let cache_key = key.unsuffixed().to_string();
        let prepared =
            tokio::task::spawn_blocking(move || prepare(&cache_key, &patterns, &working_dir))
                .await??;

        // The manifest guard and the scratch dir clean up on every return path below.
        let (manifest, _manifest_file) = match prepared {
            Prepared::Skip(reason) => {
                warn!(%key, reason, "Nothing to cache, skipping save");
                return Ok(SaveOutcome::Skipped {
                    key: key.clone(),
                    reason: reason.to_string(),
                });
            }
            Prepared::Ready(manifest, file) => (manifest, file),
        };
        let scratch = self.scratch_dir()?;

        let archive = scratch.path().join(ARCHIVE_NAME);
        let format = self
            .transport
            .create(&manifest.archive_members(), &archive, &self.working_dir)
            .await?;

        self.store.upload(&archive, key).await?;

        info!(%key, %format, entries = manifest.entries.len(), "Cache saved");
        Ok(SaveOutcome::Saved {
            key: key.clone(),
            format,
            entries: manifest.entries.len(),
        })
    }
}

fn prepare(cache_key: &str, patterns: &[String], working_dir: &Path) -> Result<Prepared> {
    let resolved = PathResolver::new(working_dir).resolve(patterns)?;
    let existing: Vec<PathBuf> = resolved
        .into_iter()
        .filter(|p| p.symlink_metadata().is_ok())
        .collect();
    if existing.is_empty() {
        return Ok(Prepared::Skip("no matching paths exist"));
    }

    let manifest = Manifest::create(cache_key, &existing, working_dir);
    if manifest.entries.is_empty() {
        return Ok(Prepared::Skip("no paths inside the working directory"));
    }

    let file = manifest.persist(working_dir)?;
    Ok(Prepared::Ready(manifest, file))
}
