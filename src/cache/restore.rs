use tracing::{debug, info, warn};

use super::{ARCHIVE_NAME, CacheManager, RestoreOutcome};
use crate::error::Result;
use crate::key::CacheKey;
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::store::find_first;

impl CacheManager {
    /// Find the best archive for `template` (falling back through
    /// `restore_keys` and the default branch) and replay it onto the working
    /// directory. Never fails; see [`RestoreOutcome`].
    pub async fn restore(&self, template: &str, restore_keys: &[String]) -> RestoreOutcome {
        let primary = self.keys.build(template);
        info!(key = %primary, "Restoring cache");

        match self.try_restore(&primary, restore_keys).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(key = %primary, error = %e, "Failed to restore cache");
                RestoreOutcome::Degraded {
                    primary,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_restore(
        &self,
        primary: &CacheKey,
        restore_keys: &[String],
    ) -> Result<RestoreOutcome> {
        let candidates = self.keys.fallback_keys(primary, restore_keys);
        let names: Vec<&str> = candidates.iter().map(CacheKey::as_str).collect();
        debug!(candidates = ?names, "Probing cache keys");

        let Some(hit) = find_first(self.store.as_ref(), &candidates).await? else {
            info!(key = %primary, "Cache not found");
            return Ok(RestoreOutcome::Miss {
                primary: primary.clone(),
            });
        };

        info!(key = %hit.key, exact = hit.is_exact_match, "Cache found");
        self.log_metadata(&hit.key).await;

        let scratch = self.scratch_dir()?;
        let archive = scratch.path().join(ARCHIVE_NAME);
        self.store.download(&hit.key, &archive).await?;

        let extracted = scratch.path().join("extracted");
        self.transport.extract(&archive, &extracted).await?;

        let target = self.working_dir.clone();
        let policy = self.version_policy;
        let cache_key = hit.key.unsuffixed().to_string();
        let report = tokio::task::spawn_blocking(move || -> Result<_> {
            let manifest = if extracted.join(MANIFEST_FILE).exists() {
                Manifest::load(&extracted, policy)?
            } else {
                warn!("Archive has no manifest, restoring its whole tree");
                Manifest::from_extracted_tree(&cache_key, &extracted)?
            };
            Ok(manifest.restore(&extracted, &target))
        })
        .await??;

        Ok(RestoreOutcome::Hit {
            key: hit.key,
            exact: hit.is_exact_match,
            report,
        })
    }

    async fn log_metadata(&self, key: &CacheKey) {
        match self.store.metadata(key).await {
            Ok(Some(meta)) => info!(
                %key,
                size = meta.size,
                last_modified = ?meta.last_modified,
                "Cache archive details"
            ),
            Ok(None) => debug!(%key, "Cache archive vanished before metadata lookup"),
            Err(e) => debug!(%key, error = %e, "Could not read cache archive metadata"),
        }
    }
}
