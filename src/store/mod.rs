pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::{S3Store, StoreConfig};

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::key::CacheKey;

/// Attributes of a stored cache object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// First existing key out of a candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub key: CacheKey,
    /// The hit was the first candidate, i.e. the requested key itself
    pub is_exact_match: bool,
}

/// Key-value blob store holding cache archives
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object exists; a not-found response is `Ok(false)`
    async fn exists(&self, key: &CacheKey) -> Result<bool>;

    /// Object attributes, or `None` when it does not exist
    async fn metadata(&self, key: &CacheKey) -> Result<Option<CacheMetadata>>;

    /// Upload a local file under `key`, replacing any existing object
    async fn upload(&self, local_path: &Path, key: &CacheKey) -> Result<()>;

    /// Download `key` into a local file; a missing object is `CacheError::NotFound`
    async fn download(&self, key: &CacheKey, local_path: &Path) -> Result<()>;
}

/// Probe candidates in order and return the first that exists.
///
/// Only the first candidate counts as an exact match.
pub async fn find_first<S>(store: &S, keys: &[CacheKey]) -> Result<Option<CacheHit>>
where
    S: ObjectStore + ?Sized,
{
    for (index, key) in keys.iter().enumerate() {
        if store.exists(key).await? {
            debug!(%key, index, "Cache key found");
            return Ok(Some(CacheHit {
                key: key.clone(),
                is_exact_match: index == 0,
            }));
        }
        debug!(%key, "Cache key not found");
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<CacheKey> {
        vec![
            CacheKey::from("o/r/b/w/k1.tar.lz4"),
            CacheKey::from("o/r/b/w/k2.tar.lz4"),
            CacheKey::from("o/r/main/w/k1.tar.lz4"),
        ]
    }

    #[tokio::test]
    async fn test_find_first_exact() {
        let store = MemoryStore::new();
        store.insert(&keys()[0], b"a".to_vec());
        store.insert(&keys()[1], b"b".to_vec());

        let hit = find_first(&store, &keys()).await.unwrap().unwrap();
        assert_eq!(hit.key, keys()[0]);
        assert!(hit.is_exact_match);
        assert_eq!(store.probes(), vec![keys()[0].clone()]);
    }

    #[tokio::test]
    async fn test_find_first_fallback() {
        let store = MemoryStore::new();
        store.insert(&keys()[1], b"b".to_vec());
        store.insert(&keys()[2], b"c".to_vec());

        let hit = find_first(&store, &keys()).await.unwrap().unwrap();
        assert_eq!(hit.key, keys()[1]);
        assert!(!hit.is_exact_match);
        assert_eq!(store.probes(), keys()[..2].to_vec());
    }

    #[tokio::test]
    async fn test_find_first_miss() {
        let store = MemoryStore::new();
        assert_eq!(find_first(&store, &keys()).await.unwrap(), None);
        assert_eq!(store.probes(), keys());
    }

    #[tokio::test]
    async fn test_find_first_empty_list() {
        let store = MemoryStore::new();
        assert_eq!(find_first(&store, &[]).await.unwrap(), None);
    }
}
