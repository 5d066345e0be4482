//! In-process object store.
//!
//! Keeps objects in a map and records every existence probe, which makes the
//! candidate order of a restore observable.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{CacheMetadata, ObjectStore};
use crate::error::{CacheError, Result};
use crate::key::CacheKey;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    last_modified: DateTime<Utc>,
}

/// Object store backed by a shared in-memory map
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    probes: Arc<RwLock<Vec<CacheKey>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object directly
    pub fn insert(&self, key: &CacheKey, body: impl Into<Bytes>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                key.as_str().to_string(),
                StoredObject {
                    body: body.into(),
                    last_modified: Utc::now(),
                },
            );
        }
    }

    /// Body of a stored object
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let objects = self.objects.read().ok()?;
        objects.get(key.as_str()).map(|o| o.body.clone())
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Keys passed to `exists`, in call order
    pub fn probes(&self) -> Vec<CacheKey> {
        self.probes.read().map(|p| p.clone()).unwrap_or_default()
    }

    fn lookup(&self, key: &CacheKey) -> Option<StoredObject> {
        self.objects.read().ok()?.get(key.as_str()).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        if let Ok(mut probes) = self.probes.write() {
            probes.push(key.clone());
        }
        Ok(self.lookup(key).is_some())
    }

    async fn metadata(&self, key: &CacheKey) -> Result<Option<CacheMetadata>> {
        Ok(self.lookup(key).map(|o| CacheMetadata {
            size: o.body.len() as u64,
            last_modified: Some(o.last_modified),
        }))
    }

    async fn upload(&self, local_path: &Path, key: &CacheKey) -> Result<()> {
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| CacheError::io("Failed to read upload source", local_path, e))?;
        self.insert(key, body);
        Ok(())
    }

    async fn download(&self, key: &CacheKey, local_path: &Path) -> Result<()> {
        let object = self.lookup(key).ok_or_else(|| CacheError::NotFound {
            key: key.to_string(),
        })?;
        tokio::fs::write(local_path, &object.body)
            .await
            .map_err(|e| CacheError::io("Failed to write download", local_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download() {
        let store = MemoryStore::new();
        let key = CacheKey::from("o/r/b/w/k.tar.lz4");
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"payload").unwrap();

        store.upload(&src, &key).await.unwrap();
        assert!(store.exists(&key).await.unwrap());

        let meta = store.metadata(&key).await.unwrap().unwrap();
        assert_eq!(meta.size, 7);
        assert!(meta.last_modified.is_some());

        let dst = dir.path().join("dst");
        store.download(&key, &dst).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryStore::new();
        let key = CacheKey::from("missing");
        let dir = tempfile::tempdir().unwrap();

        assert!(!store.exists(&key).await.unwrap());
        assert_eq!(store.metadata(&key).await.unwrap(), None);
        let err = store
            .download(&key, &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
