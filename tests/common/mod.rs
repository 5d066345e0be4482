//! Shared helpers for cache flow tests.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use s3cache::archive::{ArchiveTransport, CompressionFormat, Compressor};
use s3cache::error::{CacheError, Result};
use s3cache::key::{CacheKey, Context, KeyBuilder};
use s3cache::store::{CacheMetadata, MemoryStore, ObjectStore};
use s3cache::CacheManager;

/// Gzip tar written in-process with the `tar` and `flate2` crates
pub struct InProcessGzip;

#[async_trait]
impl Compressor for InProcessGzip {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Gzip
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn pack(&self, list_file: &Path, output: &Path, working_dir: &Path) -> Result<()> {
        let list = std::fs::read_to_string(list_file)
            .map_err(|e| CacheError::io("read list", list_file, e))?;
        let file = File::create(output).map_err(|e| CacheError::io("create", output, e))?;

        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::fast()));
        builder.follow_symlinks(false);
        for member in list.split('\0').filter(|l| !l.is_empty()) {
            let full = working_dir.join(member);
            let result = if full.is_dir() {
                builder.append_dir_all(member, &full)
            } else {
                builder.append_path_with_name(&full, member)
            };
            result.map_err(|e| CacheError::io("append", &full, e))?;
        }
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(|e| CacheError::io("finish", output, e))?;
        Ok(())
    }

    async fn unpack(&self, archive: &Path, target_dir: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| CacheError::io("open", archive, e))?;
        tar::Archive::new(GzDecoder::new(file))
            .unpack(target_dir)
            .map_err(|e| CacheError::io("unpack", target_dir, e))
    }
}

/// Fast compressor whose tooling is never installed
pub struct MissingLz4;

#[async_trait]
impl Compressor for MissingLz4 {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Lz4
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn pack(&self, _list_file: &Path, _output: &Path, _working_dir: &Path) -> Result<()> {
        unreachable!("unavailable compressor used for packing")
    }

    async fn unpack(&self, _archive: &Path, _target_dir: &Path) -> Result<()> {
        unreachable!("unavailable compressor used for unpacking")
    }
}

/// Store whose every call fails with a non-404 error
pub struct BrokenStore;

#[async_trait]
impl ObjectStore for BrokenStore {
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Err(broken("head", key))
    }

    async fn metadata(&self, key: &CacheKey) -> Result<Option<CacheMetadata>> {
        Err(broken("head", key))
    }

    async fn upload(&self, _local_path: &Path, key: &CacheKey) -> Result<()> {
        Err(broken("upload", key))
    }

    async fn download(&self, key: &CacheKey, _local_path: &Path) -> Result<()> {
        Err(broken("download", key))
    }
}

fn broken(operation: &'static str, key: &CacheKey) -> CacheError {
    CacheError::Store {
        operation,
        key: key.to_string(),
        message: "503 Service Unavailable".to_string(),
    }
}

pub fn transport() -> ArchiveTransport {
    ArchiveTransport::new(Arc::new(MissingLz4), Arc::new(InProcessGzip))
}

pub fn context(branch: &str) -> Context {
    Context::new("myorg", "myrepo", branch, "CI")
}

pub fn manager(store: Arc<dyn ObjectStore>, branch: &str, working_dir: &Path) -> CacheManager {
    CacheManager::new(store, transport(), KeyBuilder::new(context(branch)), working_dir)
}

pub fn memory_manager(store: &MemoryStore, branch: &str, working_dir: &Path) -> CacheManager {
    manager(Arc::new(store.clone()), branch, working_dir)
}

/// Write `files` (relative path, contents) under `root`
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, contents).unwrap();
    }
}

/// Unpack a stored archive body into a fresh directory
pub fn unpack_bytes(body: &[u8]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    tar::Archive::new(GzDecoder::new(body))
        .unpack(dir.path())
        .unwrap();
    dir
}

/// Pack `members` of `root` into gzip tar bytes
pub fn pack_bytes(root: &Path, members: &[&str]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for member in members {
        let full: PathBuf = root.join(member);
        if full.is_dir() {
            builder.append_dir_all(member, &full).unwrap();
        } else {
            builder.append_path_with_name(&full, member).unwrap();
        }
    }
    builder.into_inner().unwrap().finish().unwrap()
}
