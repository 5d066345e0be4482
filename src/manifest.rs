//! Cache manifest: records where each archived entry came from so a restore
//! can put it back.
//!
//! The manifest is written next to the cached paths as [`MANIFEST_FILE`],
//! archived with them, and read back from the extracted tree on restore.
//! Every path in it is relative to the working directory of the save.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CacheError, Result};

/// Manifest filename at the archive root.
pub const MANIFEST_FILE: &str = "cache-manifest.json";

/// Schema version written by this crate.
pub const MANIFEST_VERSION: &str = "1.0";

/// How to treat a manifest written with a different schema version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Warn and continue. Older schemas have stayed compatible so far.
    #[default]
    Lenient,
    /// Reject the manifest.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub original_path: PathBuf,
    pub archived_path: PathBuf,
    pub is_directory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    /// Key without its extension.
    pub cache_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "paths")]
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest for resolved paths.
    ///
    /// Absolute paths are made relative to `working_dir` here, once. A path
    /// that cannot be stat'ed is still recorded, as a plain file. Paths outside
    /// the working directory are dropped with a warning.
    pub fn create(cache_key: &str, paths: &[PathBuf], working_dir: &Path) -> Self {
        let mut entries = Vec::with_capacity(paths.len());

        for path in paths {
            let Some(relative) = relative_to(path, working_dir) else {
                warn!(
                    path = %path.display(),
                    working_dir = %working_dir.display(),
                    "Path is outside the working directory, not caching it"
                );
                continue;
            };

            let is_directory = match fs::symlink_metadata(working_dir.join(&relative)) {
                Ok(meta) => meta.is_dir(),
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "Could not stat cached path");
                    false
                }
            };

            entries.push(ManifestEntry {
                original_path: relative.clone(),
                archived_path: relative,
                is_directory,
            });
        }

        Manifest {
            version: MANIFEST_VERSION.to_string(),
            cache_key: cache_key.to_string(),
            created_at: Utc::now(),
            entries,
        }
    }

    /// Describe an extracted archive that carries no manifest: every
    /// top-level item maps onto the same name in the target.
    pub fn from_extracted_tree(cache_key: &str, extracted_dir: &Path) -> Result<Self> {
        let read_dir = fs::read_dir(extracted_dir)
            .map_err(|e| CacheError::io("Failed to read extracted archive", extracted_dir, e))?;

        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| {
                CacheError::io("Failed to read extracted archive", extracted_dir, e)
            })?;
            let name = PathBuf::from(item.file_name());
            let is_directory = item.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(ManifestEntry {
                original_path: name.clone(),
                archived_path: name,
                is_directory,
            });
        }
        entries.sort_by(|a, b| a.original_path.cmp(&b.original_path));

        Ok(Manifest {
            version: MANIFEST_VERSION.to_string(),
            cache_key: cache_key.to_string(),
            created_at: Utc::now(),
            entries,
        })
    }

    /// Paths to hand to the archiver, relative to the working directory.
    pub fn archive_members(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .map(|e| e.archived_path.clone())
            .chain(std::iter::once(PathBuf::from(MANIFEST_FILE)))
            .collect()
    }

    /// Write the manifest as [`MANIFEST_FILE`] inside `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&path, json).map_err(|e| CacheError::io("Failed to write manifest", &path, e))?;
        debug!(path = %path.display(), entries = self.entries.len(), "Wrote manifest");
        Ok(path)
    }

    /// Write the manifest and return a guard that deletes it when dropped.
    pub fn persist(&self, dir: &Path) -> Result<ManifestFile> {
        let path = self.save(dir)?;
        Ok(ManifestFile { path })
    }

    /// Read [`MANIFEST_FILE`] from `dir`.
    pub fn load(dir: &Path, policy: VersionPolicy) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let bytes =
            fs::read(&path).map_err(|e| CacheError::io("Failed to read manifest", &path, e))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)?;

        if manifest.version != MANIFEST_VERSION {
            match policy {
                VersionPolicy::Lenient => warn!(
                    expected = MANIFEST_VERSION,
                    found = %manifest.version,
                    "Manifest version mismatch, continuing"
                ),
                VersionPolicy::Strict => {
                    return Err(CacheError::ManifestVersion {
                        expected: MANIFEST_VERSION.to_string(),
                        found: manifest.version,
                    });
                }
            }
        }

        Ok(manifest)
    }

    /// Copy every entry from `extracted_dir` back to its original location
    /// under `target_dir`.
    ///
    /// Entries are independent: a missing source is skipped and a failed copy
    /// is recorded, and neither stops the remaining entries.
    pub fn restore(&self, extracted_dir: &Path, target_dir: &Path) -> RestoreReport {
        let mut report = RestoreReport::default();

        for entry in &self.entries {
            match restore_entry(entry, extracted_dir, target_dir) {
                Ok(EntryOutcome::Restored) => report.restored.push(entry.original_path.clone()),
                Ok(EntryOutcome::Missing) => {
                    warn!(
                        path = %entry.archived_path.display(),
                        "Archived path not found in cache, skipping"
                    );
                    report.skipped.push(entry.original_path.clone());
                }
                Err(e) => {
                    warn!(
                        path = %entry.original_path.display(),
                        error = %e,
                        "Failed to restore path"
                    );
                    report
                        .failed
                        .push((entry.original_path.clone(), e.to_string()));
                }
            }
        }

        info!(
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Restored cache entries"
        );
        report
    }
}

/// A manifest written into the working directory, removed on drop.
#[derive(Debug)]
pub struct ManifestFile {
    path: PathBuf,
}

impl ManifestFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove manifest"),
        }
    }
}

/// Per-entry results of a manifest replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RestoreReport {
    /// True when no entry was skipped or failed.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

enum EntryOutcome {
    Restored,
    Missing,
}

fn restore_entry(
    entry: &ManifestEntry,
    extracted_dir: &Path,
    target_dir: &Path,
) -> Result<EntryOutcome> {
    for path in [&entry.archived_path, &entry.original_path] {
        if !is_contained(path) {
            return Err(CacheError::io(
                "Refusing to restore path outside the target",
                path,
                ErrorKind::InvalidInput.into(),
            ));
        }
    }

    let source = extracted_dir.join(&entry.archived_path);
    if fs::symlink_metadata(&source).is_err() {
        return Ok(EntryOutcome::Missing);
    }

    let dest = target_dir.join(&entry.original_path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CacheError::io("Failed to create parent directory", parent, e))?;
    }

    if entry.is_directory {
        copy_dir_merge(&source, &dest)?;
    } else {
        copy_file(&source, &dest)?;
    }
    debug!(path = %entry.original_path.display(), "Restored");
    Ok(EntryOutcome::Restored)
}

/// Recursively copy `source` into `dest`, keeping anything already in `dest`.
fn copy_dir_merge(source: &Path, dest: &Path) -> Result<()> {
    for item in WalkDir::new(source).follow_links(false) {
        let item = item.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            CacheError::io("Failed to walk cached directory", path, e.into())
        })?;

        let relative = item.path().strip_prefix(source).unwrap_or(item.path());
        let target = dest.join(relative);
        let file_type = item.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| CacheError::io("Failed to create directory", &target, e))?;
        } else {
            copy_file(item.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy one file, overwriting `dest`. Symlinks are recreated, not followed.
fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source)
        .map_err(|e| CacheError::io("Failed to stat cached file", source, e))?;

    if meta.file_type().is_symlink() {
        return copy_symlink(source, dest);
    }

    fs::copy(source, dest).map_err(|e| CacheError::io("Failed to copy file", dest, e))?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> Result<()> {
    let link =
        fs::read_link(source).map_err(|e| CacheError::io("Failed to read symlink", source, e))?;
    if let Ok(existing) = fs::symlink_metadata(dest) {
        if existing.is_dir() {
            fs::remove_dir_all(dest)
        } else {
            fs::remove_file(dest)
        }
        .map_err(|e| CacheError::io("Failed to replace existing path", dest, e))?;
    }
    std::os::unix::fs::symlink(&link, dest)
        .map_err(|e| CacheError::io("Failed to create symlink", dest, e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest).map_err(|e| CacheError::io("Failed to copy file", dest, e))?;
    Ok(())
}

/// Express `path` relative to `working_dir`, or `None` if it lies outside.
fn relative_to(path: &Path, working_dir: &Path) -> Option<PathBuf> {
    let relative = if path.is_absolute() {
        path.strip_prefix(working_dir).ok()?
    } else {
        path
    };

    let normalized: PathBuf = relative
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    if normalized.as_os_str().is_empty() || !is_contained(&normalized) {
        return None;
    }
    Some(normalized)
}

/// A relative path with no `..` that cannot climb out of its base.
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out/sub")).unwrap();
        fs::write(dir.path().join("out/sub/a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("out/b.txt"), b"bravo").unwrap();
        fs::write(dir.path().join("Cargo.lock"), b"lock").unwrap();
        dir
    }

    #[test]
    fn test_create_normalizes_absolute_and_relative_paths() {
        let ws = workspace();
        let paths = vec![ws.path().join("out"), PathBuf::from("./Cargo.lock")];
        let manifest = Manifest::create("o/r/b/w/k", &paths, ws.path());

        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.cache_key, "o/r/b/w/k");
        assert_eq!(
            manifest.entries,
            vec![
                ManifestEntry {
                    original_path: PathBuf::from("out"),
                    archived_path: PathBuf::from("out"),
                    is_directory: true,
                },
                ManifestEntry {
                    original_path: PathBuf::from("Cargo.lock"),
                    archived_path: PathBuf::from("Cargo.lock"),
                    is_directory: false,
                },
            ]
        );
    }

    #[test]
    fn test_create_keeps_unstatable_path_as_file() {
        let ws = workspace();
        let manifest = Manifest::create("k", &[ws.path().join("gone")], ws.path());
        assert_eq!(manifest.entries.len(), 1);
        assert!(!manifest.entries[0].is_directory);
    }

    #[test]
    fn test_create_drops_paths_outside_working_dir() {
        let ws = workspace();
        let other = tempfile::tempdir().unwrap();
        let paths = vec![other.path().to_path_buf(), PathBuf::from("../escape")];
        let manifest = Manifest::create("k", &paths, ws.path());
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn test_archive_members_include_manifest() {
        let ws = workspace();
        let manifest = Manifest::create("k", &[ws.path().join("out")], ws.path());
        assert_eq!(
            manifest.archive_members(),
            vec![PathBuf::from("out"), PathBuf::from(MANIFEST_FILE)]
        );
    }

    #[test]
    fn test_save_load_roundtrip() {
        let ws = workspace();
        let manifest = Manifest::create(
            "k",
            &[ws.path().join("out"), ws.path().join("Cargo.lock")],
            ws.path(),
        );
        manifest.save(ws.path()).unwrap();
        let loaded = Manifest::load(ws.path(), VersionPolicy::Lenient).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_json_shape() {
        let ws = workspace();
        let manifest = Manifest::create("o/r/b/w/k", &[ws.path().join("out")], ws.path());
        let value: serde_json::Value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["cacheKey"], "o/r/b/w/k");
        assert!(value["createdAt"].is_string());
        assert_eq!(value["paths"][0]["originalPath"], "out");
        assert_eq!(value["paths"][0]["archivedPath"], "out");
        assert_eq!(value["paths"][0]["isDirectory"], true);
    }

    #[test]
    fn test_version_mismatch_policy() {
        let ws = workspace();
        let mut manifest = Manifest::create("k", &[], ws.path());
        manifest.version = "0.9".to_string();
        manifest.save(ws.path()).unwrap();

        let loaded = Manifest::load(ws.path(), VersionPolicy::Lenient).unwrap();
        assert_eq!(loaded.version, "0.9");

        let err = Manifest::load(ws.path(), VersionPolicy::Strict).unwrap_err();
        assert!(matches!(err, CacheError::ManifestVersion { .. }));
    }

    #[test]
    fn test_persisted_manifest_removed_on_drop() {
        let ws = workspace();
        let manifest = Manifest::create("k", &[], ws.path());
        let guard = manifest.persist(ws.path()).unwrap();
        assert!(guard.path().exists());
        drop(guard);
        assert!(!ws.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_restore_files_and_directories() {
        let ws = workspace();
        let manifest = Manifest::create(
            "k",
            &[ws.path().join("out"), ws.path().join("Cargo.lock")],
            ws.path(),
        );

        let target = tempfile::tempdir().unwrap();
        let report = manifest.restore(ws.path(), target.path());

        assert!(report.is_complete());
        assert_eq!(report.restored.len(), 2);
        assert_eq!(fs::read(target.path().join("out/sub/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(target.path().join("out/b.txt")).unwrap(), b"bravo");
        assert_eq!(fs::read(target.path().join("Cargo.lock")).unwrap(), b"lock");
    }

    #[test]
    fn test_restore_merges_into_existing_directory() {
        let ws = workspace();
        let manifest = Manifest::create("k", &[ws.path().join("out")], ws.path());

        let target = tempfile::tempdir().unwrap();
        fs::create_dir_all(target.path().join("out")).unwrap();
        fs::write(target.path().join("out/local.txt"), b"keep").unwrap();
        fs::write(target.path().join("out/b.txt"), b"stale").unwrap();

        manifest.restore(ws.path(), target.path());

        assert_eq!(fs::read(target.path().join("out/local.txt")).unwrap(), b"keep");
        assert_eq!(fs::read(target.path().join("out/b.txt")).unwrap(), b"bravo");
    }

    #[test]
    fn test_restore_is_idempotent() {
        let ws = workspace();
        let manifest = Manifest::create(
            "k",
            &[ws.path().join("out"), ws.path().join("Cargo.lock")],
            ws.path(),
        );
        let target = tempfile::tempdir().unwrap();

        let first = manifest.restore(ws.path(), target.path());
        let before = snapshot(target.path());
        let second = manifest.restore(ws.path(), target.path());

        assert_eq!(first, second);
        assert_eq!(before, snapshot(target.path()));
    }

    #[test]
    fn test_restore_skips_missing_and_continues() {
        let ws = workspace();
        let mut manifest = Manifest::create(
            "k",
            &[ws.path().join("Cargo.lock"), ws.path().join("out")],
            ws.path(),
        );
        manifest.entries.insert(
            0,
            ManifestEntry {
                original_path: PathBuf::from("missing.bin"),
                archived_path: PathBuf::from("missing.bin"),
                is_directory: false,
            },
        );

        let target = tempfile::tempdir().unwrap();
        let report = manifest.restore(ws.path(), target.path());

        assert_eq!(report.skipped, vec![PathBuf::from("missing.bin")]);
        assert_eq!(report.restored.len(), 2);
        assert!(report.failed.is_empty());
        assert!(target.path().join("out/sub/a.txt").exists());
    }

    #[test]
    fn test_restore_rejects_escaping_entries() {
        let ws = workspace();
        let mut manifest = Manifest::create("k", &[ws.path().join("Cargo.lock")], ws.path());
        manifest.entries.push(ManifestEntry {
            original_path: PathBuf::from("../../etc/passwd"),
            archived_path: PathBuf::from("Cargo.lock"),
            is_directory: false,
        });

        let target = tempfile::tempdir().unwrap();
        let report = manifest.restore(ws.path(), target.path());

        assert_eq!(report.restored, vec![PathBuf::from("Cargo.lock")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, PathBuf::from("../../etc/passwd"));
    }

    #[test]
    fn test_directory_flagged_as_file_fails_alone() {
        let ws = workspace();
        let mut manifest = Manifest::create(
            "k",
            &[ws.path().join("out"), ws.path().join("Cargo.lock")],
            ws.path(),
        );
        manifest.entries[0].is_directory = false;

        let target = tempfile::tempdir().unwrap();
        let report = manifest.restore(ws.path(), target.path());

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.restored, vec![PathBuf::from("Cargo.lock")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_recreates_symlinks() {
        let ws = workspace();
        std::os::unix::fs::symlink("sub/a.txt", ws.path().join("out/link")).unwrap();
        let manifest = Manifest::create("k", &[ws.path().join("out")], ws.path());

        let target = tempfile::tempdir().unwrap();
        manifest.restore(ws.path(), target.path());
        manifest.restore(ws.path(), target.path());

        let link = target.path().join("out/link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("sub/a.txt"));
        assert_eq!(fs::read(&link).unwrap(), b"alpha");
    }

    #[test]
    fn test_from_extracted_tree() {
        let ws = workspace();
        let manifest = Manifest::from_extracted_tree("k", ws.path()).unwrap();
        let names: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| (e.original_path.to_string_lossy().to_string(), e.is_directory))
            .collect();
        assert_eq!(
            names,
            vec![("Cargo.lock".to_string(), false), ("out".to_string(), true)]
        );
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect();
        files.sort();
        files
    }
}
