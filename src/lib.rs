//! Save and restore CI build caches in S3-compatible object storage.
//!
//! A save resolves path patterns, writes a [`manifest::Manifest`] next to
//! them, archives everything into one compressed file and uploads it under a
//! key namespaced by repository, branch and workflow. A restore probes the
//! requested key and its fallbacks in order, downloads the first hit and
//! replays the manifest onto the working directory.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod manifest;
pub mod paths;
pub mod runner;
pub mod store;

pub use cache::{CacheManager, RestoreOutcome, SaveOutcome};
pub use error::{CacheError, Result};
pub use key::{CacheKey, Context, KeyBuilder};
