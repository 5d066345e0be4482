//! Action inputs.
//!
//! Every input can be passed as a flag or through the runner's `INPUT_<NAME>`
//! environment variable. Validation happens in [`CacheConfig::from_inputs`],
//! before any I/O.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use secrecy::SecretString;

use crate::error::{CacheError, Result};
use crate::manifest::VersionPolicy;
use crate::store::StoreConfig;

pub const DEFAULT_ENDPOINT: &str = "http://cache-s3.internal:9000";
pub const DEFAULT_BUCKET: &str = "ci-cache";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Raw inputs as supplied by the runner
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "s3cache")]
#[command(
    author,
    version,
    about = "Save and restore CI caches in S3-compatible storage",
    long_about = None
)]
pub struct Inputs {
    /// `save` or `restore`
    #[arg(long, env = "INPUT_ACTION")]
    pub action: Option<String>,

    /// Cache key template
    #[arg(long, env = "INPUT_KEY")]
    pub key: Option<String>,

    /// Newline-separated fallback key templates (restore only)
    #[arg(long = "restore-keys", env = "INPUT_RESTORE-KEYS")]
    pub restore_keys: Option<String>,

    /// Newline- or comma-separated path patterns
    #[arg(long, env = "INPUT_PATH")]
    pub path: Option<String>,

    #[arg(long = "s3-endpoint", env = "INPUT_S3-ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long = "cache-username", env = "INPUT_CACHE-USERNAME", hide_env_values = true)]
    pub cache_username: Option<String>,

    #[arg(long = "cache-password", env = "INPUT_CACHE-PASSWORD", hide_env_values = true)]
    pub cache_password: Option<String>,

    #[arg(long = "s3-bucket", env = "INPUT_S3-BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long = "s3-region", env = "INPUT_S3-REGION")]
    pub s3_region: Option<String>,

    /// Reject manifests written with a different schema version
    #[arg(long = "manifest-strict", env = "INPUT_MANIFEST-STRICT")]
    pub manifest_strict: Option<String>,

    /// Directory cached paths are relative to (default: current directory)
    #[arg(long = "working-directory", env = "INPUT_WORKING-DIRECTORY")]
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Save,
    Restore,
}

impl FromStr for CacheAction {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "save" => Ok(CacheAction::Save),
            "restore" => Ok(CacheAction::Restore),
            _ => Err(CacheError::InvalidAction(s.trim().to_string())),
        }
    }
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheAction::Save => f.write_str("save"),
            CacheAction::Restore => f.write_str("restore"),
        }
    }
}

/// Validated configuration for one invocation
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub action: CacheAction,
    pub key: String,
    pub restore_keys: Vec<String>,
    pub paths: Vec<String>,
    pub store: StoreConfig,
    pub version_policy: VersionPolicy,
    pub working_dir: Option<PathBuf>,
}

impl CacheConfig {
    pub fn from_inputs(inputs: Inputs) -> Result<Self> {
        let action: CacheAction = required(inputs.action, "action")?.parse()?;
        let key = required(inputs.key, "key")?;
        let paths = split_list(&required(inputs.path, "path")?, &['\n', ',']);
        let username = required(inputs.cache_username, "cache-username")?;
        let password = required(inputs.cache_password, "cache-password")?;

        let restore_keys = inputs
            .restore_keys
            .as_deref()
            .map(|keys| split_list(keys, &['\n']))
            .unwrap_or_default();

        let store = StoreConfig {
            endpoint: or_default(inputs.s3_endpoint, DEFAULT_ENDPOINT),
            bucket: or_default(inputs.s3_bucket, DEFAULT_BUCKET),
            region: or_default(inputs.s3_region, DEFAULT_REGION),
            access_key_id: username,
            secret_access_key: SecretString::from(password),
            force_path_style: true,
        };

        let version_policy = match inputs.manifest_strict.as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") => VersionPolicy::Strict,
            _ => VersionPolicy::Lenient,
        };

        Ok(CacheConfig {
            action,
            key,
            restore_keys,
            paths,
            store,
            version_policy,
            working_dir: inputs.working_directory,
        })
    }
}

/// An unset or blank input counts as missing
fn required(value: Option<String>, name: &'static str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(CacheError::MissingInput(name)),
    }
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Split on any of `separators`, trimming items and dropping empty ones
pub fn split_list(value: &str, separators: &[char]) -> Vec<String> {
    value
        .split(separators)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
