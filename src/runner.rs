//! Glue for the CI runner: context, outputs and secret masking.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::error::{CacheError, Result};
use crate::key::Context;

/// Build a key context from the runner environment
pub fn context_from_env() -> Context {
    context_from_vars(|name| std::env::var(name).ok())
}

/// Build a key context from an arbitrary variable lookup.
///
/// `GITHUB_REPOSITORY` is `org/repo`. The branch prefers `GITHUB_HEAD_REF`
/// (set on pull requests) over `GITHUB_REF_NAME`.
pub fn context_from_vars<F>(lookup: F) -> Context
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

    let repository = non_empty("GITHUB_REPOSITORY").unwrap_or_default();
    let (org, repo) = match repository.split_once('/') {
        Some((org, repo)) => (org.to_string(), repo.to_string()),
        None => (repository.clone(), String::new()),
    };

    let branch = non_empty("GITHUB_HEAD_REF")
        .or_else(|| non_empty("GITHUB_REF_NAME"))
        .unwrap_or_default();
    let workflow = non_empty("GITHUB_WORKFLOW").unwrap_or_default();

    Context::new(org, repo, branch, workflow)
}

/// Ask the runner to redact a value from all further log output
pub fn mask_secret(value: &str) {
    if !value.is_empty() {
        println!("::add-mask::{value}");
    }
}

/// Where step outputs are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// The file named by `GITHUB_OUTPUT`
    File(PathBuf),
    /// Legacy workflow command on stdout
    Stdout,
}

impl OutputSink {
    pub fn from_env() -> Self {
        match std::env::var_os("GITHUB_OUTPUT") {
            Some(path) if !path.is_empty() => OutputSink::File(PathBuf::from(path)),
            _ => OutputSink::Stdout,
        }
    }

    pub fn set_output(&self, name: &str, value: &str) -> Result<()> {
        match self {
            OutputSink::File(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| CacheError::io("Failed to open output file", path, e))?;
                writeln!(file, "{name}={value}")
                    .map_err(|e| CacheError::io("Failed to write output", path, e))
            }
            OutputSink::Stdout => {
                println!("::set-output name={name}::{value}");
                Ok(())
            }
        }
    }
}
