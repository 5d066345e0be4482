//! Cache key construction.
//!
//! Keys are namespaced as `<org>/<repo>/<branch>/<workflow>/<suffix>.tar.lz4`. The
//! extension is fixed no matter which compressor produced the archive; the real
//! format is detected from the archive bytes on restore.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Extension appended to every key.
pub const CANONICAL_EXTENSION: &str = ".tar.lz4";

/// Branch used for the synthetic last-resort fallback key.
pub const DEFAULT_BRANCH: &str = "main";

/// Position of the branch segment in a namespaced key.
const BRANCH_SEGMENT: usize = 2;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_-]*)\s*\}").expect("placeholder pattern is valid")
});

/// Repository/branch/workflow context a key is namespaced under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub org: String,
    pub repo: String,
    pub branch: String,
    pub workflow: String,
}

impl Context {
    pub fn new(
        org: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        Context {
            org: org.into(),
            repo: repo.into(),
            branch: branch.into(),
            workflow: workflow.into(),
        }
    }

    fn lookup(&self, name: &str) -> &str {
        match name {
            "org" => &self.org,
            "repo" => &self.repo,
            "branch" => &self.branch,
            "workflow" => &self.workflow,
            _ => "",
        }
    }
}

/// A fully namespaced object store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key without its canonical extension, as recorded in manifests.
    pub fn unsuffixed(&self) -> &str {
        self.0
            .strip_suffix(CANONICAL_EXTENSION)
            .unwrap_or(&self.0)
    }

    /// Same key with the branch segment replaced by [`DEFAULT_BRANCH`].
    ///
    /// Returns `None` when the key does not have at least four segments.
    fn on_default_branch(&self) -> Option<CacheKey> {
        let mut segments: Vec<&str> = self.unsuffixed().split('/').collect();
        if segments.len() < 4 {
            return None;
        }
        segments[BRANCH_SEGMENT] = DEFAULT_BRANCH;
        Some(CacheKey(format!(
            "{}{CANONICAL_EXTENSION}",
            segments.join("/")
        )))
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey(key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey(key.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds keys from user templates for one [`Context`].
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    context: Context,
}

impl KeyBuilder {
    pub fn new(context: Context) -> Self {
        KeyBuilder { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Substitute `{org}`, `{repo}`, `{branch}` and `{workflow}` in the
    /// template and namespace the result. Unknown placeholders become "".
    pub fn build(&self, template: &str) -> CacheKey {
        let suffix = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            self.context.lookup(&caps[1]).to_string()
        });
        let ctx = &self.context;
        CacheKey(format!(
            "{}/{}/{}/{}/{suffix}{CANONICAL_EXTENSION}",
            ctx.org, ctx.repo, ctx.branch, ctx.workflow
        ))
    }

    /// Ordered candidate list for a restore.
    ///
    /// The primary key always comes first, then each non-empty user key in
    /// caller order, then one synthetic key on the default branch.
    pub fn fallback_keys(&self, primary: &CacheKey, user_keys: &[String]) -> Vec<CacheKey> {
        let mut keys = vec![primary.clone()];

        for template in user_keys {
            let template = template.trim();
            if template.is_empty() {
                continue;
            }
            let key = self.build(template);
            if &key != primary {
                keys.push(key);
            }
        }

        // Not deduplicated against earlier candidates.
        if let Some(key) = primary.on_default_branch() {
            keys.push(key);
        }

        keys
    }
}
