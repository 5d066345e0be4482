use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use s3cache::archive::ArchiveTransport;
use s3cache::config::{CacheAction, CacheConfig, Inputs};
use s3cache::runner::{self, OutputSink};
use s3cache::store::S3Store;
use s3cache::{CacheManager, KeyBuilder, RestoreOutcome, SaveOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // stderr keeps stdout free for runner commands
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let inputs = Inputs::parse();

    // Mask credentials before anything else can log them
    for secret in [&inputs.cache_username, &inputs.cache_password]
        .into_iter()
        .flatten()
    {
        runner::mask_secret(secret.trim());
    }

    // Invalid configuration is the only hard failure
    let config = CacheConfig::from_inputs(inputs).context("Invalid cache configuration")?;
    let working_dir = resolve_working_dir(config.working_dir.as_ref())?;
    let outputs = OutputSink::from_env();

    let keys = KeyBuilder::new(runner::context_from_env());

    let store = match S3Store::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Object store unavailable, continuing without cache");
            if config.action == CacheAction::Restore {
                set_output(&outputs, "cache-hit", "false");
            }
            return Ok(());
        }
    };

    let manager = CacheManager::new(
        Arc::new(store),
        ArchiveTransport::system(),
        keys,
        working_dir,
    )
    .with_version_policy(config.version_policy);

    match config.action {
        CacheAction::Save => {
            let outcome = manager.save(&config.key, &config.paths).await;
            set_output(&outputs, "cache-key", outcome.key().as_str());
            let saved = matches!(outcome, SaveOutcome::Saved { .. });
            info!(saved, "Save finished");
        }
        CacheAction::Restore => {
            let outcome = manager.restore(&config.key, &config.restore_keys).await;
            set_output(
                &outputs,
                "cache-hit",
                if outcome.cache_hit() { "true" } else { "false" },
            );
            if let Some(key) = outcome.matched_key() {
                set_output(&outputs, "cache-key", key.as_str());
            }
            if let RestoreOutcome::Hit { report, .. } = &outcome {
                if !report.is_complete() {
                    warn!(
                        skipped = report.skipped.len(),
                        failed = report.failed.len(),
                        "Cache partially restored"
                    );
                }
            }
            info!(cache_hit = outcome.cache_hit(), "Restore finished");
        }
    }

    Ok(())
}

fn resolve_working_dir(configured: Option<&PathBuf>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(match configured {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => cwd.join(dir),
        None => cwd,
    })
}

fn set_output(outputs: &OutputSink, name: &str, value: &str) {
    if let Err(e) = outputs.set_output(name, value) {
        warn!(name, error = %e, "Failed to set output");
    }
}
