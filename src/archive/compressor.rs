//! Compressors that drive the system `tar`.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CompressionFormat, Compressor};
use crate::error::{CacheError, Result};

const TAR: &str = "tar";
const LZ4: &str = "lz4";

/// Runs `tar` with the compression flag for one format
pub struct TarCompressor {
    format: CompressionFormat,
}

impl TarCompressor {
    pub fn lz4() -> Self {
        TarCompressor {
            format: CompressionFormat::Lz4,
        }
    }

    pub fn gzip() -> Self {
        TarCompressor {
            format: CompressionFormat::Gzip,
        }
    }

    fn compression_args(&self) -> Vec<OsString> {
        match self.format {
            // tar passes -d to the program when extracting
            CompressionFormat::Lz4 => vec!["--use-compress-program".into(), LZ4.into()],
            CompressionFormat::Gzip => vec!["-z".into()],
        }
    }

    fn pack_args(&self, list_file: &Path, output: &Path, working_dir: &Path) -> Vec<OsString> {
        let mut args = self.compression_args();
        args.extend([
            "-cf".into(),
            output.into(),
            "-C".into(),
            working_dir.into(),
            // names are taken verbatim, so a leading '-' is never an option
            "--null".into(),
            "--verbatim-files-from".into(),
            "-T".into(),
            list_file.into(),
        ]);
        args
    }

    fn unpack_args(&self, archive: &Path, target_dir: &Path) -> Vec<OsString> {
        let mut args = self.compression_args();
        args.extend([
            "-xf".into(),
            archive.into(),
            "-C".into(),
            target_dir.into(),
        ]);
        args
    }
}

#[async_trait]
impl Compressor for TarCompressor {
    fn format(&self) -> CompressionFormat {
        self.format
    }

    fn is_available(&self) -> bool {
        let tar = which::which(TAR).is_ok();
        match self.format {
            CompressionFormat::Lz4 => tar && which::which(LZ4).is_ok(),
            CompressionFormat::Gzip => tar,
        }
    }

    async fn pack(&self, list_file: &Path, output: &Path, working_dir: &Path) -> Result<()> {
        run_tar(self.pack_args(list_file, output, working_dir)).await
    }

    async fn unpack(&self, archive: &Path, target_dir: &Path) -> Result<()> {
        run_tar(self.unpack_args(archive, target_dir)).await
    }
}

async fn run_tar(args: Vec<OsString>) -> Result<()> {
    debug!(?args, "Running tar");

    let output = Command::new(TAR)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| CacheError::io("Failed to run archiver", TAR, e))?;

    if !output.status.success() {
        return Err(CacheError::Archiver {
            program: TAR.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
