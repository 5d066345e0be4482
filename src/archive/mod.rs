pub mod compressor;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};

pub use compressor::TarCompressor;

const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Compression applied to a cache archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Fast, preferred when the tooling is present
    Lz4,
    /// Universally available fallback
    Gzip,
}

impl CompressionFormat {
    /// Identify a format from the leading bytes of an archive
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(&LZ4_MAGIC) {
            Some(CompressionFormat::Lz4)
        } else if header.starts_with(&GZIP_MAGIC) {
            Some(CompressionFormat::Gzip)
        } else {
            None
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionFormat::Lz4 => f.write_str("lz4"),
            CompressionFormat::Gzip => f.write_str("gzip"),
        }
    }
}

/// Detect the format of an archive, treating anything unrecognised as gzip
pub fn detect_format(header: &[u8]) -> CompressionFormat {
    CompressionFormat::from_magic(header).unwrap_or_else(|| {
        warn!(
            header = ?&header[..header.len().min(4)],
            "Unrecognised archive signature, assuming gzip"
        );
        CompressionFormat::Gzip
    })
}

/// Capability for packing and unpacking a tar stream with one compression format
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Format this compressor produces and reads
    fn format(&self) -> CompressionFormat;

    /// Whether the tooling it needs is present on this machine
    fn is_available(&self) -> bool;

    /// Archive the paths listed (NUL-terminated) in `list_file`, relative to `working_dir`
    async fn pack(&self, list_file: &Path, output: &Path, working_dir: &Path) -> Result<()>;

    /// Extract `archive` into `target_dir`
    async fn unpack(&self, archive: &Path, target_dir: &Path) -> Result<()>;
}

/// Creates and extracts single-file cache archives
pub struct ArchiveTransport {
    fast: Arc<dyn Compressor>,
    universal: Arc<dyn Compressor>,
}

impl ArchiveTransport {
    pub fn new(fast: Arc<dyn Compressor>, universal: Arc<dyn Compressor>) -> Self {
        ArchiveTransport { fast, universal }
    }

    /// Transport backed by the system `tar` with lz4 preferred over gzip
    pub fn system() -> Self {
        Self::new(
            Arc::new(TarCompressor::lz4()),
            Arc::new(TarCompressor::gzip()),
        )
    }

    /// Pick the compressor used for new archives
    fn select_compressor(&self) -> Result<&dyn Compressor> {
        if self.fast.is_available() {
            return Ok(self.fast.as_ref());
        }
        warn!(
            preferred = %self.fast.format(),
            fallback = %self.universal.format(),
            "Preferred compressor unavailable, falling back"
        );
        if self.universal.is_available() {
            Ok(self.universal.as_ref())
        } else {
            Err(CacheError::CompressorUnavailable(self.universal.format()))
        }
    }

    fn compressor_for(&self, format: CompressionFormat) -> &dyn Compressor {
        if self.fast.format() == format {
            self.fast.as_ref()
        } else {
            self.universal.as_ref()
        }
    }

    /// Archive `paths` (relative to `working_dir`) into `output`.
    ///
    /// The path list goes through a temporary list file which is removed
    /// however the archiver exits. Returns the format actually used.
    pub async fn create(
        &self,
        paths: &[PathBuf],
        output: &Path,
        working_dir: &Path,
    ) -> Result<CompressionFormat> {
        let compressor = self.select_compressor()?;

        let mut list = tempfile::Builder::new()
            .prefix("s3cache-files-")
            .suffix(".txt")
            .tempfile()
            .map_err(|e| CacheError::io("Failed to create file list", std::env::temp_dir(), e))?;
        for path in paths {
            list.write_all(path.as_os_str().as_encoded_bytes())
                .and_then(|_| list.write_all(b"\0"))
                .map_err(|e| CacheError::io("Failed to write file list", list.path(), e))?;
        }
        list.flush()
            .map_err(|e| CacheError::io("Failed to write file list", list.path(), e))?;

        debug!(
            members = paths.len(),
            list = %list.path().display(),
            format = %compressor.format(),
            "Creating archive"
        );
        compressor.pack(list.path(), output, working_dir).await?;

        info!(archive = %output.display(), format = %compressor.format(), "Archive created");
        Ok(compressor.format())
    }

    /// Extract `archive` into `target_dir`, detecting the format from its content.
    ///
    /// A detected lz4 archive with no lz4 tooling is an error; decoding with the
    /// wrong program is never attempted.
    pub async fn extract(&self, archive: &Path, target_dir: &Path) -> Result<CompressionFormat> {
        let header = read_header(archive).await?;
        let format = detect_format(&header);

        let compressor = self.compressor_for(format);
        if !compressor.is_available() {
            return Err(CacheError::CompressorUnavailable(format));
        }

        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| CacheError::io("Failed to create extraction directory", target_dir, e))?;

        debug!(archive = %archive.display(), %format, "Extracting archive");
        compressor.unpack(archive, target_dir).await?;
        Ok(format)
    }
}

/// Read up to the first four bytes of a file
async fn read_header(path: &Path) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CacheError::io("Failed to open archive", path, e))?;

    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = file
            .read(&mut header[filled..])
            .await
            .map_err(|e| CacheError::io("Failed to read archive", path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(header[..filled].to_vec())
}
