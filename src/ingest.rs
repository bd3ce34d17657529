//! Content ingestion into the backup tree
//!
//! The [`Ingestor`] is the only component that writes to the backup tree.
//! Both the live pipeline and reconciliation hand it [`IngestRequest`]s;
//! the request's [`IngestKind`] selects the variant:
//!
//! - **Generic**: size check, destination folder, byte-exact copy.
//! - **Image**: the same copy, then (when compression is enabled) the copy is
//!   re-encoded in place unless its quality is already at or below the target.
//!
//! Copies go through a temporary file in the destination folder which is then
//! renamed over the target, so readers never observe a half-written file and
//! concurrent writers of the same destination resolve as last-writer-wins.
//!
//! Every failure is specific to one file: it is logged and returned, and the
//! caller moves on.

use crate::config::Config;
use crate::destination::{DestinationBuilder, WatchRoots};
use crate::error::{MirrorError, Result};
use crate::filter::ExtensionFilter;
use crate::image_tool::{EncodeSettings, ImageTool, Interlace};
use crate::types::{IngestKind, IngestOutcome, IngestRequest};
use crate::utils::{format_bytes, format_elapsed};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

/// Image compression parameters taken from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compression {
    /// Target quality
    pub quality: u32,
    /// Chroma sampling factor
    pub sampling_factor: String,
}

/// Copies files into the backup tree, compressing images on request
#[derive(Debug, Clone)]
pub struct Ingestor {
    destinations: DestinationBuilder,
    filter: ExtensionFilter,
    max_file_size: Option<u64>,
    compression: Option<Compression>,
    image_tool: Arc<dyn ImageTool>,
}

impl Ingestor {
    /// Create an ingestor
    pub fn new(
        destinations: DestinationBuilder,
        filter: ExtensionFilter,
        image_tool: Arc<dyn ImageTool>,
    ) -> Self {
        Self {
            destinations,
            filter,
            max_file_size: None,
            compression: None,
            image_tool,
        }
    }

    /// Build an ingestor from a configuration snapshot
    pub fn from_config(config: &Config, image_tool: Arc<dyn ImageTool>) -> Result<Self> {
        let roots = WatchRoots::new(config.file_system.paths.iter().cloned());
        let destinations = DestinationBuilder::new(config.backup_root(), roots);
        let filter = ExtensionFilter::new(&config.file_system.backup.prefix)?;
        let compress = &config.file_system.compress;

        let mut ingestor = Self::new(destinations, filter, image_tool)
            .with_max_file_size(config.max_file_size_bytes());
        if compress.enabled {
            ingestor = ingestor.with_compression(Compression {
                quality: compress.quality,
                sampling_factor: compress.sampling_factor.clone(),
            });
        }
        Ok(ingestor)
    }

    /// Reject files at or above `limit` bytes (`None` = unlimited)
    pub fn with_max_file_size(mut self, limit: Option<u64>) -> Self {
        self.max_file_size = limit;
        self
    }

    /// Re-encode images after copying
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Destination mapping used by this ingestor
    pub fn destinations(&self) -> &DestinationBuilder {
        &self.destinations
    }

    /// Filter used for classification
    pub fn filter(&self) -> &ExtensionFilter {
        &self.filter
    }

    /// Bring one file into the backup tree
    ///
    /// # Errors
    ///
    /// - [`MirrorError::NotRegularFile`] if the source is not a regular file
    /// - [`MirrorError::FileTooLarge`] if the source reaches the size limit
    /// - [`MirrorError::CreateFolder`] if the destination folder cannot be created
    /// - [`MirrorError::ImageTool`] / [`MirrorError::ToolNotFound`] if compression fails;
    ///   the uncompressed copy stays in place
    /// - [`MirrorError::Io`] for any other read or write failure
    pub fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome> {
        let start = Instant::now();
        let result = match request.kind {
            IngestKind::Generic => self.ingest_generic(request),
            IngestKind::Image => self.ingest_image(request),
        };

        match &result {
            Ok(outcome) => debug!(
                source = %request.source.display(),
                destination = %outcome.destination().display(),
                duration = %format_elapsed(start.elapsed()),
                "ingested {:?} file",
                request.kind
            ),
            Err(e) => error!(
                source = %request.source.display(),
                error = %e,
                duration = %format_elapsed(start.elapsed()),
                "{} sync",
                match request.kind {
                    IngestKind::Generic => "file",
                    IngestKind::Image => "image",
                }
            ),
        }
        result
    }

    fn ingest_generic(&self, request: &IngestRequest) -> Result<IngestOutcome> {
        self.check_source(&request.source)?;
        let destination = self.destinations.prepare(&request.context)?;
        let bytes = self.copy(&request.source, &destination)?;
        Ok(IngestOutcome::Copied { destination, bytes })
    }

    fn ingest_image(&self, request: &IngestRequest) -> Result<IngestOutcome> {
        self.check_source(&request.source)?;
        let destination = self.destinations.prepare(&request.context)?;
        let bytes = self.copy(&request.source, &destination)?;

        let Some(compression) = &self.compression else {
            return Ok(IngestOutcome::Copied { destination, bytes });
        };

        let interlace = if self.filter.is_jpeg(&request.source) {
            Interlace::Jpeg
        } else {
            Interlace::Png
        };
        self.compress(&destination, compression, interlace)
    }

    /// Stat the source, refusing non-regular files and oversized files
    fn check_source(&self, source: &Path) -> Result<u64> {
        let metadata = fs::metadata(source)?;
        if !metadata.is_file() {
            return Err(MirrorError::NotRegularFile(source.to_path_buf()));
        }

        let size = metadata.len();
        if let Some(limit) = self.max_file_size {
            if size >= limit {
                return Err(MirrorError::FileTooLarge {
                    path: source.to_path_buf(),
                    size,
                    limit,
                });
            }
        }
        Ok(size)
    }

    /// Byte-exact copy through a temporary file renamed over `destination`
    fn copy(&self, source: &Path, destination: &Path) -> Result<u64> {
        let start = Instant::now();
        let dir = destination
            .parent()
            .ok_or_else(|| MirrorError::internal(format!("{:?} has no parent", destination)))?;

        let mut reader = File::open(source)?;
        let mut staging = NamedTempFile::new_in(dir)?;
        let bytes = io::copy(&mut reader, staging.as_file_mut())?;
        staging.as_file().sync_data()?;
        staging.persist(destination).map_err(|e| e.error)?;

        info!(
            duration = %format_elapsed(start.elapsed()),
            "copy file {} into {} was successfully",
            source.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            destination.display()
        );
        Ok(bytes)
    }

    /// Re-encode `destination` in place unless it is already compressed enough
    fn compress(
        &self,
        destination: &Path,
        compression: &Compression,
        interlace: Interlace,
    ) -> Result<IngestOutcome> {
        let start = Instant::now();
        let before = fs::metadata(destination)?.len();

        let quality = self.image_tool.quality(destination)?;
        if quality <= compression.quality {
            info!(
                duration = %format_elapsed(start.elapsed()),
                "file {} already compressed (quality {})",
                destination.display(),
                quality
            );
            return Ok(IngestOutcome::AlreadyCompressed {
                destination: destination.to_path_buf(),
                quality,
            });
        }

        let settings = EncodeSettings {
            quality: compression.quality,
            sampling_factor: compression.sampling_factor.clone(),
            interlace,
        };
        self.image_tool.recompress(destination, &settings)?;

        let after = fs::metadata(destination)?.len();
        info!(
            duration = %format_elapsed(start.elapsed()),
            "compress file is done, filesize before {}, after {}",
            format_bytes(before),
            format_bytes(after)
        );
        Ok(IngestOutcome::Compressed {
            destination: destination.to_path_buf(),
            before,
            after,
        })
    }
}
