//! # Extractor Module
//!
//! Turns one image file into a fingerprint, a content hash and the
//! metadata the planner needs.
//!
//! ## How It Works
//! 1. Read the file bytes (memory-mapped for large files)
//! 2. blake3 the raw bytes for exact-duplicate detection
//! 3. Decode to a pixel grid through the `ImageDecoder` capability
//! 4. Box-reduce to (grid + 1) x grid luminance cells
//! 5. Difference-hash the cells into a fixed-width fingerprint
//!
//! Extraction is a pure function of the file bytes and the shared
//! `FingerprintParams`; nothing is written anywhere.

mod content;
mod decode;
mod fingerprint;
mod metadata;
mod reduce;

pub use content::{read_file_bytes, ContentHash, FileBytes};
pub use decode::{DecodeFailure, ImageDecoder, PixelGrid, StandardDecoder};
pub use fingerprint::{difference_hash, Fingerprint};
pub use metadata::{exif_capture_time, resolve_capture_time, CaptureSource, CaptureTime};
pub use reduce::reduce_to_luma;

use crate::core::config::FingerprintParams;
use crate::core::record::{FileStamp, ImageRecord};
use crate::error::ExtractError;
use std::path::Path;
use std::sync::Arc;

/// Fingerprint a decoded pixel grid
pub fn fingerprint_grid(params: FingerprintParams, grid: &PixelGrid) -> Fingerprint {
    let luma = reduce_to_luma(grid, params.grid_size + 1, params.grid_size);
    difference_hash(params, &luma)
}

/// Extracts records from files with one fixed set of parameters
#[derive(Clone)]
pub struct Extractor {
    params: FingerprintParams,
    decoder: Arc<dyn ImageDecoder>,
}

impl Extractor {
    pub fn new(params: FingerprintParams, decoder: Arc<dyn ImageDecoder>) -> Self {
        Self { params, decoder }
    }

    /// Extractor using the built-in decoder
    pub fn standard(params: FingerprintParams) -> Self {
        Self::new(params, Arc::new(StandardDecoder::new()))
    }

    pub fn params(&self) -> FingerprintParams {
        self.params
    }

    /// Extract a record for the file at `path` whose stamp was taken by the
    /// scanner. The stamp is stored as-is so incremental scans compare
    /// against what was seen at traversal time.
    pub fn extract(&self, path: &Path, stamp: FileStamp) -> Result<ImageRecord, ExtractError> {
        let bytes = read_file_bytes(path)?;
        if bytes.is_empty() {
            return Err(ExtractError::EmptyImage {
                path: path.to_path_buf(),
            });
        }

        let content_hash = ContentHash::of(&bytes);

        let grid = self
            .decoder
            .decode(&bytes)
            .map_err(|e| ExtractError::DecodeError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if grid.is_empty() {
            return Err(ExtractError::EmptyImage {
                path: path.to_path_buf(),
            });
        }

        let fingerprint = fingerprint_grid(self.params, &grid);
        let capture = resolve_capture_time(&bytes, stamp.modified_utc());

        tracing::debug!(
            path = %path.display(),
            fingerprint = %fingerprint.to_hex(),
            "extracted"
        );

        Ok(ImageRecord {
            path: path.to_path_buf(),
            stamp,
            width: grid.width(),
            height: grid.height(),
            capture,
            fingerprint,
            content_hash,
        })
    }
}
