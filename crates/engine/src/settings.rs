//! Engine configuration

use crate::window::ChunkAxis;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Memory and I/O settings shared by every algorithm run.
///
/// All sizes are in pixels. Missing fields deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Target number of pixels per chunk
    pub chunk_pixels: usize,
    /// Outputs up to this size are accumulated in memory
    pub buffer_pixels: usize,
    /// Outputs above this size are always written compressed
    pub large_raster_pixels: usize,
    /// Replacement for no-data cells when reading the DEM
    pub nodata_fill: f64,
    /// Directory for the scratch file of streamed outputs (system temp if unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_pixels: 5_000_000,
            buffer_pixels: 100_000_000,
            large_raster_pixels: 500_000_000,
            nodata_fill: 0.0,
            scratch_dir: None,
        }
    }
}

impl EngineSettings {
    /// Segment length along `axis` so that one chunk holds about
    /// `chunk_pixels` pixels, clamped to `[1, axis length]`
    pub fn chunk_len(&self, shape: (usize, usize), axis: ChunkAxis) -> usize {
        let (scan, across) = match axis {
            ChunkAxis::Columns => (shape.1, shape.0),
            ChunkAxis::Rows => (shape.0, shape.1),
        };
        (self.chunk_pixels / across.max(1)).clamp(1, scan.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_len() {
        let settings = EngineSettings {
            chunk_pixels: 30,
            ..Default::default()
        };
        assert_eq!(settings.chunk_len((10, 10), ChunkAxis::Columns), 3);
        assert_eq!(settings.chunk_len((10, 100), ChunkAxis::Rows), 1);
        assert_eq!(settings.chunk_len((2, 5), ChunkAxis::Columns), 5);
    }

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.chunk_pixels, 5_000_000);
        assert_eq!(settings.buffer_pixels, 100_000_000);
        assert_eq!(settings.nodata_fill, 0.0);
        assert!(settings.scratch_dir.is_none());
    }
}
