//! GeoTIFF reading and writing

mod native;

pub use native::{read_geotiff, write_geotiff, write_geotiff_rows, GeoTiffReader};

use serde::{Deserialize, Serialize};

/// Sample type of an output GeoTIFF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 32-bit float, values written as computed
    #[default]
    Float32,
    /// Signed 16-bit integer, values scaled to +-32767
    Int16,
    /// Unsigned byte, values scaled to 0..255
    Byte,
}

impl SampleFormat {
    /// Factor that maps a normalised value in [-1, 1] onto the integer
    /// range. `None` for float output.
    pub fn integer_scale(&self) -> Option<f64> {
        match self {
            SampleFormat::Float32 => None,
            SampleFormat::Int16 => Some(32767.0),
            SampleFormat::Byte => Some(255.0),
        }
    }

    pub fn is_integer(&self) -> bool {
        self.integer_scale().is_some()
    }
}

/// Compression of an output GeoTIFF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compression {
    None,
    #[default]
    Lzw,
    Deflate,
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoTiffOptions {
    pub compression: Compression,
    pub sample_format: SampleFormat,
    /// Value written to the GDAL no-data tag, if any
    pub nodata: Option<f64>,
}
