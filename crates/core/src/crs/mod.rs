//! Coordinate Reference System handling
//!
//! terrashade never reprojects. The CRS is read from the GeoTIFF geokey
//! directory, inspected for its units (metric vs. geographic) and copied
//! verbatim into every output raster.

use serde::{Deserialize, Serialize};
use std::fmt;

/// GTModelTypeGeoKey
const KEY_MODEL_TYPE: u16 = 1024;
/// GeographicTypeGeoKey
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
/// ProjectedCSTypeGeoKey
const KEY_PROJECTED_TYPE: u16 = 3072;

/// GTRasterTypeGeoKey
const KEY_RASTER_TYPE: u16 = 1025;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
/// Geokey value meaning "user defined"
const USER_DEFINED: u16 = 32767;

/// Raw GeoTIFF georeferencing tags, kept so they can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoKeys {
    /// GeoKeyDirectoryTag (34735)
    pub directory: Vec<u16>,
    /// GeoDoubleParamsTag (34736)
    pub doubles: Vec<f64>,
    /// GeoAsciiParamsTag (34737)
    pub ascii: Option<String>,
}

impl GeoKeys {
    /// Build a version 1.1.0 directory from inline (key, value) pairs
    pub fn from_entries(entries: &[(u16, u16)]) -> Self {
        let mut directory = vec![1, 1, 0, entries.len() as u16];
        for &(key, value) in entries {
            directory.extend_from_slice(&[key, 0, 1, value]);
        }
        Self {
            directory,
            doubles: Vec::new(),
            ascii: None,
        }
    }

    /// Look up a short (inline) key value in the directory
    pub fn short_value(&self, key: u16) -> Option<u16> {
        let dir = &self.directory;
        if dir.len() < 4 {
            return None;
        }
        let count = dir[3] as usize;
        dir[4..]
            .chunks_exact(4)
            .take(count)
            .find(|entry| entry[0] == key && entry[1] == 0)
            .map(|entry| entry[3])
    }
}

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// EPSG code if known
    epsg: Option<u32>,
    /// Whether coordinates are angular (degrees) rather than metric
    geographic: bool,
    /// Original geokeys, when read from a GeoTIFF
    geokeys: Option<GeoKeys>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            // geographic 2D CRS codes live in the 4000-4999 block
            geographic: (4000..5000).contains(&code),
            geokeys: None,
        }
    }

    /// Create a CRS from a GeoTIFF geokey directory
    pub fn from_geokeys(geokeys: GeoKeys) -> Self {
        let model = geokeys.short_value(KEY_MODEL_TYPE);
        let projected = geokeys
            .short_value(KEY_PROJECTED_TYPE)
            .filter(|&c| c != USER_DEFINED && c != 0);
        let geographic_code = geokeys
            .short_value(KEY_GEOGRAPHIC_TYPE)
            .filter(|&c| c != USER_DEFINED && c != 0);

        let geographic = match model {
            Some(m) => m == MODEL_TYPE_GEOGRAPHIC,
            None => projected.is_none() && geographic_code.is_some(),
        };
        let epsg = if geographic {
            geographic_code.or(projected)
        } else {
            projected.or(geographic_code)
        };

        Self {
            epsg: epsg.map(u32::from),
            geographic,
            geokeys: Some(geokeys),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Whether the CRS uses angular units
    pub fn is_geographic(&self) -> bool {
        self.geographic
    }

    /// The geokeys this CRS was read from
    pub fn geokeys(&self) -> Option<&GeoKeys> {
        self.geokeys.as_ref()
    }

    /// Geokeys to write for this CRS: the original ones when available,
    /// otherwise a minimal directory built from the EPSG code
    pub fn to_geokeys(&self) -> GeoKeys {
        if let Some(keys) = &self.geokeys {
            return keys.clone();
        }
        let (model, code_key) = if self.geographic {
            (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
        } else {
            (MODEL_TYPE_PROJECTED, KEY_PROJECTED_TYPE)
        };
        let mut entries = vec![(KEY_MODEL_TYPE, model), (KEY_RASTER_TYPE, RASTER_PIXEL_IS_AREA)];
        if let Some(code) = self.epsg.and_then(|c| u16::try_from(c).ok()) {
            entries.push((code_key, code));
        }
        GeoKeys::from_entries(&entries)
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        match self.epsg {
            Some(code) => format!("EPSG:{}", code),
            None if self.geokeys.is_some() => "user-defined (GeoTIFF keys)".to_string(),
            None => "Unknown".to_string(),
        }
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(entries: &[(u16, u16)]) -> GeoKeys {
        GeoKeys::from_entries(entries)
    }

    #[test]
    fn test_crs_epsg() {
        let crs = CRS::from_epsg(32633);
        assert_eq!(crs.epsg(), Some(32633));
        assert_eq!(crs.identifier(), "EPSG:32633");
        assert!(!crs.is_geographic());
        assert!(CRS::wgs84().is_geographic());
    }

    #[test]
    fn test_projected_geokeys() {
        let crs = CRS::from_geokeys(keys(&[(1024, 1), (1025, 1), (3072, 32633)]));
        assert_eq!(crs.epsg(), Some(32633));
        assert!(!crs.is_geographic());
    }

    #[test]
    fn test_geographic_geokeys() {
        let crs = CRS::from_geokeys(keys(&[(1024, 2), (2048, 4326)]));
        assert_eq!(crs.epsg(), Some(4326));
        assert!(crs.is_geographic());
    }

    #[test]
    fn test_user_defined_projection() {
        let crs = CRS::from_geokeys(keys(&[(1024, 1), (3072, 32767)]));
        assert_eq!(crs.epsg(), None);
        assert!(!crs.is_geographic());
        assert!(crs.identifier().starts_with("user-defined"));
    }

    #[test]
    fn test_synthesized_geokeys_roundtrip() {
        let crs = CRS::from_geokeys(CRS::from_epsg(25830).to_geokeys());
        assert_eq!(crs.epsg(), Some(25830));
        assert!(!crs.is_geographic());

        let wgs = CRS::from_geokeys(CRS::wgs84().to_geokeys());
        assert!(wgs.is_geographic());
    }
}
