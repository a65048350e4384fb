//! DEM inspection: metric pixel size and configuration warnings

use crate::source::DemSource;
use thiserror::Error;

/// Length of one degree of latitude in metres
const METRES_PER_DEGREE: f64 = 111_111.0;

/// Problems with the DEM that do not stop processing but degrade the result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemWarning {
    #[error(
        "DEM is not in a metric projection; pixel size approximated as {x:.2} x {y:.2} m at latitude {latitude:.4}"
    )]
    GeographicUnits { latitude: f64, x: f64, y: f64 },

    #[error("DEM pixels are irregular in shape ({x} x {y}), probably due to an incorrect projection")]
    IrregularPixels { x: f64, y: f64 },
}

/// What the algorithms need to know about the elevation model
#[derive(Debug, Clone, PartialEq)]
pub struct DemInfo {
    pub rows: usize,
    pub cols: usize,
    /// Pixel size (x, y) in metres
    pub pixel_size: (f64, f64),
    /// Whether the source CRS is geographic
    pub geographic: bool,
}

impl DemInfo {
    /// Inspect the georeferencing of `dem`, converting angular pixel sizes
    /// to metres. No samples are read.
    pub fn inspect(dem: &dyn DemSource) -> (Self, Vec<DemWarning>) {
        let mut warnings = Vec::new();
        let (rows, cols) = dem.shape();
        let geographic = dem.crs().map_or(false, |crs| crs.is_geographic());
        let (mut px, mut py) = dem.transform().pixel_size();

        if geographic {
            let (_, latitude) = dem.transform().center(cols, rows);
            (px, py) = deg_to_m(px, py, latitude);
            warnings.push(DemWarning::GeographicUnits {
                latitude,
                x: px,
                y: py,
            });
        }

        // compared at centimetre precision
        if (px * 100.0).round() != (py * 100.0).round() {
            warnings.push(DemWarning::IrregularPixels { x: px, y: py });
        }

        let info = Self {
            rows,
            cols,
            pixel_size: (px, py),
            geographic,
        };
        (info, warnings)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// Convert an angular extent (degrees) at `latitude` into metres
pub fn deg_to_m(dx: f64, dy: f64, latitude: f64) -> (f64, f64) {
    (
        dx * METRES_PER_DEGREE * latitude.to_radians().cos(),
        dy * METRES_PER_DEGREE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use terrashade_core::{GeoTransform, Raster, CRS};

    #[test]
    fn test_deg_to_m() {
        let (x, y) = deg_to_m(1.0, 1.0, 60.0);
        assert_relative_eq!(x, 55_555.5, epsilon = 1e-6);
        assert_relative_eq!(y, 111_111.0, epsilon = 1e-9);
    }

    #[test]
    fn test_metric_dem_has_no_warnings() {
        let mut dem = Raster::filled(4, 4, 100.0);
        dem.set_transform(GeoTransform::new(0.0, 0.0, 25.0, -25.0));
        dem.set_crs(Some(CRS::from_epsg(32633)));

        let (info, warnings) = DemInfo::inspect(&&dem);
        assert!(warnings.is_empty());
        assert_eq!(info.pixel_size, (25.0, 25.0));
        assert_eq!(info.shape(), (4, 4));
    }

    #[test]
    fn test_geographic_dem_warns_twice() {
        // 1 arc-second grid around 45 N
        let mut dem = Raster::filled(10, 10, 0.0);
        let step = 1.0 / 3600.0;
        dem.set_transform(GeoTransform::new(15.0, 45.0 + 5.0 * step, step, -step));
        dem.set_crs(Some(CRS::wgs84()));

        let (info, warnings) = DemInfo::inspect(&&dem);
        assert!(info.geographic);
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], DemWarning::GeographicUnits { .. }));
        assert!(matches!(warnings[1], DemWarning::IrregularPixels { .. }));
        assert_relative_eq!(info.pixel_size.1, 30.864, epsilon = 1e-3);
        assert!(info.pixel_size.0 < info.pixel_size.1);
    }
}
