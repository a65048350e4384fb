//! Elevation sources read window by window.
//!
//! Chunked algorithms only ever need the samples under the current chunk,
//! so a DEM is accessed through [`DemSource`]: either an in-memory raster
//! or a GeoTIFF decoded strip by strip.

use ndarray::ArrayViewMut2;
use terrashade_core::io::GeoTiffReader;
use terrashade_core::{Error, GeoTransform, Raster, Region, Result, CRS};

/// A single-band elevation grid with its georeferencing
pub trait DemSource {
    /// Dimensions as (rows, cols)
    fn shape(&self) -> (usize, usize);

    fn transform(&self) -> &GeoTransform;

    fn crs(&self) -> Option<&CRS>;

    /// Declared no-data sentinel
    fn nodata(&self) -> Option<f64>;

    /// Copy the samples of `region` into `out`, which has its shape
    fn read_region(&mut self, region: &Region, out: ArrayViewMut2<'_, f64>) -> Result<()>;
}

impl DemSource for &Raster<f64> {
    fn shape(&self) -> (usize, usize) {
        Raster::shape(self)
    }

    fn transform(&self) -> &GeoTransform {
        Raster::transform(self)
    }

    fn crs(&self) -> Option<&CRS> {
        Raster::crs(self)
    }

    fn nodata(&self) -> Option<f64> {
        Raster::nodata(self)
    }

    fn read_region(&mut self, region: &Region, mut out: ArrayViewMut2<'_, f64>) -> Result<()> {
        let (rows, cols) = Raster::shape(self);
        if !region.is_within(rows, cols) {
            return Err(Error::InvalidParameter {
                name: "region",
                value: format!("{:?}", region),
                reason: format!("outside the {}x{} raster", rows, cols),
            });
        }
        out.assign(&self.region(region));
        Ok(())
    }
}

impl DemSource for GeoTiffReader {
    fn shape(&self) -> (usize, usize) {
        GeoTiffReader::shape(self)
    }

    fn transform(&self) -> &GeoTransform {
        GeoTiffReader::transform(self)
    }

    fn crs(&self) -> Option<&CRS> {
        GeoTiffReader::crs(self)
    }

    fn nodata(&self) -> Option<f64> {
        GeoTiffReader::nodata(self)
    }

    fn read_region(&mut self, region: &Region, out: ArrayViewMut2<'_, f64>) -> Result<()> {
        self.read_window(region, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use terrashade_core::io::{write_geotiff, GeoTiffOptions};

    #[test]
    fn test_file_and_memory_sources_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let mut dem = Raster::from_array(Array2::from_shape_fn((9, 13), |(r, c)| (r * 13 + c) as f64));
        dem.set_transform(GeoTransform::new(100.0, 200.0, 5.0, -5.0));
        dem.set_nodata(Some(-1.0));
        write_geotiff(&dem, &path, &GeoTiffOptions { nodata: Some(-1.0), ..Default::default() }).unwrap();

        let mut memory: Box<dyn DemSource + '_> = Box::new(&dem);
        let mut file: Box<dyn DemSource> = Box::new(GeoTiffReader::open(&path, None).unwrap());
        assert_eq!(memory.shape(), file.shape());
        assert_eq!(memory.transform(), file.transform());
        assert_eq!(memory.nodata(), file.nodata());

        let region = Region::new(3, 2, 7, 6);
        let mut a = Array2::zeros(region.shape());
        let mut b = Array2::zeros(region.shape());
        memory.read_region(&region, a.view_mut()).unwrap();
        file.read_region(&region, b.view_mut()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[[0, 0]], 29.0);

        assert!(memory.read_region(&Region::new(10, 0, 4, 1), Array2::zeros((1, 4)).view_mut()).is_err());
    }
}
