//! Main Raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement, Region};
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

/// A georeferenced single-band 2D grid.
///
/// `Raster<T>` stores values of type `T` in row-major order together with
/// the geotransform, the CRS and the no-data sentinel of the source file.
///
/// # Example
///
/// ```ignore
/// use terrashade_core::Raster;
///
/// let mut dem: Raster<f64> = Raster::new(100, 100);
/// dem.set(10, 20, 42.0)?;
/// assert_eq!(dem.get(10, 20)?, 42.0);
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        let array =
            Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let (rows, cols) = self.shape();
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds {
                row,
                col,
                rows,
                cols,
            }),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    /// View of a pixel rectangle
    ///
    /// # Panics
    /// If the region is not inside the grid.
    pub fn region(&self, region: &Region) -> ArrayView2<'_, T> {
        self.data.slice(s![region.rows(), region.cols()])
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }
}

/// Running statistics over values that arrive piece by piece.
///
/// Uses Welford's update so the standard deviation stays accurate for
/// elevations with a large common offset.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAccumulator {
    stats: RasterStatistics,
    mean: f64,
    m2: f64,
}

impl StatisticsAccumulator {
    /// Add a valid value
    pub fn push(&mut self, v: f64) {
        let stats = &mut self.stats;
        stats.min = Some(stats.min.map_or(v, |m| m.min(v)));
        stats.max = Some(stats.max.map_or(v, |m| m.max(v)));
        stats.valid_count += 1;
        let delta = v - self.mean;
        self.mean += delta / stats.valid_count as f64;
        self.m2 += delta * (v - self.mean);
    }

    /// Count a no-data cell
    pub fn skip(&mut self) {
        self.stats.nodata_count += 1;
    }

    pub fn finish(self) -> RasterStatistics {
        let mut stats = self.stats;
        if stats.valid_count > 0 {
            stats.mean = Some(self.mean);
            stats.std_dev = Some((self.m2 / stats.valid_count as f64).sqrt());
        }
        stats
    }
}

/// Basic statistics for a raster, in working precision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Population standard deviation
    pub std_dev: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f32> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<f64> = Raster::new(10, 10);
        raster.set(5, 5, 42.0).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 42.0);
        assert!(raster.set(10, 0, 1.0).is_err());
    }

    #[test]
    fn test_region_view() {
        let raster = Raster::from_vec((0..20).map(f64::from).collect(), 4, 5).unwrap();
        let view = raster.region(&Region::new(1, 2, 3, 2));
        assert_eq!(view.dim(), (2, 3));
        assert_eq!(view[[0, 0]], 11.0);
        assert_eq!(view[[1, 2]], 18.0);
    }

    #[test]
    fn test_statistics_accumulator() {
        let mut stats = StatisticsAccumulator::default();
        for v in [1.0, 2.0, 3.0, 4.0, 6.0] {
            stats.push(v);
        }
        stats.skip();

        let stats = stats.finish();
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(6.0));
        assert_eq!(stats.valid_count, 5);
        assert_eq!(stats.nodata_count, 1);
        assert_relative_eq!(stats.mean.unwrap(), 3.2, epsilon = 1e-12);
        // population variance of [1, 2, 3, 4, 6] = 2.96
        assert_relative_eq!(stats.std_dev.unwrap(), 2.96f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_statistics_keep_precision_with_offset() {
        let mut stats = StatisticsAccumulator::default();
        for i in 0..1000 {
            stats.push(1.0e9 + f64::from(i % 2));
        }
        let stats = stats.finish();
        assert_relative_eq!(stats.std_dev.unwrap(), 0.5, epsilon = 1e-6);
        assert!(StatisticsAccumulator::default().finish().mean.is_none());
    }
}
