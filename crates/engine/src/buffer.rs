//! Output accumulation for chunked algorithms.
//!
//! `RasterBuffer` pairs the input DEM with the output being built. Chunks
//! read windows of the DEM, compute, and accumulate into the output. The
//! DEM is a [`DemSource`], so a GeoTIFF input is decoded only where chunks
//! read it. Once the
//! last region is written the output is finalised: converted to the
//! requested sample format and written as a GeoTIFF.

use crate::dem::{DemInfo, DemWarning};
use crate::scratch::ScratchStore;
use crate::settings::EngineSettings;
use crate::source::DemSource;
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use std::path::PathBuf;
use terrashade_core::io::{write_geotiff_rows, Compression, GeoTiffOptions, SampleFormat};
use terrashade_core::{Error, Raster, RasterElement, Region, Result};
use tracing::{debug, info, warn};

/// Values below this are treated as unregistered no-data on read
const NODATA_FLOOR: f64 = -9990.0;

/// Upper bound of samples used to estimate statistics of a streamed output
const STAT_SAMPLE_PIXELS: usize = 1_000_000;

/// How `accumulate` combines new values with the stored ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulateMode {
    Overwrite,
    Add,
}

/// Where and how the output is written
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    /// Destination GeoTIFF, required when the output is streamed
    pub path: Option<PathBuf>,
    pub options: GeoTiffOptions,
}

impl OutputSpec {
    /// In-memory output only, float samples
    pub fn memory() -> Self {
        Self {
            path: None,
            options: GeoTiffOptions {
                nodata: Some(f64::NAN),
                ..Default::default()
            },
        }
    }

    /// LZW-compressed GeoTIFF. Float outputs declare NaN as no-data,
    /// integer outputs have none.
    pub fn geotiff(path: impl Into<PathBuf>, sample_format: SampleFormat) -> Self {
        Self {
            path: Some(path.into()),
            options: GeoTiffOptions {
                compression: Compression::Lzw,
                sample_format,
                nodata: (!sample_format.is_integer()).then_some(f64::NAN),
            },
        }
    }
}

enum Store {
    Buffered(Array2<f64>),
    Streaming(ScratchStore),
}

/// Input DEM plus the output under construction
pub struct RasterBuffer<'a> {
    dem: Box<dyn DemSource + 'a>,
    info: DemInfo,
    warnings: Vec<DemWarning>,
    output: OutputSpec,
    settings: EngineSettings,
    store: Store,
    finalized: bool,
}

impl<'a> RasterBuffer<'a> {
    /// Buffer over an in-memory DEM, see [`RasterBuffer::from_source`]
    pub fn new(dem: &'a Raster<f64>, output: OutputSpec, settings: EngineSettings) -> Result<Self> {
        Self::from_source(dem, output, settings)
    }

    /// Inspect `dem` and allocate the output store.
    ///
    /// Outputs up to `settings.buffer_pixels` are kept in memory, larger
    /// ones are streamed through a scratch file and need `output.path`.
    pub fn from_source<S: DemSource + 'a>(dem: S, output: OutputSpec, settings: EngineSettings) -> Result<Self> {
        let (rows, cols) = dem.shape();
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let (info, warnings) = DemInfo::inspect(&dem);
        for warning in &warnings {
            warn!("{}", warning);
        }

        let pixels = rows * cols;
        let store = if pixels <= settings.buffer_pixels {
            info!("Buffering {}x{} output in memory", rows, cols);
            Store::Buffered(Array2::zeros((rows, cols)))
        } else {
            if output.path.is_none() {
                return Err(Error::InvalidParameter {
                    name: "path",
                    value: "none".into(),
                    reason: format!(
                        "outputs above {} pixels are streamed and need a destination file",
                        settings.buffer_pixels
                    ),
                });
            }
            info!(
                "Output of {} pixels exceeds the buffer limit, streaming through a scratch file",
                pixels
            );
            Store::Streaming(ScratchStore::create(rows, cols, settings.scratch_dir.as_deref())?)
        };

        Ok(Self {
            dem: Box::new(dem),
            info,
            warnings,
            output,
            settings,
            store,
            finalized: false,
        })
    }

    pub fn info(&self) -> &DemInfo {
        &self.info
    }

    /// Configuration warnings found when inspecting the DEM
    pub fn warnings(&self) -> &[DemWarning] {
        &self.warnings
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn shape(&self) -> (usize, usize) {
        self.info.shape()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.store, Store::Streaming(_))
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Copy the DEM samples of `region` into `out`.
    ///
    /// With `fill`, no-data cells (the declared sentinel, NaN, and anything
    /// below -9990) are replaced by the fill value.
    ///
    /// # Panics
    /// If `region` is outside the DEM or `out` does not have its shape.
    pub fn read(&mut self, region: &Region, mut out: ArrayViewMut2<'_, f64>, fill: Option<f64>) -> Result<()> {
        let (rows, cols) = self.shape();
        assert!(region.is_within(rows, cols), "read region {:?} outside {}x{} DEM", region, rows, cols);
        assert_eq!(out.dim(), region.shape(), "read buffer does not match region");

        self.dem.read_region(region, out.view_mut())?;
        if let Some(fill) = fill {
            let nodata = self.dem.nodata();
            out.mapv_inplace(|v| {
                if v.is_nan() || v < NODATA_FLOOR || nodata == Some(v) {
                    fill
                } else {
                    v
                }
            });
        }
        Ok(())
    }

    /// Combine `values` into the output at `dest`.
    ///
    /// With `auto_finalize`, the output is finalised as soon as `dest`
    /// reaches the last row and the last column, which only works for
    /// forward traversals.
    ///
    /// # Panics
    /// If `dest` is outside the output or `values` does not have its shape.
    pub fn accumulate(
        &mut self,
        values: ArrayView2<'_, f64>,
        dest: &Region,
        mode: AccumulateMode,
        auto_finalize: bool,
    ) -> Result<()> {
        if self.finalized {
            return Err(Error::Algorithm("output already finalised".into()));
        }
        let (rows, cols) = self.shape();
        assert!(dest.is_within(rows, cols), "write region {:?} outside {}x{} output", dest, rows, cols);
        assert_eq!(values.dim(), dest.shape(), "values do not match write region");

        match &mut self.store {
            Store::Buffered(data) => {
                let mut target = data.slice_mut(ndarray::s![dest.rows(), dest.cols()]);
                match mode {
                    AccumulateMode::Overwrite => target.assign(&values),
                    AccumulateMode::Add => target += &values,
                }
            }
            Store::Streaming(store) => {
                match mode {
                    AccumulateMode::Overwrite => store.write_region(dest, values)?,
                    AccumulateMode::Add => {
                        let mut current = Array2::zeros(dest.shape());
                        store.read_region(dest, current.view_mut())?;
                        current += &values;
                        store.write_region(dest, current.view())?;
                    }
                }
                store.flush()?;
            }
        }
        debug!("Accumulated {:?} ({:?})", dest, mode);

        if auto_finalize && dest.touches_far_corner(rows, cols) {
            self.finalize()?;
        }
        Ok(())
    }

    /// Convert to the output format and write the GeoTIFF, if any.
    /// Calling it again does nothing.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let format = self.output.options.sample_format;
        let (rows, cols) = self.shape();

        let divisor = match format.integer_scale() {
            Some(scale) => {
                let sample = match &mut self.store {
                    Store::Buffered(data) => data.iter().copied().filter(|v| !v.is_nan()).collect(),
                    Store::Streaming(store) => sample_rows(store)?,
                };
                let divisor = robust_max(sample).map(|max| max / scale);
                if divisor.is_none() {
                    warn!("Output has no non-zero values, writing {:?} samples unscaled", format);
                }
                divisor
            }
            None => None,
        };

        if let Store::Buffered(data) = &mut self.store {
            data.mapv_inplace(|v| quantize(v, divisor, format));
        }

        if let Some(path) = self.output.path.clone() {
            let mut options = self.output.options.clone();
            if rows * cols > self.settings.large_raster_pixels && options.compression == Compression::None {
                info!("Large output, forcing LZW compression");
                options.compression = Compression::Lzw;
            }
            info!("Writing {}", path.display());

            let transform = *self.dem.transform();
            let crs = self.dem.crs();
            match &mut self.store {
                Store::Buffered(data) => {
                    write_geotiff_rows(&path, rows, cols, &transform, crs, &options, |row, out| {
                        for (dst, src) in out.iter_mut().zip(data.row(row)) {
                            *dst = *src;
                        }
                        Ok(())
                    })?
                }
                Store::Streaming(store) => {
                    write_geotiff_rows(&path, rows, cols, &transform, crs, &options, |row, out| {
                        store.read_row(row, out)?;
                        for v in out.iter_mut() {
                            *v = quantize(*v, divisor, format);
                        }
                        Ok(())
                    })?
                }
            }
        }

        self.finalized = true;
        Ok(())
    }

    /// The finalised output as a raster with the DEM's georeferencing
    pub fn into_raster(mut self) -> Result<Raster<f64>> {
        self.finalize()?;
        match self.store {
            Store::Buffered(data) => {
                let mut raster = Raster::from_array(data);
                raster.set_transform(*self.dem.transform());
                raster.set_crs(self.dem.crs().cloned());
                raster.set_nodata(self.output.options.nodata);
                Ok(raster)
            }
            Store::Streaming(_) => Err(Error::Algorithm(
                "streamed output is only available on disk".into(),
            )),
        }
    }
}

/// Values of evenly spaced rows, at most about `STAT_SAMPLE_PIXELS` in total
fn sample_rows(store: &mut ScratchStore) -> Result<Vec<f64>> {
    let (rows, cols) = store.shape();
    let max_rows = (STAT_SAMPLE_PIXELS / cols.max(1)).max(1);
    let step = (rows + max_rows - 1) / max_rows;

    let mut row = vec![0.0; cols];
    let mut sample = Vec::with_capacity(max_rows.min(rows) * cols);
    for r in (0..rows).step_by(step.max(1)) {
        store.read_row(r, &mut row)?;
        sample.extend(row.iter().copied().filter(|v| !v.is_nan()));
    }
    Ok(sample)
}

/// `max |v|`, limited to `median + 5 * std_dev` so that a few extreme
/// values do not flatten the integer range. When that limit is not
/// positive (mostly negative outputs) the plain `max |v|` is used. `None`
/// only if every value is zero.
fn robust_max(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let max_abs = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));

    let mid = values.len() / 2;
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    };

    let limit = median + 5.0 * std_dev;
    let max = if limit > 0.0 && max_abs > limit { limit } else { max_abs };
    (max > 0.0 && max.is_finite()).then_some(max)
}

/// Scale a working value into the output sample format
fn quantize(value: f64, divisor: Option<f64>, format: SampleFormat) -> f64 {
    let scaled = match divisor {
        Some(d) => value / d,
        None => value,
    };
    match format {
        SampleFormat::Float32 => scaled,
        SampleFormat::Int16 => f64::from(i16::from_f64(scaled)),
        SampleFormat::Byte => f64::from(u8::from_f64(scaled)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrashade_core::io::{read_geotiff, write_geotiff, GeoTiffReader};
    use terrashade_core::{GeoTransform, CRS};

    fn dem(rows: usize, cols: usize) -> Raster<f64> {
        let mut dem = Raster::from_array(Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64));
        dem.set_transform(GeoTransform::new(0.0, 0.0, 10.0, -10.0));
        dem
    }

    #[test]
    fn test_read_fills_nodata() {
        let mut dem = dem(2, 3);
        dem.set(0, 1, -9999.0).unwrap();
        dem.set(1, 0, f64::NAN).unwrap();
        dem.set(1, 2, -32768.0).unwrap();
        dem.set_nodata(Some(-32768.0));

        let mut buffer = RasterBuffer::new(&dem, OutputSpec::memory(), EngineSettings::default()).unwrap();
        let mut out = Array2::zeros((2, 3));
        buffer.read(&Region::full(2, 3), out.view_mut(), Some(7.0)).unwrap();
        assert_eq!(out, ndarray::arr2(&[[0.0, 7.0, 2.0], [7.0, 4.0, 7.0]]));

        let mut raw = Array2::zeros((1, 2));
        buffer.read(&Region::new(1, 0, 2, 1), raw.view_mut(), None).unwrap();
        assert_eq!(raw, ndarray::arr2(&[[-9999.0, 2.0]]));
    }

    #[test]
    fn test_reads_geotiff_source_by_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let mut dem = dem(5, 8);
        dem.set(2, 3, -32768.0).unwrap();
        dem.set_crs(Some(CRS::from_epsg(32633)));
        let options = GeoTiffOptions {
            nodata: Some(-32768.0),
            ..Default::default()
        };
        write_geotiff(&dem, &path, &options).unwrap();

        let reader = GeoTiffReader::open(&path, None).unwrap();
        let mut buffer = RasterBuffer::from_source(reader, OutputSpec::memory(), EngineSettings::default()).unwrap();
        assert_eq!(buffer.shape(), (5, 8));
        assert_eq!(buffer.info().pixel_size, (10.0, 10.0));

        let region = Region::new(2, 1, 4, 3);
        let mut out = Array2::zeros(region.shape());
        buffer.read(&region, out.view_mut(), Some(0.0)).unwrap();
        assert_eq!(out[[0, 0]], 10.0);
        assert_eq!(out[[1, 1]], 0.0);
        assert_eq!(out[[2, 3]], 29.0);

        buffer.accumulate(Array2::ones((5, 8)).view(), &Region::full(5, 8), AccumulateMode::Overwrite, true).unwrap();
        let out = buffer.into_raster().unwrap();
        assert_eq!(out.transform(), dem.transform());
        assert_eq!(out.crs().and_then(|c| c.epsg()), Some(32633));
    }

    #[test]
    fn test_accumulate_modes() {
        let dem = dem(3, 4);
        let mut buffer = RasterBuffer::new(&dem, OutputSpec::memory(), EngineSettings::default()).unwrap();
        let ones = Array2::ones((3, 2));
        let left = Region::new(0, 0, 2, 3);
        buffer.accumulate(ones.view(), &left, AccumulateMode::Overwrite, true).unwrap();
        buffer.accumulate(ones.view(), &left, AccumulateMode::Add, true).unwrap();
        assert!(!buffer.is_finalized());

        let right = Region::new(2, 0, 2, 3);
        buffer.accumulate(ones.view(), &right, AccumulateMode::Overwrite, true).unwrap();
        assert!(buffer.is_finalized());
        assert!(buffer.accumulate(ones.view(), &right, AccumulateMode::Add, false).is_err());

        let out = buffer.into_raster().unwrap();
        assert_eq!(out.get(2, 1).unwrap(), 2.0);
        assert_eq!(out.get(0, 3).unwrap(), 1.0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let dem = dem(1, 5);
        let output = OutputSpec {
            path: None,
            options: GeoTiffOptions {
                sample_format: SampleFormat::Byte,
                ..Default::default()
            },
        };
        let mut buffer = RasterBuffer::new(&dem, output, EngineSettings::default()).unwrap();
        let values = ndarray::arr2(&[[0.0, 1.0, 2.0, 3.0, 4.0]]);
        buffer.accumulate(values.view(), &Region::full(1, 5), AccumulateMode::Overwrite, false).unwrap();
        buffer.finalize().unwrap();
        buffer.finalize().unwrap();

        let out = buffer.into_raster().unwrap();
        assert_eq!(out.data().row(0).to_vec(), vec![0.0, 64.0, 128.0, 191.0, 255.0]);
    }

    #[test]
    fn test_finalize_twice_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shade.tif");
        let dem = dem(3, 4);
        let mut buffer = RasterBuffer::new(&dem, OutputSpec::geotiff(&path, SampleFormat::Byte), EngineSettings::default()).unwrap();
        let values = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f64);
        buffer.accumulate(values.view(), &Region::full(3, 4), AccumulateMode::Overwrite, false).unwrap();

        buffer.finalize().unwrap();
        let first = std::fs::read(&path).unwrap();
        let decoded: Raster<f64> = read_geotiff(&path, None).unwrap();

        buffer.finalize().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
        let again: Raster<f64> = read_geotiff(&path, None).unwrap();
        assert_eq!(again.data(), decoded.data());
        // scaled once, not twice
        assert_eq!(decoded.get(2, 3).unwrap(), 255.0);
        assert_eq!(decoded.get(0, 1).unwrap(), 23.0);
    }

    #[test]
    fn test_outliers_are_clipped_for_integer_output() {
        let dem = dem(10, 10);
        let output = OutputSpec {
            path: None,
            options: GeoTiffOptions {
                sample_format: SampleFormat::Int16,
                ..Default::default()
            },
        };
        let mut buffer = RasterBuffer::new(&dem, output, EngineSettings::default()).unwrap();
        let mut values = Array2::zeros((10, 10));
        values[[4, 4]] = 1000.0;
        values[[5, 5]] = 10.0;
        buffer.accumulate(values.view(), &Region::full(10, 10), AccumulateMode::Overwrite, true).unwrap();

        let out = buffer.into_raster().unwrap();
        assert_eq!(out.get(4, 4).unwrap(), 32767.0);
        assert_eq!(out.get(0, 0).unwrap(), 0.0);
        // 10 / (5 * std) of the whole grid, not 10 / 1000
        assert!(out.get(5, 5).unwrap() > 600.0);
    }

    #[test]
    fn test_streaming_requires_path() {
        let dem = dem(4, 4);
        let settings = EngineSettings {
            buffer_pixels: 8,
            ..Default::default()
        };
        assert!(matches!(
            RasterBuffer::new(&dem, OutputSpec::memory(), settings),
            Err(Error::InvalidParameter { name: "path", .. })
        ));
    }

    #[test]
    fn test_streaming_matches_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let dem = dem(6, 7);
        let values = Array2::from_shape_fn((6, 7), |(r, c)| (r as f64 - c as f64) * 0.25);

        let mut written = Vec::new();
        for (name, buffer_pixels) in [("buffered.tif", usize::MAX), ("streamed.tif", 10)] {
            let path = dir.path().join(name);
            let settings = EngineSettings {
                buffer_pixels,
                scratch_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            };
            let output = OutputSpec::geotiff(&path, SampleFormat::Int16);
            let mut buffer = RasterBuffer::new(&dem, output, settings).unwrap();
            assert_eq!(buffer.is_streaming(), buffer_pixels == 10);

            // two column slabs, the second one added in two halves
            let left = Region::new(0, 0, 3, 6);
            let right = Region::new(3, 0, 4, 6);
            let half = values.slice(ndarray::s![.., 3..]).mapv(|v| v / 2.0);
            buffer.accumulate(values.slice(ndarray::s![.., ..3]), &left, AccumulateMode::Overwrite, true).unwrap();
            buffer.accumulate(half.view(), &right, AccumulateMode::Add, false).unwrap();
            buffer.accumulate(half.view(), &right, AccumulateMode::Add, true).unwrap();
            assert!(buffer.is_finalized());

            let back: Raster<f64> = read_geotiff(&path, None).unwrap();
            assert_eq!(back.transform(), dem.transform());
            written.push(back.into_array());
        }
        assert_eq!(written[0], written[1]);
        assert_eq!(written[0][[0, 6]], -32767.0);
    }

    #[test]
    fn test_robust_max() {
        assert_eq!(robust_max(vec![0.0, 1.0, 2.0, 3.0, 4.0]), Some(4.0));
        assert_eq!(robust_max(vec![0.0; 4]), None);
        assert_eq!(robust_max(Vec::new()), None);
    }

    #[test]
    fn test_robust_max_of_negative_output() {
        // median + 5 * std_dev = -8, so the limit is ignored
        let values = vec![-10.0, -10.0, -10.0, -10.0, -9.0];
        let std_dev = (0.16f64).sqrt();
        assert!(-10.0 + 5.0 * std_dev < 0.0);
        assert_eq!(robust_max(values), Some(10.0));
    }

    #[test]
    fn test_negative_output_is_scaled_for_int16() {
        let dem = dem(1, 4);
        let output = OutputSpec {
            path: None,
            options: GeoTiffOptions {
                sample_format: SampleFormat::Int16,
                ..Default::default()
            },
        };
        let mut buffer = RasterBuffer::new(&dem, output, EngineSettings::default()).unwrap();
        // median + 5 * std_dev is negative here
        let values = ndarray::arr2(&[[-2.0, -2.0, -2.0, -1.9]]);
        buffer.accumulate(values.view(), &Region::full(1, 4), AccumulateMode::Overwrite, true).unwrap();

        let out = buffer.into_raster().unwrap();
        assert_eq!(out.data().row(0).to_vec(), vec![-32767.0, -32767.0, -32767.0, -31129.0]);
    }
}
