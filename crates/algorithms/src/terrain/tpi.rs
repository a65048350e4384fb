//! Topographic Position Index (TPI)
//!
//! TPI measures the difference between the elevation of a cell and the
//! weighted mean elevation of its neighborhood:
//!
//!   TPI = z_center - mean(z_neighbors)
//!
//! - Positive TPI → cell is higher than surroundings (ridge, hilltop)
//! - Negative TPI → cell is lower than surroundings (valley, depression)
//! - Near-zero TPI → flat area or mid-slope
//!
//! The neighborhood is sampled along the vertical and horizontal lines
//! through each cell (plus both diagonals when denoising), see
//! [`NeighborhoodAccumulator`]. An optional centre-of-mass offset makes
//! neighbors on one side weigh more, which is what toposhade builds on.
//!
//! Reference: Weiss (2001) "Topographic Position and Landforms Analysis"

use super::denoise::{median_filter, Denoise};
use super::neighborhood::{NeighborhoodAccumulator, PixelCorrection, ScanLine, WeightMode};
use ndarray::{s, Array2};
use terrashade_core::raster::Raster;
use terrashade_core::{Algorithm, Error, Result};
use terrashade_engine::{
    AccumulateMode, ChunkAxis, ChunkPlan, EngineSettings, Feedback, OutputSpec, RasterBuffer, Silent,
};
use tracing::debug;

/// Centre-of-mass displacement of the neighborhood
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassOffset {
    /// Distance in pixels, less than the radius
    pub distance: f64,
    /// Direction in degrees clockwise from north
    pub azimuth: f64,
}

/// Per-line displacement limits in whole pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineLimits {
    pub x: isize,
    pub y: isize,
    pub x_diagonal: isize,
    pub y_diagonal: isize,
}

impl MassOffset {
    /// Decompose into pixel offsets along the scan lines. Rows grow
    /// southward, so the azimuth is mirrored first. Halves round to even.
    pub fn limits(&self) -> LineLimits {
        let azimuth = 360.0 - self.azimuth;
        let along = |angle: f64, f: fn(f64) -> f64| {
            (self.distance * f(angle.to_radians())).round_ties_even() as isize
        };
        LineLimits {
            x: along(azimuth, f64::sin),
            y: along(azimuth, f64::cos),
            x_diagonal: along(azimuth - 45.0, f64::sin),
            y_diagonal: along(azimuth - 45.0, f64::cos),
        }
    }
}

/// Parameters for TPI calculation
#[derive(Debug, Clone, PartialEq)]
pub struct TpiParams {
    /// Neighborhood radius in cells
    pub radius: usize,
    pub mode: WeightMode,
    /// Inner radius left out of the neighborhood
    pub exclude: usize,
    pub offset: Option<MassOffset>,
    pub denoise: Denoise,
}

impl Default for TpiParams {
    fn default() -> Self {
        Self {
            radius: 5,
            mode: WeightMode::Uniform,
            exclude: 0,
            offset: None,
            denoise: Denoise::None,
        }
    }
}

impl TpiParams {
    fn validate(&self) -> Result<()> {
        if self.radius == 0 {
            return Err(Error::InvalidParameter {
                name: "radius",
                value: "0".into(),
                reason: "radius must be at least one cell".into(),
            });
        }
        if self.exclude >= self.radius {
            return Err(Error::InvalidParameter {
                name: "exclude",
                value: self.exclude.to_string(),
                reason: format!("exclusion must be smaller than the radius ({})", self.radius),
            });
        }
        if let Some(offset) = &self.offset {
            if !(offset.distance >= 0.0 && offset.distance < self.radius as f64) {
                return Err(Error::InvalidParameter {
                    name: "offset",
                    value: offset.distance.to_string(),
                    reason: format!(
                        "centre of mass is beyond the analysis range: distance must be less than the radius ({})",
                        self.radius
                    ),
                });
            }
            if !offset.azimuth.is_finite() {
                return Err(Error::InvalidParameter {
                    name: "azimuth",
                    value: offset.azimuth.to_string(),
                    reason: "azimuth must be finite".into(),
                });
            }
        }
        Ok(())
    }

    /// Lines sampled through each cell
    pub fn scan_lines(&self) -> Vec<ScanLine> {
        let limits = self.offset.map(|o| o.limits()).unwrap_or_default();
        let mut lines = vec![ScanLine::vertical(limits.y), ScanLine::horizontal(limits.x)];
        if self.denoise.uses_diagonals() {
            lines.push(ScanLine::descending(limits.y_diagonal));
            lines.push(ScanLine::ascending(limits.x_diagonal));
        }
        lines
    }

    /// Halo needed around each chunk
    pub fn overlap(&self) -> usize {
        if self.denoise.is_active() {
            self.radius + 1
        } else {
            self.radius
        }
    }
}

/// TPI algorithm
#[derive(Debug, Clone, Default)]
pub struct Tpi;

impl Algorithm for Tpi {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = TpiParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "TPI"
    }

    fn description(&self) -> &'static str {
        "Topographic Position Index: elevation relative to neighborhood mean"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        tpi(&input, params)
    }
}

/// Calculate Topographic Position Index in memory
///
/// # Arguments
/// * `dem` - Input DEM raster
/// * `params` - TPI parameters
///
/// # Returns
/// Raster with TPI values (same units as input elevation)
pub fn tpi(dem: &Raster<f64>, params: TpiParams) -> Result<Raster<f64>> {
    let settings = EngineSettings {
        buffer_pixels: usize::MAX,
        ..Default::default()
    };
    let mut buffer = RasterBuffer::new(dem, OutputSpec::memory(), settings)?;
    tpi_chunked(&mut buffer, &params, &Silent)?;
    buffer.into_raster()
}

/// Calculate TPI chunk by chunk into `buffer` and finalise it.
///
/// Chunks are full-height column slabs with a halo of `radius` cells
/// (one more when denoising). Progress is reported and cancellation polled
/// after every scan line; a cancelled chunk is never written.
pub fn tpi_chunked(buffer: &mut RasterBuffer<'_>, params: &TpiParams, feedback: &dyn Feedback) -> Result<()> {
    params.validate()?;

    let shape = buffer.shape();
    let axis = ChunkAxis::Columns;
    let plan = ChunkPlan::new(shape, buffer.settings().chunk_len(shape, axis))
        .axis(axis)
        .overlap(params.overlap());
    let lines = params.scan_lines();

    let (px, py) = buffer.info().pixel_size;
    let mut acc = NeighborhoodAccumulator::new(
        plan.buffer_shape(),
        params.radius,
        params.exclude,
        params.mode,
        PixelCorrection::new(px, py),
        &lines,
    );
    debug!(
        "TPI: radius={}, mode={:?}, {} lines, precomputed count={}",
        params.radius,
        params.mode,
        lines.len(),
        acc.has_precomputed_count()
    );

    let mut z = Array2::<f64>::zeros(plan.buffer_shape());
    let fill = Some(buffer.settings().nodata_fill);
    let steps = (plan.len() * lines.len()) as f64;

    for chunk in plan.iter() {
        let mut data = z.slice_mut(s![chunk.read_view.rows(), chunk.read_view.cols()]);
        buffer.read(&chunk.source, data.view_mut(), fill)?;
        if params.denoise.uses_median() {
            let filtered = median_filter(data.view())?;
            data.assign(&filtered);
        }

        acc.reset(data.dim());
        for (i, line) in lines.iter().enumerate() {
            acc.accumulate_line(data.view(), line);
            feedback.report(100.0 * (chunk.index * lines.len() + i + 1) as f64 / steps);
            feedback.checkpoint()?;
        }

        let patch = chunk.reaches_far_edge(axis, shape).then_some(axis);
        acc.normalize(data.view_mut(), patch);

        let core = data.slice(s![chunk.write_view.rows(), chunk.write_view.cols()]);
        buffer.accumulate(core, &chunk.dest, AccumulateMode::Overwrite, true)?;
    }

    buffer.finalize()
}
