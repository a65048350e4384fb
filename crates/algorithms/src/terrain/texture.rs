//! Texture shading
//!
//! Fractional Laplacian of the elevation (Brown, "Texture shading"),
//! computed axis by axis in the frequency domain. Column slabs are filtered
//! along the columns first, then row slabs along the rows, and the two
//! results are summed with equal weight.
//!
//! The separable sum equals the true 2-D operator `|f|^(2·alpha)` only for
//! `alpha = 1` (up to scale); for other values it is an approximation that
//! is slightly softer along the diagonals. `alpha = 0` returns the input.

use ndarray::{s, Array2, ArrayViewMut2, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use terrashade_core::raster::Raster;
use terrashade_core::{Algorithm, Error, Result};
use terrashade_engine::{
    AccumulateMode, ChunkAxis, ChunkPlan, EngineSettings, Feedback, OutputSpec, RasterBuffer, Silent,
};
use tracing::debug;

/// Parameters for texture shading
#[derive(Debug, Clone, PartialEq)]
pub struct TextureParams {
    /// Fraction of the Laplacian: 0 keeps the elevation, 1 keeps only the
    /// finest detail
    pub alpha: f64,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self { alpha: 0.5 }
    }
}

/// Smallest integer `>= n` whose prime factors are all 2, 3, 5 or 7
pub fn next_smooth(n: usize) -> usize {
    fn is_smooth(mut n: usize) -> bool {
        for d in [2, 3, 5, 7] {
            while n % d == 0 {
                n /= d;
            }
        }
        n == 1
    }
    (n.max(1)..).find(|&m| is_smooth(m)).unwrap_or(n)
}

/// Fractional Laplacian applied to the lanes of an array along one axis
pub struct SeparableFractionalFilter {
    alpha: f64,
    planner: FftPlanner<f64>,
    lane: Vec<Complex<f64>>,
}

impl SeparableFractionalFilter {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            planner: FftPlanner::new(),
            lane: Vec::new(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Transfer function `(f²)^alpha` for every bin of an `n`-point
    /// transform, `f = min(k, n - k) / n` cycles per sample
    pub fn transfer(&self, n: usize) -> Vec<f64> {
        (0..n)
            .map(|k| {
                let f = k.min(n - k) as f64 / n as f64;
                (f * f).powf(self.alpha)
            })
            .collect()
    }

    /// Filter every lane of `data` along `axis` with zero padding to `n`
    /// points and store `weight ×` the result in place.
    ///
    /// # Panics
    /// If `n` is shorter than the lanes.
    pub fn filter_lanes(&mut self, mut data: ArrayViewMut2<'_, f64>, axis: Axis, n: usize, weight: f64) {
        let len = data.len_of(axis);
        assert!(n >= len, "transform length {} shorter than lanes of {}", n, len);

        let forward = self.planner.plan_fft_forward(n);
        let inverse = self.planner.plan_fft_inverse(n);
        let transfer = self.transfer(n);
        let scale = weight / n as f64;

        for mut lane in data.lanes_mut(axis) {
            self.lane.clear();
            self.lane.extend(lane.iter().map(|&v| Complex::new(v, 0.0)));
            self.lane.resize(n, Complex::new(0.0, 0.0));

            forward.process(&mut self.lane);
            for (c, h) in self.lane.iter_mut().zip(&transfer) {
                *c *= *h;
            }
            inverse.process(&mut self.lane);

            for (out, c) in lane.iter_mut().zip(&self.lane) {
                *out = c.re * scale;
            }
        }
    }
}

/// Texture shading algorithm
#[derive(Debug, Clone, Default)]
pub struct TextureShading;

impl Algorithm for TextureShading {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = TextureParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Texture shading"
    }

    fn description(&self) -> &'static str {
        "Fractional Laplacian of the elevation, emphasising drainage texture"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        texture_shading(&input, params)
    }
}

/// Calculate texture shading in memory
pub fn texture_shading(dem: &Raster<f64>, params: TextureParams) -> Result<Raster<f64>> {
    let settings = EngineSettings {
        buffer_pixels: usize::MAX,
        ..Default::default()
    };
    let mut buffer = RasterBuffer::new(dem, OutputSpec::memory(), settings)?;
    texture_shading_chunked(&mut buffer, &params, &Silent)?;
    buffer.into_raster()
}

/// Calculate texture shading in two passes into `buffer` and finalise it.
///
/// The first pass overwrites the output with the column-filtered halves,
/// the second adds the row-filtered halves. Cancellation is polled after
/// every chunk.
pub fn texture_shading_chunked(
    buffer: &mut RasterBuffer<'_>,
    params: &TextureParams,
    feedback: &dyn Feedback,
) -> Result<()> {
    if !(params.alpha.is_finite() && params.alpha >= 0.0) {
        return Err(Error::InvalidParameter {
            name: "alpha",
            value: params.alpha.to_string(),
            reason: "alpha must be a non-negative number".into(),
        });
    }

    let shape = buffer.shape();
    let fill = Some(buffer.settings().nodata_fill);
    let mut filter = SeparableFractionalFilter::new(params.alpha);

    let passes = [
        (ChunkAxis::Columns, Axis(0), next_smooth(shape.0), AccumulateMode::Overwrite),
        (ChunkAxis::Rows, Axis(1), next_smooth(shape.1), AccumulateMode::Add),
    ];
    let plans: Vec<ChunkPlan> = passes
        .iter()
        .map(|&(axis, ..)| ChunkPlan::new(shape, buffer.settings().chunk_len(shape, axis)).axis(axis))
        .collect();
    let steps = plans.iter().map(ChunkPlan::len).sum::<usize>() as f64;
    let mut done = 0usize;

    for (&(axis, lanes, n, mode), plan) in passes.iter().zip(&plans) {
        debug!("Texture shading: {:?} pass, {}-point transforms", axis, n);
        let mut z = Array2::<f64>::zeros(plan.buffer_shape());
        let auto_finalize = mode == AccumulateMode::Add;

        for chunk in plan.iter() {
            let mut data = z.slice_mut(s![chunk.read_view.rows(), chunk.read_view.cols()]);
            buffer.read(&chunk.source, data.view_mut(), fill)?;
            filter.filter_lanes(data.view_mut(), lanes, n, 0.5);

            done += 1;
            feedback.report(100.0 * done as f64 / steps);
            feedback.checkpoint()?;

            let core = data.slice(s![chunk.write_view.rows(), chunk.write_view.cols()]);
            buffer.accumulate(core, &chunk.dest, mode, auto_finalize)?;
        }
    }

    buffer.finalize()
}
