//! Hillshade (shaded relief) calculation
//!
//! Lambertian reflectance of the surface for a light source at a given
//! azimuth and altitude. Slopes are measured along the light direction and
//! across it with [`DirectionalGradientKernel`], so the light can come from
//! any azimuth without rotating the grid. Each slope can be exaggerated
//! separately for more contrast.

use super::gradient::DirectionalGradientKernel;
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Zip};
use terrashade_core::raster::Raster;
use terrashade_core::{Algorithm, Error, Result};
use terrashade_engine::{
    AccumulateMode, ChunkAxis, ChunkPlan, EngineSettings, Feedback, OutputSpec, RasterBuffer, Silent, ViewPair,
};
use tracing::debug;

/// Parameters for hillshade calculation
#[derive(Debug, Clone, PartialEq)]
pub struct HillshadeParams {
    /// Sun azimuth in degrees (0 = North, clockwise)
    pub azimuth: f64,
    /// Sun altitude in degrees above horizon (0-90)
    pub altitude: f64,
    /// Exaggeration of slopes across the light direction
    pub lateral: f64,
    /// Exaggeration of slopes along the light direction
    pub longitudinal: f64,
    /// Use the 5x5 kernel
    pub smooth: bool,
    /// Average with a second light at `azimuth + 90`
    pub bidirectional: bool,
}

impl Default for HillshadeParams {
    fn default() -> Self {
        Self {
            azimuth: 315.0,
            altitude: 45.0,
            lateral: 2.0,
            longitudinal: 1.0,
            smooth: false,
            bidirectional: false,
        }
    }
}

impl HillshadeParams {
    fn validate(&self) -> Result<()> {
        if !(0.0..=90.0).contains(&self.altitude) {
            return Err(Error::InvalidParameter {
                name: "altitude",
                value: self.altitude.to_string(),
                reason: "sun altitude must be between 0 and 90 degrees".into(),
            });
        }
        if !self.azimuth.is_finite() {
            return Err(Error::InvalidParameter {
                name: "azimuth",
                value: self.azimuth.to_string(),
                reason: "azimuth must be finite".into(),
            });
        }
        for (name, value) in [("lateral", self.lateral), ("longitudinal", self.longitudinal)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidParameter {
                    name,
                    value: value.to_string(),
                    reason: "exaggeration must be a non-negative number".into(),
                });
            }
        }
        Ok(())
    }

    fn kernels(&self) -> Vec<DirectionalGradientKernel> {
        let mut kernels = vec![DirectionalGradientKernel::new(self.azimuth, self.smooth)];
        if self.bidirectional {
            kernels.push(DirectionalGradientKernel::new(self.azimuth + 90.0, self.smooth));
        }
        kernels
    }
}

/// Hillshade algorithm
#[derive(Debug, Clone, Default)]
pub struct Hillshade;

impl Algorithm for Hillshade {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = HillshadeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Hillshade"
    }

    fn description(&self) -> &'static str {
        "Calculate shaded relief from a DEM"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        hillshade(&input, params)
    }
}

/// Calculate hillshade from a DEM in memory
///
/// # Returns
/// Raster with illumination in `[0, 1]`
pub fn hillshade(dem: &Raster<f64>, params: HillshadeParams) -> Result<Raster<f64>> {
    let settings = EngineSettings {
        buffer_pixels: usize::MAX,
        ..Default::default()
    };
    let mut buffer = RasterBuffer::new(dem, OutputSpec::memory(), settings)?;
    hillshade_chunked(&mut buffer, &params, &Silent)?;
    buffer.into_raster()
}

/// Calculate hillshade chunk by chunk into `buffer` and finalise it.
///
/// Cancellation is polled after every kernel cell.
pub fn hillshade_chunked(
    buffer: &mut RasterBuffer<'_>,
    params: &HillshadeParams,
    feedback: &dyn Feedback,
) -> Result<()> {
    params.validate()?;

    let kernels = params.kernels();
    let half = kernels[0].half();
    let overlap = kernels[0].size() + usize::from(params.smooth);

    let shape = buffer.shape();
    let axis = ChunkAxis::Columns;
    let plan = ChunkPlan::new(shape, buffer.settings().chunk_len(shape, axis))
        .axis(axis)
        .overlap(overlap);

    let pixel_x = buffer.info().pixel_size.0;
    let zenith = (90.0 - params.altitude).to_radians();
    let weight = 1.0 / kernels.len() as f64;
    debug!(
        "Hillshade: azimuth={}, altitude={}, {}x{} kernel, {} light(s)",
        params.azimuth,
        params.altitude,
        kernels[0].size(),
        kernels[0].size(),
        kernels.len()
    );

    let (rows, cols) = plan.buffer_shape();
    let padded_shape = (rows + 2 * half, cols + 2 * half);
    let mut z = Array2::<f64>::zeros((rows, cols));
    let mut padded = Array2::<f64>::zeros(padded_shape);
    let mut along = Array2::<f64>::zeros(padded_shape);
    let mut across = Array2::<f64>::zeros(padded_shape);
    let mut light = Array2::<f64>::zeros((rows, cols));

    let fill = Some(buffer.settings().nodata_fill);
    let cells: usize = kernels.iter().map(|k| k.cells().len()).sum();
    let steps = (plan.len() * cells) as f64;
    let mut done = 0usize;

    for chunk in plan.iter() {
        let (h, w) = chunk.read_view.shape();
        let mut data = z.slice_mut(s![..h, ..w]);
        buffer.read(&chunk.source, data.view_mut(), fill)?;

        let mut padded = padded.slice_mut(s![..h + 2 * half, ..w + 2 * half]);
        pad_replicate(data.view(), padded.view_mut(), half);

        let mut light = light.slice_mut(s![..h, ..w]);
        light.fill(0.0);

        for kernel in &kernels {
            let mut along = along.slice_mut(s![..h + 2 * half, ..w + 2 * half]);
            let mut across = across.slice_mut(s![..h + 2 * half, ..w + 2 * half]);
            along.fill(0.0);
            across.fill(0.0);

            for (dy, dx, w_along, w_across) in kernel.cells() {
                let pair = ViewPair::new(dy, dx, padded.dim());
                let shifted = pair.shifted.view(&padded);
                if w_along != 0.0 {
                    pair.center.view_mut(&mut along).scaled_add(w_along, &shifted);
                }
                if w_across != 0.0 {
                    pair.center.view_mut(&mut across).scaled_add(w_across, &shifted);
                }
                done += 1;
                feedback.report(100.0 * done as f64 / steps);
                feedback.checkpoint()?;
            }

            let norm = kernel.normalizer(pixel_x);
            Zip::from(&mut light)
                .and(&along.slice(s![half..half + h, half..half + w]))
                .and(&across.slice(s![half..half + h, half..half + w]))
                .for_each(|out, &g_along, &g_across| {
                    let g_along = g_along / norm * params.longitudinal;
                    let g_across = g_across / norm * params.lateral;
                    *out += weight * illumination(g_along, g_across, zenith);
                });
        }

        let core = light.slice(s![chunk.write_view.rows(), chunk.write_view.cols()]);
        buffer.accumulate(core, &chunk.dest, AccumulateMode::Overwrite, true)?;
    }

    buffer.finalize()
}

/// Lambertian reflectance for slopes along and across the light direction,
/// with the light `zenith` radians from vertical. Slopes facing the light
/// are positive.
///
/// Surfaces turned away from the light by more than 90 degrees would give
/// a negative cosine. The result is clamped to zero there, so the output
/// is always in `[0, 1]`.
pub fn illumination(g_along: f64, g_across: f64, zenith: f64) -> f64 {
    ((g_along.atan() - zenith).cos() * g_across.atan().cos()).max(0.0)
}

/// Copy `src` into the middle of `dst` and extend its edges outward by
/// `pad` cells
fn pad_replicate(src: ArrayView2<'_, f64>, mut dst: ArrayViewMut2<'_, f64>, pad: usize) {
    let (rows, cols) = src.dim();
    Zip::indexed(&mut dst).for_each(|(r, c), out| {
        let r = r.saturating_sub(pad).min(rows - 1);
        let c = c.saturating_sub(pad).min(cols - 1);
        *out = src[[r, c]];
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_1_SQRT_2;
    use terrashade_core::GeoTransform;

    fn plane(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Raster<f64> {
        let mut dem = Raster::from_array(Array2::from_shape_fn((rows, cols), |(r, c)| f(r, c)));
        dem.set_transform(GeoTransform::new(0.0, 0.0, 10.0, -10.0));
        dem
    }

    #[test]
    fn test_flat_is_cos_altitude_for_any_azimuth() {
        let dem = plane(10, 10, |_, _| 100.0);
        for &azimuth in &[0.0, 37.0, 135.0, 315.0] {
            for &smooth in &[false, true] {
                let params = HillshadeParams {
                    azimuth,
                    smooth,
                    ..Default::default()
                };
                let result = hillshade(&dem, params).unwrap();
                for v in result.data().iter() {
                    assert_relative_eq!(*v, FRAC_1_SQRT_2, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_slope_facing_the_sun() {
        // rises southward at 45°: faces north
        let dem = plane(9, 9, |r, _| r as f64 * 10.0);
        let toward = hillshade(
            &dem,
            HillshadeParams {
                azimuth: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        let away = hillshade(
            &dem,
            HillshadeParams {
                azimuth: 180.0,
                ..Default::default()
            },
        )
        .unwrap();

        assert_relative_eq!(toward.get(4, 4).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(away.get(4, 4).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_illumination_reduces_to_cosine() {
        let zenith = 45f64.to_radians();
        let theta = 20f64.to_radians();
        assert_relative_eq!(illumination(theta.tan(), 0.0, zenith), (theta - zenith).cos(), epsilon = 1e-12);
        // clamped on the shadow side
        assert_eq!(illumination(-10.0, 0.0, zenith), 0.0);
        assert_eq!(illumination(-3.0, 2.0, 80f64.to_radians()), 0.0);
    }

    #[test]
    fn test_range_and_bidirectional() {
        let dem = plane(12, 12, |r, c| ((r * 7 + c * 13) % 10) as f64 * 3.0);
        for bidirectional in [false, true] {
            let result = hillshade(
                &dem,
                HillshadeParams {
                    bidirectional,
                    ..Default::default()
                },
            )
            .unwrap();
            assert!(result.data().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_chunked_matches_single_chunk() {
        let dem = plane(8, 23, |r, c| ((r as f64 * 0.9).sin() * 15.0) + (c as f64 * 0.3).cos() * 20.0);
        let params = HillshadeParams {
            azimuth: 200.0,
            smooth: true,
            ..Default::default()
        };
        let whole = hillshade(&dem, params.clone()).unwrap();

        let settings = EngineSettings {
            chunk_pixels: 8 * 5,
            ..Default::default()
        };
        let mut buffer = RasterBuffer::new(&dem, OutputSpec::memory(), settings).unwrap();
        hillshade_chunked(&mut buffer, &params, &Silent).unwrap();
        let chunked = buffer.into_raster().unwrap();
        for (a, b) in whole.data().iter().zip(chunked.data().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rejects_altitude_out_of_range() {
        let dem = plane(3, 3, |_, _| 0.0);
        let params = HillshadeParams {
            altitude: 95.0,
            ..Default::default()
        };
        assert!(matches!(
            hillshade(&dem, params),
            Err(Error::InvalidParameter { name: "altitude", .. })
        ));
    }

    #[test]
    fn test_pad_replicate() {
        let src = ndarray::arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let mut dst = Array2::zeros((4, 4));
        pad_replicate(src.view(), dst.view_mut(), 1);
        assert_eq!(dst.row(0).to_vec(), vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(dst.row(3).to_vec(), vec![3.0, 3.0, 4.0, 4.0]);
    }
}
