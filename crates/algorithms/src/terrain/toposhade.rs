//! Toposhade: topographic position with the neighborhood pulled toward the
//! light.
//!
//! A uniform TPI whose centre of mass is displaced toward the light
//! azimuth. Slopes facing the light come out brighter than those facing
//! away, which reads as soft shading that keeps the relative height of
//! each cell.

use super::denoise::Denoise;
use super::neighborhood::WeightMode;
use super::tpi::{tpi, tpi_chunked, MassOffset, TpiParams};
use terrashade_core::raster::Raster;
use terrashade_core::{Algorithm, Error, Result};
use terrashade_engine::{Feedback, RasterBuffer};

/// How far the centre of mass moves, relative to the radius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadeStrength {
    Weak,
    #[default]
    Medium,
    Strong,
}

impl ShadeStrength {
    /// Offset distance in whole pixels for `radius`.
    ///
    /// `Strong` uses `radius - 1` rather than the full radius: the offset
    /// must stay strictly below the radius for the near and far halves of
    /// each scan line to exist.
    pub fn offset_distance(self, radius: usize) -> usize {
        match self {
            ShadeStrength::Weak => (radius as f64 / 1.5).floor() as usize,
            ShadeStrength::Medium => (radius as f64 / 1.25).floor() as usize,
            ShadeStrength::Strong => radius.saturating_sub(1),
        }
    }
}

/// Parameters for toposhade
#[derive(Debug, Clone, PartialEq)]
pub struct ToposhadeParams {
    /// Neighborhood radius in cells
    pub radius: usize,
    /// Light direction in degrees clockwise from north
    pub azimuth: f64,
    pub strength: ShadeStrength,
    pub denoise: Denoise,
}

impl Default for ToposhadeParams {
    fn default() -> Self {
        Self {
            radius: 3,
            azimuth: 315.0,
            strength: ShadeStrength::Medium,
            denoise: Denoise::None,
        }
    }
}

impl ToposhadeParams {
    /// The equivalent TPI configuration
    pub fn to_tpi(&self) -> TpiParams {
        TpiParams {
            radius: self.radius,
            mode: WeightMode::Uniform,
            exclude: 0,
            offset: Some(MassOffset {
                distance: self.strength.offset_distance(self.radius) as f64,
                azimuth: self.azimuth,
            }),
            denoise: self.denoise,
        }
    }
}

/// Toposhade algorithm
#[derive(Debug, Clone, Default)]
pub struct Toposhade;

impl Algorithm for Toposhade {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = ToposhadeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Toposhade"
    }

    fn description(&self) -> &'static str {
        "Topographic position with the centre of mass displaced toward the light"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        toposhade(&input, params)
    }
}

/// Calculate toposhade in memory
pub fn toposhade(dem: &Raster<f64>, params: ToposhadeParams) -> Result<Raster<f64>> {
    tpi(dem, params.to_tpi())
}

/// Calculate toposhade chunk by chunk into `buffer` and finalise it
pub fn toposhade_chunked(
    buffer: &mut RasterBuffer<'_>,
    params: &ToposhadeParams,
    feedback: &dyn Feedback,
) -> Result<()> {
    tpi_chunked(buffer, &params.to_tpi(), feedback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use terrashade_core::GeoTransform;

    #[test]
    fn test_offset_distance() {
        assert_eq!(ShadeStrength::Weak.offset_distance(3), 2);
        assert_eq!(ShadeStrength::Medium.offset_distance(3), 2);
        assert_eq!(ShadeStrength::Strong.offset_distance(3), 2);
        assert_eq!(ShadeStrength::Weak.offset_distance(10), 6);
        assert_eq!(ShadeStrength::Medium.offset_distance(10), 8);
        assert_eq!(ShadeStrength::Strong.offset_distance(10), 9);
        assert_eq!(ShadeStrength::Strong.offset_distance(1), 0);
    }

    #[test]
    fn test_offset_stays_below_radius() {
        for radius in 1..=12 {
            for strength in [ShadeStrength::Weak, ShadeStrength::Medium, ShadeStrength::Strong] {
                assert!(strength.offset_distance(radius) < radius, "{:?} radius {}", strength, radius);
            }
            assert_eq!(ShadeStrength::Strong.offset_distance(radius), radius - 1);
        }
    }

    #[test]
    fn test_flat_surface_stays_flat() {
        let mut dem = Raster::filled(12, 12, 300.0);
        dem.set_transform(GeoTransform::new(0.0, 0.0, 10.0, -10.0));
        let out = toposhade(&dem, ToposhadeParams::default()).unwrap();
        for v in out.data().iter() {
            assert!(v.abs() < 1e-9, "flat toposhade gave {}", v);
        }
    }

    #[test]
    fn test_opposite_light_flips_contrast() {
        // ridge running north-south along the middle column
        let mut dem = Raster::from_array(Array2::from_shape_fn((15, 13), |(_, c)| {
            100.0 - 10.0 * (c as f64 - 6.0).abs()
        }));
        dem.set_transform(GeoTransform::new(0.0, 0.0, 10.0, -10.0));

        let lit = |azimuth| {
            toposhade(
                &dem,
                ToposhadeParams {
                    radius: 4,
                    azimuth,
                    ..Default::default()
                },
            )
            .unwrap()
        };
        let west = lit(270.0);
        let east = lit(90.0);

        let (a, b) = (west.get(7, 4).unwrap(), west.get(7, 8).unwrap());
        let (c, d) = (east.get(7, 4).unwrap(), east.get(7, 8).unwrap());
        assert!((a - b) * (c - d) < 0.0, "west {} {}, east {} {}", a, b, c, d);
    }
}
