//! Directional gradient kernels for arbitrary azimuths.
//!
//! A 3x3 (or spread 5x5) finite-difference kernel estimates the gradient
//! toward an azimuth between 0° and 45° from the grid axes by mixing the
//! axis-aligned and the diagonal difference with weights `tan s` and
//! `1 - tan s`. Transposing and flipping the kernel covers the other
//! octants; the 90° rotation of the kernel gives the perpendicular
//! gradient.

use ndarray::{arr2, Array2};

/// Kernel pair estimating the gradient along and across an azimuth
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalGradientKernel {
    azimuth: f64,
    fold: f64,
    along: Array2<f64>,
    across: Array2<f64>,
}

impl DirectionalGradientKernel {
    /// Kernels for `azimuth` (degrees clockwise from north); `smooth` uses
    /// the 5x5 spread version.
    pub fn new(azimuth: f64, smooth: bool) -> Self {
        let azimuth = azimuth.rem_euclid(360.0);
        let steep = !((45.0..=135.0).contains(&azimuth) || (225.0..=315.0).contains(&azimuth));
        let reverse_y = (90.0..=270.0).contains(&azimuth);
        let reverse_x = (0.0..=180.0).contains(&azimuth);

        // angle to the nearest grid axis, 0..=45
        let mut fold = azimuth % 90.0;
        if fold > 45.0 {
            fold = 90.0 - fold;
        }
        let a = fold.to_radians().tan();
        let b = 1.0 - a;

        let mut along = if smooth {
            arr2(&[
                [-1.0, 0.0, -a, 0.0, b],
                [0.0, 0.0, 0.0, 0.0, 0.0],
                [-1.0, 0.0, 0.0, 0.0, 1.0],
                [0.0, 0.0, 0.0, 0.0, 0.0],
                [-b, 0.0, a, 0.0, 1.0],
            ])
        } else {
            arr2(&[[-1.0, -a, b], [-1.0, 0.0, 1.0], [-b, a, 1.0]])
        };

        if steep {
            along = along.reversed_axes().as_standard_layout().to_owned();
        }
        if reverse_y {
            along.invert_axis(ndarray::Axis(0));
        }
        if reverse_x {
            along.invert_axis(ndarray::Axis(1));
        }
        let along = along.as_standard_layout().to_owned();

        let n = along.nrows();
        let across = Array2::from_shape_fn((n, n), |(i, j)| along[[j, n - 1 - i]]);

        Self {
            azimuth,
            fold,
            along,
            across,
        }
    }

    /// Azimuth in `[0, 360)`
    pub fn azimuth(&self) -> f64 {
        self.azimuth
    }

    /// Angle between the azimuth and the nearest grid axis, in degrees
    pub fn fold(&self) -> f64 {
        self.fold
    }

    /// Side length of the kernels
    pub fn size(&self) -> usize {
        self.along.nrows()
    }

    pub fn half(&self) -> usize {
        self.size() / 2
    }

    pub fn along(&self) -> &Array2<f64> {
        &self.along
    }

    pub fn across(&self) -> &Array2<f64> {
        &self.across
    }

    /// Divisor turning a kernel sum into a slope: the distance spanned by the
    /// kernel along the azimuth times the total positive weight.
    pub fn normalizer(&self, pixel_x: f64) -> f64 {
        let pixel = pixel_x / self.fold.to_radians().cos();
        let distance = (self.size() - 1) as f64 * pixel;
        let weights: f64 = self.along.iter().filter(|&&w| w > 0.0).sum();
        distance * weights
    }

    /// Cells where either kernel is non-zero, as `(dy, dx, along, across)`
    /// relative to the kernel centre
    pub fn cells(&self) -> Vec<(isize, isize, f64, f64)> {
        let h = self.half() as isize;
        self.along
            .indexed_iter()
            .filter_map(|((y, x), &w)| {
                let w2 = self.across[[y, x]];
                (w != 0.0 || w2 != 0.0).then_some((y as isize - h, x as isize - h, w, w2))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn test_north_kernel() {
        let k = DirectionalGradientKernel::new(0.0, false);
        assert_eq!(k.fold(), 0.0);
        // south minus north
        assert_eq!(
            k.along(),
            &arr2(&[[-1.0, -1.0, -1.0], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]])
        );
        // east minus west
        assert_eq!(
            k.across(),
            &arr2(&[[-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0]])
        );
    }

    #[test]
    fn test_south_kernel_is_reversed() {
        let north = DirectionalGradientKernel::new(0.0, false);
        let south = DirectionalGradientKernel::new(180.0, false);
        assert_eq!(south.along(), &north.along().mapv(|v| -v));
    }

    #[test]
    fn test_negative_azimuth_wraps() {
        let k = DirectionalGradientKernel::new(-45.0, false);
        assert_eq!(k.azimuth(), 315.0);
        assert_eq!(k.along(), DirectionalGradientKernel::new(315.0, false).along());
    }

    #[test]
    fn test_kernels_are_balanced() {
        for &azimuth in &[0.0, 30.0, 45.0, 100.0, 200.0, 315.0, 350.0] {
            for &smooth in &[false, true] {
                let k = DirectionalGradientKernel::new(azimuth, smooth);
                assert_relative_eq!(k.along().sum(), 0.0, epsilon = 1e-12);
                assert_relative_eq!(k.across().sum(), 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_normalizer() {
        let k = DirectionalGradientKernel::new(0.0, false);
        assert_relative_eq!(k.normalizer(10.0), 2.0 * 10.0 * 3.0);

        let diagonal = DirectionalGradientKernel::new(45.0, false);
        // positive weights always sum to 2 + a + b = 3
        assert_relative_eq!(diagonal.normalizer(1.0), 2.0 * 2f64.sqrt() * 3.0, epsilon = 1e-12);

        let smooth = DirectionalGradientKernel::new(0.0, true);
        assert_eq!(smooth.size(), 5);
        assert_relative_eq!(smooth.normalizer(1.0), 4.0 * 3.0);
    }

    #[test]
    fn test_cells_cover_both_kernels() {
        let k = DirectionalGradientKernel::new(90.0, false);
        let cells = k.cells();
        // along has zeros in the middle column, across in the middle row
        assert_eq!(cells.len(), 8);
        assert!(cells.iter().all(|&(dy, dx, _, _)| dy != 0 || dx != 0));
    }
}
