//! Noise reduction applied to elevations before neighborhood analysis

use crate::maybe_rayon::*;
use ndarray::{Array2, ArrayView2};
use terrashade_core::{Error, Result};

/// Denoising applied by the topographic position index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Denoise {
    #[default]
    None,
    /// Sample both diagonals in addition to the orthogonal lines
    Mean,
    /// 3x3 median filter on the elevations first
    Median,
    /// Both of the above
    MeanAndMedian,
}

impl Denoise {
    pub fn uses_diagonals(self) -> bool {
        matches!(self, Denoise::Mean | Denoise::MeanAndMedian)
    }

    pub fn uses_median(self) -> bool {
        matches!(self, Denoise::Median | Denoise::MeanAndMedian)
    }

    pub fn is_active(self) -> bool {
        self != Denoise::None
    }
}

/// 3x3 median filter. Border cells use the part of the window inside the
/// grid; an even count averages the two middle values.
pub fn median_filter(z: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let (rows, cols) = z.dim();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut window = Vec::with_capacity(9);
            let mut row_data = vec![0.0; cols];
            let r0 = row.saturating_sub(1);
            let r1 = (row + 2).min(rows);

            for (col, out) in row_data.iter_mut().enumerate() {
                window.clear();
                for r in r0..r1 {
                    for c in col.saturating_sub(1)..(col + 2).min(cols) {
                        window.push(z[[r, c]]);
                    }
                }
                window.sort_unstable_by(|a, b| a.total_cmp(b));
                let mid = window.len() / 2;
                *out = if window.len() % 2 == 0 {
                    (window[mid - 1] + window[mid]) / 2.0
                } else {
                    window[mid]
                };
            }
            row_data
        })
        .collect();

    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_denoise_flags() {
        assert!(!Denoise::None.is_active());
        assert!(Denoise::Mean.uses_diagonals() && !Denoise::Mean.uses_median());
        assert!(Denoise::Median.uses_median() && !Denoise::Median.uses_diagonals());
        assert!(Denoise::MeanAndMedian.uses_median() && Denoise::MeanAndMedian.uses_diagonals());
    }

    #[test]
    fn test_median_removes_spike() {
        let mut z = Array2::from_elem((5, 5), 10.0);
        z[[2, 2]] = 1000.0;
        let filtered = median_filter(z.view()).unwrap();
        assert!(filtered.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn test_median_at_corner() {
        let z = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let filtered = median_filter(z.view()).unwrap();
        // corner window {1, 2, 4, 5}
        assert_eq!(filtered[[0, 0]], 3.0);
        assert_eq!(filtered[[1, 1]], 5.0);
        // edge window {1, 2, 3, 4, 5, 6}
        assert_eq!(filtered[[0, 1]], 3.5);
    }
}
