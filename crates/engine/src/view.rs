//! Shifted view pairs for moving-window arithmetic.
//!
//! A neighbor-relative operation `out[i, j] op= in[i + dy, j + dx]` becomes
//! one whole-array operation between two equally shaped windows of the same
//! grid: the *shifted* window (the neighbors) and the *center* window (the
//! cells being updated). No per-pixel bounds checks are needed because both
//! windows are clipped to the part of the grid where the neighbor exists.

use ndarray::{s, ArrayBase, ArrayView2, ArrayViewMut2, Data, DataMut, Ix2};

/// Half-open index range with a stride along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, step: usize) -> Self {
        Self {
            start,
            end: end.max(start),
            step: step.max(1),
        }
    }

    fn empty(at: usize) -> Self {
        Self::new(at, at, 1)
    }

    /// Number of indices visited
    pub fn len(&self) -> usize {
        (self.end - self.start + self.step - 1) / self.step
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// A strided rectangular window over a 2-D array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub rows: Span,
    pub cols: Span,
}

impl Window {
    /// Shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.cols.is_empty()
    }

    /// Read-only view of `array` through this window
    ///
    /// # Panics
    /// If the window does not fit inside `array`.
    pub fn view<'a, S>(&self, array: &'a ArrayBase<S, Ix2>) -> ArrayView2<'a, S::Elem>
    where
        S: Data,
    {
        let (r, c) = (self.rows, self.cols);
        array.slice(s![r.start..r.end; r.step as isize, c.start..c.end; c.step as isize])
    }

    /// Mutable view of `array` through this window
    ///
    /// # Panics
    /// If the window does not fit inside `array`.
    pub fn view_mut<'a, S>(&self, array: &'a mut ArrayBase<S, Ix2>) -> ArrayViewMut2<'a, S::Elem>
    where
        S: DataMut,
    {
        let (r, c) = (self.rows, self.cols);
        array.slice_mut(s![r.start..r.end; r.step as isize, c.start..c.end; c.step as isize])
    }
}

/// Matching (shifted, center) windows for one neighbor offset.
///
/// `shifted[k]` is the neighbor at `(dy, dx)` of `center[k]`. Roles are
/// swapped for negative offsets, so both windows always have the shape
/// `shape - |offset|` per axis (less any `edge`). An offset at least as
/// large as the grid yields two empty windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewPair {
    pub shifted: Window,
    pub center: Window,
}

impl ViewPair {
    /// View pair for offset `(dy, dx)` over a grid of `shape = (rows, cols)`
    pub fn new(dy: isize, dx: isize, shape: (usize, usize)) -> Self {
        Self::strided(dy, dx, shape, 1, 0)
    }

    /// View pair visiting every `step`-th cell and skipping `edge` cells on
    /// both ends of each axis.
    pub fn strided(dy: isize, dx: isize, shape: (usize, usize), step: usize, edge: usize) -> Self {
        let (rows_shifted, rows_center) = axis_spans(dy, shape.0, step, edge);
        let (cols_shifted, cols_center) = axis_spans(dx, shape.1, step, edge);
        Self {
            shifted: Window {
                rows: rows_shifted,
                cols: cols_shifted,
            },
            center: Window {
                rows: rows_center,
                cols: cols_center,
            },
        }
    }

    /// Common shape of both windows
    pub fn shape(&self) -> (usize, usize) {
        self.center.shape()
    }

    pub fn is_empty(&self) -> bool {
        self.center.is_empty()
    }
}

/// (shifted, center) spans along one axis
fn axis_spans(offset: isize, size: usize, step: usize, edge: usize) -> (Span, Span) {
    let d = offset.unsigned_abs();
    let end = size.saturating_sub(edge);

    if edge + d >= end {
        return (Span::empty(edge.min(size)), Span::empty(edge.min(size)));
    }

    let shifted = Span::new(edge + d, end, step);
    let center = Span::new(edge, end - d, step);
    if offset < 0 {
        (center, shifted)
    } else {
        (shifted, center)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_zero_offset_is_identity() {
        let pair = ViewPair::new(0, 0, (4, 7));
        assert_eq!(pair.shifted, pair.center);
        assert_eq!(pair.shape(), (4, 7));
    }

    #[test]
    fn test_shapes_shrink_by_offset() {
        for &(dy, dx) in &[(1, 0), (0, -2), (-3, 2), (2, 5)] {
            let pair = ViewPair::new(dy, dx, (8, 9));
            assert_eq!(pair.shifted.shape(), pair.center.shape());
            assert_eq!(
                pair.shape(),
                (8 - dy.unsigned_abs(), 9 - dx.unsigned_abs())
            );
        }
    }

    #[test]
    fn test_shifted_holds_neighbors() {
        let grid = Array2::from_shape_fn((5, 6), |(r, c)| (r * 10 + c) as f64);
        let pair = ViewPair::new(-1, 2, grid.dim());
        let shifted = pair.shifted.view(&grid);
        let center = pair.center.view(&grid);
        for ((i, j), &v) in center.indexed_iter() {
            // neighbor one row up, two columns right
            assert_eq!(shifted[[i, j]], v - 10.0 + 2.0);
        }
    }

    #[test]
    fn test_oversized_offset_is_empty() {
        let pair = ViewPair::new(0, 6, (5, 6));
        assert!(pair.is_empty());
        assert_eq!(pair.shifted.shape(), pair.center.shape());

        let grid = Array2::<f64>::zeros((5, 6));
        assert_eq!(pair.center.view(&grid).len(), 0);
    }

    #[test]
    fn test_strided_with_edge() {
        let pair = ViewPair::strided(2, 0, (10, 10), 2, 1);
        // rows: shifted [3, 9) step 2, center [1, 7) step 2
        assert_eq!(pair.shifted.rows, Span::new(3, 9, 2));
        assert_eq!(pair.center.rows, Span::new(1, 7, 2));
        assert_eq!(pair.shape(), (3, 4));
    }

    #[test]
    fn test_mutable_accumulation() {
        let z = Array2::from_shape_fn((3, 3), |(r, _)| r as f64);
        let mut acc = Array2::<f64>::zeros((3, 3));
        let pair = ViewPair::new(1, 0, z.dim());
        let mut out = pair.center.view_mut(&mut acc);
        out += &pair.shifted.view(&z);
        assert_eq!(acc.row(0).to_vec(), vec![1.0; 3]);
        assert_eq!(acc.row(2).to_vec(), vec![0.0; 3]);
    }
}
