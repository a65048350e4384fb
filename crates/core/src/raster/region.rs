//! Pixel rectangles

use std::ops::Range;

/// A rectangle of pixels in grid coordinates.
///
/// Follows the GDAL convention: `x` is the column offset, `y` the row
/// offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole `rows` x `cols` grid
    pub fn full(rows: usize, cols: usize) -> Self {
        Self::new(0, 0, cols, rows)
    }

    pub fn rows(&self) -> Range<usize> {
        self.y..self.y + self.height
    }

    pub fn cols(&self) -> Range<usize> {
        self.x..self.x + self.width
    }

    /// Shape as (rows, cols), matching ndarray
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region lies entirely inside a `rows` x `cols` grid
    pub fn is_within(&self, rows: usize, cols: usize) -> bool {
        self.y + self.height <= rows && self.x + self.width <= cols
    }

    /// Whether the region reaches both the last row and the last column
    pub fn touches_far_corner(&self, rows: usize, cols: usize) -> bool {
        self.y + self.height == rows && self.x + self.width == cols
    }

    /// Intersection of two regions, `None` when they do not overlap
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x1 > x0 && y1 > y0 {
            Some(Region::new(x0, y0, x1 - x0, y1 - y0))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        let r = Region::new(3, 1, 4, 2);
        assert_eq!(r.rows(), 1..3);
        assert_eq!(r.cols(), 3..7);
        assert_eq!(r.shape(), (2, 4));
        assert_eq!(r.len(), 8);
    }

    #[test]
    fn test_bounds_checks() {
        let r = Region::new(6, 0, 4, 10);
        assert!(r.is_within(10, 10));
        assert!(r.touches_far_corner(10, 10));
        assert!(!Region::new(7, 0, 4, 10).is_within(10, 10));
    }

    #[test]
    fn test_intersection() {
        let a = Region::new(0, 0, 5, 5);
        let b = Region::new(3, 4, 5, 5);
        assert_eq!(a.intersection(&b), Some(Region::new(3, 4, 2, 1)));
        assert_eq!(a.intersection(&Region::new(5, 0, 2, 2)), None);
    }
}
