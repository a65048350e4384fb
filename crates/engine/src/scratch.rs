//! Disk-backed random-access grid for outputs too large to buffer.

use ndarray::{ArrayView2, ArrayViewMut2};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use terrashade_core::{Region, Result};

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Row-major little-endian `f32` grid in an anonymous temporary file.
///
/// The file is removed by the OS once the store is dropped. A fresh store
/// reads as all zeros.
#[derive(Debug)]
pub struct ScratchStore {
    file: File,
    rows: usize,
    cols: usize,
    bytes: Vec<u8>,
}

impl ScratchStore {
    /// Create a zeroed store, in `dir` or the system temp directory
    pub fn create(rows: usize, cols: usize, dir: Option<&Path>) -> Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        file.set_len((rows * cols * SAMPLE_BYTES) as u64)?;
        Ok(Self {
            file,
            rows,
            cols,
            bytes: Vec::new(),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn seek_to(&mut self, row: usize, col: usize) -> Result<()> {
        let pos = ((row * self.cols + col) * SAMPLE_BYTES) as u64;
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Read `region` into `out`, which must have the region's shape
    pub fn read_region(&mut self, region: &Region, mut out: ArrayViewMut2<'_, f64>) -> Result<()> {
        assert!(region.is_within(self.rows, self.cols), "region {:?} outside scratch store", region);
        assert_eq!(out.dim(), region.shape());

        self.bytes.resize(region.width * SAMPLE_BYTES, 0);
        for (i, row) in region.rows().enumerate() {
            self.seek_to(row, region.x)?;
            self.file.read_exact(&mut self.bytes)?;
            for (dst, raw) in out.row_mut(i).iter_mut().zip(self.bytes.chunks_exact(SAMPLE_BYTES)) {
                *dst = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64;
            }
        }
        Ok(())
    }

    /// Overwrite `region` with `values`
    pub fn write_region(&mut self, region: &Region, values: ArrayView2<'_, f64>) -> Result<()> {
        assert!(region.is_within(self.rows, self.cols), "region {:?} outside scratch store", region);
        assert_eq!(values.dim(), region.shape());

        for (i, row) in region.rows().enumerate() {
            self.bytes.clear();
            for &v in values.row(i) {
                self.bytes.extend_from_slice(&(v as f32).to_le_bytes());
            }
            self.seek_to(row, region.x)?;
            self.file.write_all(&self.bytes)?;
        }
        Ok(())
    }

    /// Read one full row
    pub fn read_row(&mut self, row: usize, out: &mut [f64]) -> Result<()> {
        let region = Region::new(0, row, self.cols, 1);
        let view = ArrayViewMut2::from_shape((1, self.cols), out)
            .map_err(|e| terrashade_core::Error::Other(e.to_string()))?;
        self.read_region(&region, view)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_fresh_store_reads_zero() {
        let mut store = ScratchStore::create(3, 4, None).unwrap();
        let mut row = vec![1.0; 4];
        store.read_row(2, &mut row).unwrap();
        assert_eq!(row, vec![0.0; 4]);
    }

    #[test]
    fn test_region_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ScratchStore::create(5, 6, Some(dir.path())).unwrap();
        let values = Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as f64 + 0.5);
        let region = Region::new(2, 1, 3, 2);
        store.write_region(&region, values.view()).unwrap();
        store.flush().unwrap();

        let mut back = Array2::zeros((2, 3));
        store.read_region(&region, back.view_mut()).unwrap();
        assert_eq!(back, values);

        let mut row = vec![0.0; 6];
        store.read_row(2, &mut row).unwrap();
        assert_eq!(row, vec![0.0, 0.0, 3.5, 4.5, 5.5, 0.0]);
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_region_panics() {
        let mut store = ScratchStore::create(2, 2, None).unwrap();
        let values = Array2::zeros((1, 2));
        let _ = store.write_region(&Region::new(1, 0, 2, 1), values.view());
    }
}
