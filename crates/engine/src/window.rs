//! Chunked traversal of a grid with overlapping halos.
//!
//! A grid is cut into full-length slabs along one scan axis. Each chunk
//! reads its core segment plus a halo on either side, computes on a
//! caller-owned buffer and writes back only the core, so that the written
//! regions partition the grid.

use serde::{Deserialize, Serialize};
use terrashade_core::Region;
use tracing::debug;

/// Axis along which chunks are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChunkAxis {
    /// Full-height column slabs, advancing along x
    #[default]
    Columns,
    /// Full-width row slabs, advancing along y
    Rows,
}

/// One step of a chunked traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position in traversal order
    pub index: usize,
    /// Where `source` lands inside the chunk buffer
    pub read_view: Region,
    /// Grid region to read, core plus halo
    pub source: Region,
    /// The core inside the chunk buffer
    pub write_view: Region,
    /// Grid region owned by this chunk
    pub dest: Region,
    /// Last chunk of the traversal
    pub is_last: bool,
}

impl Chunk {
    /// Whether `source` reaches the far end of the grid along `axis`
    pub fn reaches_far_edge(&self, axis: ChunkAxis, shape: (usize, usize)) -> bool {
        match axis {
            ChunkAxis::Columns => self.source.x + self.source.width == shape.1,
            ChunkAxis::Rows => self.source.y + self.source.height == shape.0,
        }
    }
}

/// Layout of a chunked traversal over a `(rows, cols)` grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    shape: (usize, usize),
    chunk_size: usize,
    axis: ChunkAxis,
    reverse: bool,
    overlap: usize,
    offset: isize,
}

impl ChunkPlan {
    /// Plan with `chunk_size` cells per segment along the scan axis
    pub fn new(shape: (usize, usize), chunk_size: usize) -> Self {
        Self {
            shape,
            chunk_size: chunk_size.max(1),
            axis: ChunkAxis::default(),
            reverse: false,
            overlap: 0,
            offset: 0,
        }
    }

    pub fn axis(mut self, axis: ChunkAxis) -> Self {
        self.axis = axis;
        self
    }

    /// Walk segments from the far end toward zero
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Halo width on each side of a segment
    pub fn overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    /// Skew of the read window along the scan axis. A positive offset moves
    /// halo from before the segment to after it.
    ///
    /// The skew is the same for every chunk. It is not multiplied by the
    /// step index, which would let later read windows drift off the
    /// segments they must cover. Segment boundaries do not depend on it.
    pub fn offset(mut self, offset: isize) -> Self {
        self.offset = offset;
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Grid length along the scan axis
    pub fn scan_len(&self) -> usize {
        match self.axis {
            ChunkAxis::Columns => self.shape.1,
            ChunkAxis::Rows => self.shape.0,
        }
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        (self.scan_len() + self.chunk_size - 1) / self.chunk_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn halo(&self) -> (usize, usize) {
        let overlap = self.overlap as isize;
        (
            (overlap - self.offset).max(0) as usize,
            (overlap + self.offset).max(0) as usize,
        )
    }

    /// Shape of a buffer large enough for any chunk of this plan
    pub fn buffer_shape(&self) -> (usize, usize) {
        let (before, after) = self.halo();
        let scan = (self.chunk_size + before + after).min(self.scan_len());
        match self.axis {
            ChunkAxis::Columns => (self.shape.0, scan),
            ChunkAxis::Rows => (scan, self.shape.1),
        }
    }

    /// Iterate the chunks. Calling `iter` again restarts the traversal.
    pub fn iter(&self) -> Chunks<'_> {
        debug!(
            "ChunkPlan: {}x{} grid, {:?} slabs of {}, overlap={}, offset={}, reverse={} -> {} chunks",
            self.shape.0,
            self.shape.1,
            self.axis,
            self.chunk_size,
            self.overlap,
            self.offset,
            self.reverse,
            self.len()
        );
        Chunks {
            plan: self,
            next: 0,
        }
    }

    /// The chunk at traversal position `index`
    fn chunk(&self, index: usize) -> Chunk {
        let count = self.len();
        let segment = if self.reverse { count - 1 - index } else { index };

        let len = self.scan_len();
        let start = segment * self.chunk_size;
        let end = (start + self.chunk_size).min(len);

        let (before, after) = self.halo();
        let src_start = start.saturating_sub(before);
        let src_end = (end + after).min(len);

        let (source, dest, read_view, write_view) = match self.axis {
            ChunkAxis::Columns => {
                let rows = self.shape.0;
                (
                    Region::new(src_start, 0, src_end - src_start, rows),
                    Region::new(start, 0, end - start, rows),
                    Region::new(0, 0, src_end - src_start, rows),
                    Region::new(start - src_start, 0, end - start, rows),
                )
            }
            ChunkAxis::Rows => {
                let cols = self.shape.1;
                (
                    Region::new(0, src_start, cols, src_end - src_start),
                    Region::new(0, start, cols, end - start),
                    Region::new(0, 0, cols, src_end - src_start),
                    Region::new(0, start - src_start, cols, end - start),
                )
            }
        };

        debug!(
            "Chunk {}: source=[{}-{}], dest=[{}-{}] along {:?}",
            index, src_start, src_end, start, end, self.axis
        );

        Chunk {
            index,
            read_view,
            source,
            write_view,
            dest,
            is_last: index + 1 == count,
        }
    }
}

/// Lazy iterator over the chunks of a [`ChunkPlan`]
pub struct Chunks<'a> {
    plan: &'a ChunkPlan,
    next: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.plan.len() {
            return None;
        }
        let chunk = self.plan.chunk(self.next);
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for Chunks<'a> {}
