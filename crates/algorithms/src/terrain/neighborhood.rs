//! Weighted neighborhood means along scan lines.
//!
//! The neighborhood of a cell is sampled along a few straight lines through
//! it (vertical, horizontal and optionally both diagonals), up to `radius`
//! cells away on either side. Every line is walked in one direction only:
//! for a pair of cells `r` steps apart, the cell at the origin of the step
//! receives its partner's elevation and the partner receives the origin's,
//! so one [`ViewPair`] serves both directions.
//!
//! When the weights do not depend on elevation the total weight reaching
//! each cell is a function of the geometry alone. It is then computed once
//! per run ([`visits_matrix`]) instead of being summed for every chunk.

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Zip};
use terrashade_engine::{ChunkAxis, ViewPair};

/// How neighbors are weighted by their distance or elevation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightMode {
    /// Every neighbor counts the same
    #[default]
    Uniform,
    /// Weight grows with distance, `w = r`
    Distance,
    /// Weight shrinks with distance, `w = radius + 1 - r`
    InverseDistance,
    /// Weight is the absolute elevation difference to the neighbor
    ElevationDifference,
}

/// Weight of a neighbor at one radial step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadialWeight {
    Constant(f64),
    ElevationDifference,
}

impl WeightMode {
    /// Weight table entry for a neighbor `r` steps from the center
    pub fn radial_weight(self, r: usize, radius: usize) -> RadialWeight {
        match self {
            WeightMode::Uniform => RadialWeight::Constant(1.0),
            WeightMode::Distance => RadialWeight::Constant(r as f64),
            WeightMode::InverseDistance => RadialWeight::Constant((radius + 1 - r) as f64),
            WeightMode::ElevationDifference => RadialWeight::ElevationDifference,
        }
    }

    /// Whether the weights depend on geometry only
    pub fn is_geometric(self) -> bool {
        !matches!(self, WeightMode::ElevationDifference)
    }
}

/// A line through each cell along which neighbors are sampled.
///
/// `limit` moves the centre of mass of the line: neighbors beyond `|limit|`
/// steps on one side weigh more than those on the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLine {
    pub dy: isize,
    pub dx: isize,
    pub limit: isize,
}

impl ScanLine {
    pub fn vertical(limit: isize) -> Self {
        Self { dy: 1, dx: 0, limit }
    }

    pub fn horizontal(limit: isize) -> Self {
        Self { dy: 0, dx: 1, limit }
    }

    /// Down and to the right
    pub fn descending(limit: isize) -> Self {
        Self { dy: 1, dx: 1, limit }
    }

    /// Up and to the right
    pub fn ascending(limit: isize) -> Self {
        Self { dy: -1, dx: 1, limit }
    }

    pub fn is_diagonal(&self) -> bool {
        self.dy != 0 && self.dx != 0
    }
}

/// Weight factors for non-square pixels.
///
/// The two axis factors sum to 2; a diagonal is weighted by the inverse of
/// its length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCorrection {
    pub x: f64,
    pub y: f64,
    pub diagonal: f64,
}

impl PixelCorrection {
    /// Factors for pixels of `pixel_x` by `pixel_y` metres
    pub fn new(pixel_x: f64, pixel_y: f64) -> Self {
        // horizontal lines get the y/x ratio and vice versa
        let mut y = pixel_x / pixel_y;
        let mut x = pixel_y / pixel_x;
        if x < 1.0 {
            y = 2.0 - x;
        } else if y < 1.0 {
            x = 2.0 - y;
        }
        Self {
            x,
            y,
            diagonal: (x * x + y * y).sqrt(),
        }
    }

    pub fn square() -> Self {
        Self::new(1.0, 1.0)
    }

    /// Multiplier for the weights of `line`
    pub fn factor(&self, line: &ScanLine) -> f64 {
        if line.is_diagonal() {
            1.0 / self.diagonal
        } else if line.dx != 0 {
            self.x
        } else {
            self.y
        }
    }
}

/// Scale factors `(near, far)` for a pair `r` steps apart on a line with
/// centre-of-mass `limit`.
///
/// `near` applies to the value received by the origin of the step, `far` to
/// the value received by its partner. Beyond `|limit|` the partner weighs
/// `radius / (radius - |limit|)`, the origin `radius / (radius + |limit|)`;
/// a negative limit swaps them. Within `|limit|` both use the smaller one.
pub fn mass_split(r: usize, radius: usize, limit: isize) -> (f64, f64) {
    if limit == 0 {
        return (1.0, 1.0);
    }
    let l = limit.unsigned_abs() as f64;
    let radius = radius as f64;
    let light = radius / (radius + l);
    if r as f64 > l {
        let heavy = radius / (radius - l);
        if limit < 0 {
            (heavy, light)
        } else {
            (light, heavy)
        }
    } else {
        (light, light)
    }
}

/// Everything needed to weigh one pair of cells
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairWeight {
    pub radial: RadialWeight,
    pub correction: f64,
    pub near: f64,
    pub far: f64,
}

impl PairWeight {
    fn base(&self, z_center: f64, z_shifted: f64) -> f64 {
        let w = match self.radial {
            RadialWeight::Constant(w) => w,
            RadialWeight::ElevationDifference => (z_shifted - z_center).abs(),
        };
        w * self.correction
    }
}

/// Contribution to a weighted sum
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Delta {
    pub sum: f64,
    pub weight: f64,
}

/// Both contributions of one mirrored pair: `[center, shifted]`.
///
/// The center cell receives the shifted cell's elevation with the `near`
/// weight, the shifted cell receives the center's with the `far` weight.
#[inline]
pub fn mirrored_deltas(z_center: f64, z_shifted: f64, weight: &PairWeight) -> [Delta; 2] {
    let w = weight.base(z_center, z_shifted);
    let near = w * weight.near;
    let far = w * weight.far;
    [
        Delta {
            sum: z_shifted * near,
            weight: near,
        },
        Delta {
            sum: z_center * far,
            weight: far,
        },
    ]
}

/// Total weight reaching each cell of a `shape` grid when every line of
/// `lines` is walked from `1 + exclude` to `radius`.
///
/// Returns `None` for elevation-dependent weights or when a line has a
/// centre-of-mass limit, since the total then depends on the data.
pub fn visits_matrix(
    shape: (usize, usize),
    radius: usize,
    exclude: usize,
    mode: WeightMode,
    lines: &[ScanLine],
    correction: &PixelCorrection,
) -> Option<Array2<f64>> {
    if !mode.is_geometric() || lines.iter().any(|l| l.limit != 0) {
        return None;
    }

    // cumulative[d]: weight of all steps up to distance d
    let mut cumulative = vec![0.0; radius + 1];
    for r in 1..=radius {
        let w = match mode.radial_weight(r, radius) {
            RadialWeight::Constant(w) if r > exclude => w,
            _ => 0.0,
        };
        cumulative[r] = cumulative[r - 1] + w;
    }

    let (rows, cols) = shape;
    let reach = |i: usize, n: usize, step: isize| -> usize {
        match step {
            0 => usize::MAX,
            s if s > 0 => n - 1 - i,
            _ => i,
        }
    };

    Some(Array2::from_shape_fn(shape, |(i, j)| {
        lines
            .iter()
            .map(|line| {
                let ahead = reach(i, rows, line.dy).min(reach(j, cols, line.dx));
                let behind = reach(i, rows, -line.dy).min(reach(j, cols, -line.dx));
                correction.factor(line)
                    * (cumulative[ahead.min(radius)] + cumulative[behind.min(radius)])
            })
            .sum::<f64>()
    }))
}

/// Per-chunk weighted sums for the topographic position index.
///
/// Buffers are allocated once for the largest chunk; each chunk uses the
/// top-left corner of the size passed to [`reset`](Self::reset).
pub struct NeighborhoodAccumulator {
    radius: usize,
    exclude: usize,
    mode: WeightMode,
    correction: PixelCorrection,
    sum: Array2<f64>,
    count: Array2<f64>,
    visits: Option<Array2<f64>>,
    center_delta: Array2<f64>,
    center_weight: Array2<f64>,
    shifted_delta: Array2<f64>,
    shifted_weight: Array2<f64>,
    active: (usize, usize),
}

impl NeighborhoodAccumulator {
    pub fn new(
        buffer_shape: (usize, usize),
        radius: usize,
        exclude: usize,
        mode: WeightMode,
        correction: PixelCorrection,
        lines: &[ScanLine],
    ) -> Self {
        let visits = visits_matrix(buffer_shape, radius, exclude, mode, lines, &correction);
        Self {
            radius,
            exclude,
            mode,
            correction,
            sum: Array2::zeros(buffer_shape),
            count: Array2::zeros(buffer_shape),
            visits,
            center_delta: Array2::zeros(buffer_shape),
            center_weight: Array2::zeros(buffer_shape),
            shifted_delta: Array2::zeros(buffer_shape),
            shifted_weight: Array2::zeros(buffer_shape),
            active: buffer_shape,
        }
    }

    /// Whether the weight totals come from the geometry
    pub fn has_precomputed_count(&self) -> bool {
        self.visits.is_some()
    }

    /// Start a chunk of `shape`, which must fit the buffers
    pub fn reset(&mut self, shape: (usize, usize)) {
        let (rows, cols) = self.sum.dim();
        assert!(
            shape.0 <= rows && shape.1 <= cols,
            "chunk {:?} larger than accumulator {:?}",
            shape,
            (rows, cols)
        );
        self.active = shape;
        self.sum.fill(0.0);
        if self.visits.is_none() {
            self.count.fill(0.0);
        }
    }

    /// Add every step of `line` from `1 + exclude` to `radius`
    pub fn accumulate_line(&mut self, z: ArrayView2<'_, f64>, line: &ScanLine) {
        assert_eq!(z.dim(), self.active, "elevations do not match the active chunk");
        let correction = self.correction.factor(line);
        let track_count = self.visits.is_none();

        for r in (1 + self.exclude)..=self.radius {
            let pair = ViewPair::new(r as isize * line.dy, r as isize * line.dx, z.dim());
            if pair.is_empty() {
                continue;
            }
            let (near, far) = mass_split(r, self.radius, line.limit);
            let weight = PairWeight {
                radial: self.mode.radial_weight(r, self.radius),
                correction,
                near,
                far,
            };

            let (h, w) = pair.shape();
            let mut center_delta = self.center_delta.slice_mut(s![..h, ..w]);
            let mut center_weight = self.center_weight.slice_mut(s![..h, ..w]);
            let mut shifted_delta = self.shifted_delta.slice_mut(s![..h, ..w]);
            let mut shifted_weight = self.shifted_weight.slice_mut(s![..h, ..w]);

            Zip::from(&mut center_delta)
                .and(&mut center_weight)
                .and(&mut shifted_delta)
                .and(&mut shifted_weight)
                .and(&pair.center.view(&z))
                .and(&pair.shifted.view(&z))
                .for_each(|cd, cw, sd, sw, &zc, &zs| {
                    let [center, shifted] = mirrored_deltas(zc, zs, &weight);
                    *cd = center.sum;
                    *cw = center.weight;
                    *sd = shifted.sum;
                    *sw = shifted.weight;
                });

            let mut sum = pair.center.view_mut(&mut self.sum);
            sum += &center_delta;
            let mut sum = pair.shifted.view_mut(&mut self.sum);
            sum += &shifted_delta;

            if track_count {
                let mut count = pair.center.view_mut(&mut self.count);
                count += &center_weight;
                let mut count = pair.shifted.view_mut(&mut self.count);
                count += &shifted_weight;
            }
        }
    }

    /// Replace `z` by `z - weighted mean` of its neighborhood.
    ///
    /// With `far_edge`, the chunk ends at the grid edge along that axis
    /// even though it is shorter than the buffer: the trailing `radius`
    /// entries of the precomputed totals are copied from the end of the
    /// buffer-shaped matrix. Cells without any weight get 0.
    pub fn normalize(&mut self, mut z: ArrayViewMut2<'_, f64>, far_edge: Option<ChunkAxis>) {
        assert_eq!(z.dim(), self.active, "elevations do not match the active chunk");
        let (h, w) = self.active;

        if let Some(visits) = &self.visits {
            self.count.slice_mut(s![..h, ..w]).assign(&visits.slice(s![..h, ..w]));
            if let Some(axis) = far_edge {
                let (bh, bw) = visits.dim();
                match axis {
                    ChunkAxis::Columns => {
                        let k = self.radius.min(w);
                        self.count
                            .slice_mut(s![..h, w - k..w])
                            .assign(&visits.slice(s![..h, bw - k..bw]));
                    }
                    ChunkAxis::Rows => {
                        let k = self.radius.min(h);
                        self.count
                            .slice_mut(s![h - k..h, ..w])
                            .assign(&visits.slice(s![bh - k..bh, ..w]));
                    }
                }
            }
        }

        Zip::from(&mut z)
            .and(&self.sum.slice(s![..h, ..w]))
            .and(&self.count.slice(s![..h, ..w]))
            .for_each(|z, &sum, &count| {
                *z = if count > 0.0 { *z - sum / count } else { 0.0 };
            });
    }

    /// Running totals of the active chunk
    #[cfg(test)]
    fn running_count(&self) -> ArrayView2<'_, f64> {
        let (h, w) = self.active;
        self.count.slice(s![..h, ..w])
    }

    #[cfg(test)]
    fn without_precomputed_count(mut self) -> Self {
        self.visits = None;
        self
    }
}
