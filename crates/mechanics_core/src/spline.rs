//! Interpolating cubic spline with arc-length reparametrisation.
//!
//! The curve passes through every control point `P_k` at parameter `t = k`,
//! so `t` runs over `[0, degree]` where `degree = n - 1`. It is written in
//! the truncated power basis
//!
//! ```text
//! f(t) = a0 + a1 t + a2 t^2 + a3 t^3 + sum_{j=1}^{degree-1} b_j (t - j)^3_+
//! ```
//!
//! giving `degree + 3` unknowns per coordinate. The `degree + 1`
//! interpolation rows plus the two natural boundary rows
//! (`f''(0) = f''(degree) = 0`) make a square system that is solved once for
//! x, y and z together.
//!
//! Moving along the curve at a controlled speed needs the inverse of the
//! arc-length function, so every spline carries an [`ArcLengthTable`]
//! mapping normalised parameter `u` to normalised distance `s`.

use bevy::math::{Vec3, Vec4};
use nalgebra::DMatrix;

use crate::config::{ArcLengthMethod, SplineConfig};
use crate::debug_draw::LineBatch;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SplineError {
    /// An interpolating spline needs at least two points.
    NotEnoughControlPoints { found: usize },
    /// The basis matrix could not be factorised.
    SingularSystem,
    /// Control point index past the end.
    IndexOutOfRange { index: usize, len: usize },
}

impl std::fmt::Display for SplineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplineError::NotEnoughControlPoints { found } => {
                write!(f, "Spline needs at least {} control points, got {}", MIN_CONTROL_POINTS, found)
            }
            SplineError::SingularSystem => write!(f, "Spline system is singular"),
            SplineError::IndexOutOfRange { index, len } => {
                write!(f, "Control point index {} out of range (len {})", index, len)
            }
        }
    }
}

impl std::error::Error for SplineError {}

pub type SplineResult<T> = Result<T, SplineError>;

pub const MIN_CONTROL_POINTS: usize = 2;

/// Below this total length the curve is treated as a single point.
const DEGENERATE_LENGTH: f32 = 1e-9;

// =============================================================================
// Basis helpers
// =============================================================================

/// `(t - c)^3` for `t >= c`, zero before the knot.
fn truncated_cubic(t: f64, c: f64) -> f64 {
    if t < c {
        0.0
    } else {
        (t - c).powi(3)
    }
}

/// Second derivative of [`truncated_cubic`].
fn truncated_cubic_dd(t: f64, c: f64) -> f64 {
    if t < c {
        0.0
    } else {
        6.0 * (t - c)
    }
}

/// One row of basis values at `t`: `1, t, t^2, t^3, (t - k_j)^3_+ ...`.
fn basis_row(t: f64, knots: &[f64]) -> impl Iterator<Item = f64> + '_ {
    (0..4)
        .map(move |power| t.powi(power))
        .chain(knots.iter().map(move |&k| truncated_cubic(t, k)))
}

/// Second derivative of every basis function at `t`.
fn basis_row_dd(t: f64, knots: &[f64]) -> impl Iterator<Item = f64> + '_ {
    [0.0, 0.0, 2.0, 6.0 * t]
        .into_iter()
        .chain(knots.iter().map(move |&k| truncated_cubic_dd(t, k)))
}

/// Solve for the `(degree + 3) x 3` coefficient matrix.
fn solve_coefficients(points: &[Vec3], knots: &[f64]) -> SplineResult<DMatrix<f64>> {
    let degree = points.len() - 1;
    let size = degree + 3;

    let mut system = DMatrix::<f64>::zeros(size, size);
    let mut rhs = DMatrix::<f64>::zeros(size, 3);

    for (row, point) in points.iter().enumerate() {
        for (col, value) in basis_row(row as f64, knots).enumerate() {
            system[(row, col)] = value;
        }
        rhs[(row, 0)] = point.x as f64;
        rhs[(row, 1)] = point.y as f64;
        rhs[(row, 2)] = point.z as f64;
    }

    // natural boundary: f''(0) = 0, f''(degree) = 0
    for (col, value) in basis_row_dd(0.0, knots).enumerate() {
        system[(degree + 1, col)] = value;
    }
    for (col, value) in basis_row_dd(degree as f64, knots).enumerate() {
        system[(degree + 2, col)] = value;
    }

    system.lu().solve(&rhs).ok_or(SplineError::SingularSystem)
}

// =============================================================================
// Spline
// =============================================================================

#[derive(Debug, Clone)]
pub struct Spline {
    control_points: Vec<Vec3>,
    knots: Vec<f64>,
    coefficients: DMatrix<f64>,
    polyline: Vec<Vec3>,
    table: ArcLengthTable,
    config: SplineConfig,
    dirty: bool,
}

impl Spline {
    /// Fit a spline through `points` with the default arc-length settings.
    pub fn new(points: Vec<Vec3>) -> SplineResult<Self> {
        Self::with_config(points, SplineConfig::default())
    }

    pub fn with_config(points: Vec<Vec3>, config: SplineConfig) -> SplineResult<Self> {
        if points.len() < MIN_CONTROL_POINTS {
            return Err(SplineError::NotEnoughControlPoints { found: points.len() });
        }
        let mut spline = Self {
            control_points: points,
            knots: Vec::new(),
            coefficients: DMatrix::zeros(0, 3),
            polyline: Vec::new(),
            table: ArcLengthTable::default(),
            config,
            dirty: true,
        };
        spline.rebuild()?;
        Ok(spline)
    }

    /// Number of spans; the parameter range is `[0, degree]`.
    pub fn degree(&self) -> usize {
        self.control_points.len() - 1
    }

    /// Position at `t` in `[0, degree]`. Values outside are clamped.
    pub fn evaluate(&self, t: f32) -> Vec3 {
        let t = (t as f64).clamp(0.0, self.degree() as f64);
        let mut out = [0.0f64; 3];
        for (row, basis) in basis_row(t, &self.knots).enumerate() {
            for (axis, value) in out.iter_mut().enumerate() {
                *value += basis * self.coefficients[(row, axis)];
            }
        }
        Vec3::new(out[0] as f32, out[1] as f32, out[2] as f32)
    }

    /// Position at normalised parameter `u` in `[0, 1]`.
    pub fn evaluate_normalized(&self, u: f32) -> Vec3 {
        self.evaluate(u * self.degree() as f32)
    }

    /// Bezier curve over the same control polygon, `t` in `[0, 1]`.
    pub fn de_casteljau(&self, t: f32) -> Vec3 {
        let mut row = self.control_points.clone();
        while row.len() > 1 {
            for i in 0..row.len() - 1 {
                row[i] = row[i].lerp(row[i + 1], t);
            }
            row.pop();
        }
        row[0]
    }

    pub fn control_points(&self) -> &[Vec3] {
        &self.control_points
    }

    /// Move a control point. Takes effect on the next [`Spline::update`].
    pub fn set_control_point(&mut self, index: usize, point: Vec3) -> SplineResult<()> {
        let len = self.control_points.len();
        let slot = self
            .control_points
            .get_mut(index)
            .ok_or(SplineError::IndexOutOfRange { index, len })?;
        *slot = point;
        self.dirty = true;
        Ok(())
    }

    /// Append a control point, extending the curve by one span.
    pub fn push_control_point(&mut self, point: Vec3) {
        self.control_points.push(point);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Re-solve the system and rebuild the polyline and arc-length table if
    /// any control point changed. Returns whether a rebuild happened.
    pub fn update(&mut self) -> SplineResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.rebuild()?;
        Ok(true)
    }

    fn rebuild(&mut self) -> SplineResult<()> {
        let degree = self.degree();
        self.knots = (1..degree).map(|k| k as f64).collect();
        self.coefficients = solve_coefficients(&self.control_points, &self.knots)?;
        self.polyline = self.sample_polyline();
        self.table = match self.config.method {
            ArcLengthMethod::ForwardDifferencing => {
                ArcLengthTable::forward_differencing(self, self.config.forward_step)
            }
            ArcLengthMethod::Adaptive => ArcLengthTable::adaptive(
                self,
                self.config.adaptive_epsilon,
                self.config.adaptive_gamma,
                self.config.adaptive_min_width,
            ),
        };
        self.dirty = false;
        Ok(())
    }

    /// `6 n` samples per unit of `t`, both endpoints included.
    fn sample_polyline(&self) -> Vec<Vec3> {
        let per_unit = 6 * self.control_points.len();
        let count = per_unit * self.degree();
        (0..count)
            .map(|i| self.evaluate(i as f32 / per_unit as f32))
            .chain(std::iter::once(self.evaluate(self.degree() as f32)))
            .collect()
    }

    pub fn polyline(&self) -> &[Vec3] {
        &self.polyline
    }

    pub fn arc_length_table(&self) -> &ArcLengthTable {
        &self.table
    }

    /// Total arc length as measured by the table.
    pub fn length(&self) -> f32 {
        self.table.total_length
    }

    /// Position at normalised arc length `s` in `[0, 1]`.
    pub fn position_at_arc_length(&self, s: f32) -> Vec3 {
        self.evaluate_normalized(self.table.u_at(s))
    }

    /// Curve as a line strip, control points as small crosses.
    pub fn debug_lines(&self, curve_color: Vec4, point_color: Vec4, marker_size: f32) -> LineBatch {
        let mut batch = LineBatch::default();
        batch.push_strip(&self.polyline, curve_color);
        let half = marker_size * 0.5;
        for p in &self.control_points {
            for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
                batch.push_line(*p - axis * half, *p + axis * half, point_color);
            }
        }
        batch
    }
}

// =============================================================================
// Arc-length table
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcLengthEntry {
    /// Normalised curve parameter.
    pub u: f32,
    /// Normalised arc length from the start.
    pub s: f32,
    pub point: Vec3,
}

/// Monotonic `u -> s` samples with an inverse lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArcLengthTable {
    entries: Vec<ArcLengthEntry>,
    total_length: f32,
}

impl ArcLengthTable {
    /// Uniform steps of `step` in `u`, chord lengths accumulated.
    pub fn forward_differencing(spline: &Spline, step: f32) -> Self {
        let count = (1.0 / step.clamp(f32::EPSILON, 1.0)).round().max(1.0) as usize;
        let mut entries = Vec::with_capacity(count + 1);
        entries.push(ArcLengthEntry {
            u: 0.0,
            s: 0.0,
            point: spline.evaluate_normalized(0.0),
        });
        for i in 1..=count {
            let u = i as f32 / count as f32;
            let point = spline.evaluate_normalized(u);
            let previous = entries[entries.len() - 1];
            entries.push(ArcLengthEntry {
                u,
                s: previous.s + point.distance(previous.point),
                point,
            });
        }
        Self::normalized(entries)
    }

    /// Bisect `[0, 1]` until every interval is flat enough (`epsilon`) and
    /// narrow enough (`gamma`). Intervals narrower than `min_width` are
    /// accepted regardless so a cusp cannot recurse forever.
    pub fn adaptive(spline: &Spline, epsilon: f32, gamma: f32, min_width: f32) -> Self {
        let mut entries = vec![ArcLengthEntry {
            u: 0.0,
            s: 0.0,
            point: spline.evaluate_normalized(0.0),
        }];

        let mut stack = vec![(0.0f32, 1.0f32)];
        while let Some((ua, ub)) = stack.pop() {
            let um = 0.5 * (ua + ub);
            let pa = spline.evaluate_normalized(ua);
            let pm = spline.evaluate_normalized(um);
            let pb = spline.evaluate_normalized(ub);

            let a = pa.distance(pm);
            let b = pm.distance(pb);
            let chord_error = a + b - pa.distance(pb);
            let width = ub - ua;

            if (chord_error > epsilon || width > gamma) && width > min_width {
                // left half on top so intervals are accepted in order
                stack.push((um, ub));
                stack.push((ua, um));
                continue;
            }

            let last = entries[entries.len() - 1];
            let sa = last.s + pa.distance(last.point);
            let sm = sa + a;
            entries.push(ArcLengthEntry { u: um, s: sm, point: pm });
            entries.push(ArcLengthEntry { u: ub, s: sm + b, point: pb });
        }
        Self::normalized(entries)
    }

    fn normalized(mut entries: Vec<ArcLengthEntry>) -> Self {
        let total_length = entries.last().map(|e| e.s).unwrap_or(0.0);
        if total_length > DEGENERATE_LENGTH {
            for entry in &mut entries {
                entry.s /= total_length;
            }
        } else {
            // zero-length curve: fall back to s = u so lookups stay defined
            for entry in &mut entries {
                entry.s = entry.u;
            }
        }
        Self { entries, total_length }
    }

    pub fn entries(&self) -> &[ArcLengthEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_length(&self) -> f32 {
        self.total_length
    }

    /// Normalised parameter at normalised arc length `s`, clamped to
    /// `[0, 1]`. Binary search for the bracketing pair, then lerp.
    pub fn u_at(&self, s: f32) -> f32 {
        let (Some(first), Some(last)) = (self.entries.first(), self.entries.last()) else {
            return s.clamp(0.0, 1.0);
        };
        let s = s.clamp(0.0, 1.0);
        let upper = self.entries.partition_point(|e| e.s < s);
        if upper == 0 {
            return first.u;
        }
        if upper >= self.entries.len() {
            return last.u;
        }
        let lo = self.entries[upper - 1];
        let hi = self.entries[upper];
        let span = hi.s - lo.s;
        if span <= f32::EPSILON {
            return hi.u;
        }
        let k = (s - lo.s) / span;
        lo.u + k * (hi.u - lo.u)
    }
}
