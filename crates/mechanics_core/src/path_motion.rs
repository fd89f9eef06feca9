//! Moving an object along a spline at a controlled speed.
//!
//! Normalised time `t` goes through a parabolic ease-in / constant /
//! ease-out distance-time curve to give normalised arc length `s`, which the
//! spline's arc-length table turns into a position. Orientation comes from a
//! centre of interest a little way ahead on the curve.

use bevy::math::{Mat3, Quat, Vec3};

use crate::config::{EaseInOutConfig, SplineConfig};
use crate::spline::{Spline, SplineResult};

/// Arc-length offset between the look-ahead samples.
const LOOK_AHEAD_STEP: f32 = 0.001;
const LOOK_AHEAD_SAMPLES: usize = 3;

// =============================================================================
// Ease in / out
// =============================================================================

/// Velocity ramps up linearly until `t1`, holds at `vc` until `t2`, then
/// ramps down to zero at `t = 1`. `vc` is chosen so `distance(1) == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EaseInOut {
    t1: f32,
    t2: f32,
    vc: f32,
}

impl Default for EaseInOut {
    fn default() -> Self {
        Self::from(&EaseInOutConfig::default())
    }
}

impl From<&EaseInOutConfig> for EaseInOut {
    fn from(config: &EaseInOutConfig) -> Self {
        Self::new(config.t1, config.t2)
    }
}

impl EaseInOut {
    /// Breakpoints are clamped into `0 <= t1 <= t2 <= 1`.
    pub fn new(t1: f32, t2: f32) -> Self {
        let t1 = t1.clamp(0.0, 1.0);
        let t2 = t2.clamp(t1, 1.0);
        Self {
            t1,
            t2,
            vc: 2.0 / (1.0 - t1 + t2),
        }
    }

    pub fn t1(&self) -> f32 {
        self.t1
    }

    pub fn t2(&self) -> f32 {
        self.t2
    }

    /// Cruise velocity.
    pub fn cruise_velocity(&self) -> f32 {
        self.vc
    }

    /// Normalised distance travelled at normalised time `t`.
    pub fn distance(&self, t: f32) -> f32 {
        let Self { t1, t2, vc } = *self;
        if t <= t1 {
            if t1 == 0.0 {
                return 0.0;
            }
            return vc * t * t / (2.0 * t1);
        }
        if t >= t2 {
            if t2 >= 1.0 {
                return vc * (t2 - t1 / 2.0);
            }
            return vc * (t - t2) * (2.0 - t - t2) / (2.0 * (1.0 - t2)) + vc * (t2 - t1 / 2.0);
        }
        vc * (t - t1 / 2.0)
    }

    /// Normalised velocity at normalised time `t`.
    pub fn velocity(&self, t: f32) -> f32 {
        let Self { t1, t2, vc } = *self;
        if t <= t1 {
            if t1 == 0.0 {
                return 0.0;
            }
            return vc * t / t1;
        }
        if t >= t2 {
            if t2 >= 1.0 {
                return 0.0;
            }
            return vc * (1.0 - t) / (1.0 - t2);
        }
        vc
    }
}

// =============================================================================
// Orientation
// =============================================================================

/// Forward-facing frame at arc length `s`: `W` toward the centre of
/// interest, `U = up x W`, `V = W x U`.
pub fn path_frame(spline: &Spline, s: f32, up: Vec3) -> (Vec3, Quat) {
    let position = spline.position_at_arc_length(s);
    let ahead = look_ahead(spline, s, 1.0);

    // past the end the samples clamp onto the last point; look back instead
    let forward = (ahead - position)
        .try_normalize()
        .or_else(|| (position - look_ahead(spline, s, -1.0)).try_normalize())
        .unwrap_or(Vec3::Z);

    let u = up.cross(forward).try_normalize().unwrap_or(Vec3::X);
    let v = forward.cross(u).normalize();
    let rotation = Quat::from_mat3(&Mat3::from_cols(u, v, forward)).normalize();
    (position, rotation)
}

fn look_ahead(spline: &Spline, s: f32, sign: f32) -> Vec3 {
    let sum: Vec3 = (1..=LOOK_AHEAD_SAMPLES)
        .map(|k| spline.position_at_arc_length(s + sign * LOOK_AHEAD_STEP * k as f32))
        .sum();
    sum / LOOK_AHEAD_SAMPLES as f32
}

// =============================================================================
// Follower
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSample {
    pub position: Vec3,
    pub rotation: Quat,
    /// Normalised arc length.
    pub s: f32,
    /// Normalised velocity from the ease curve; drives animation playback.
    pub speed: f32,
}

/// Progress of one object along one spline.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFollower {
    /// Normalised time, wraps to zero after passing 1.
    pub t: f32,
    /// Seconds for one traversal.
    pub duration: f32,
    pub ease: EaseInOut,
    pub up: Vec3,
}

impl Default for PathFollower {
    fn default() -> Self {
        Self {
            t: 0.0,
            duration: 10.0,
            ease: EaseInOut::default(),
            up: Vec3::Y,
        }
    }
}

impl PathFollower {
    pub fn new(duration: f32, ease: EaseInOut) -> Self {
        Self {
            duration,
            ease,
            ..Self::default()
        }
    }

    /// Pose at the current time without advancing.
    pub fn sample(&self, spline: &Spline) -> PathSample {
        let s = self.ease.distance(self.t);
        let (position, rotation) = path_frame(spline, s, self.up);
        PathSample {
            position,
            rotation,
            s,
            speed: self.ease.velocity(self.t),
        }
    }

    /// Sample, then move time forward by `dt` seconds.
    pub fn advance(&mut self, spline: &Spline, dt: f32) -> PathSample {
        if self.t > 1.0 {
            self.t = 0.0;
        }
        let sample = self.sample(spline);
        if self.duration > 0.0 {
            self.t += dt / self.duration;
        }
        sample
    }
}

/// Three-point path from `start` to `goal` on the ground plane, bowed
/// sideways by `offset` along +X at the midpoint.
pub fn approach_path(start: Vec3, goal: Vec3, offset: f32, config: SplineConfig) -> SplineResult<Spline> {
    let first = start.with_y(0.0);
    let last = goal.with_y(0.0);
    let middle = (first + last) * 0.5 + Vec3::X * offset;
    Spline::with_config(vec![first, middle, last], config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ease_distance_is_normalised_and_continuous() {
        let ease = EaseInOut::default();
        assert!((ease.cruise_velocity() - 2.0 / (1.0 - 0.44 + 0.84)).abs() < 1e-6);
        assert_eq!(ease.distance(0.0), 0.0);
        assert!((ease.distance(1.0) - 1.0).abs() < 1e-5, "s(1) = {}", ease.distance(1.0));

        // continuous at both breakpoints
        for t in [ease.t1(), ease.t2()] {
            let before = ease.distance(t - 1e-4);
            let after = ease.distance(t + 1e-4);
            assert!((after - before).abs() < 1e-3);
        }
    }

    #[test]
    fn test_ease_distance_is_monotonic() {
        let ease = EaseInOut::default();
        let mut last = 0.0;
        for i in 1..=100 {
            let s = ease.distance(i as f32 / 100.0);
            assert!(s >= last);
            last = s;
        }
    }

    #[test]
    fn test_ease_velocity_profile() {
        let ease = EaseInOut::new(0.25, 0.75);
        assert_eq!(ease.velocity(0.0), 0.0);
        assert!((ease.velocity(0.5) - ease.cruise_velocity()).abs() < 1e-6, "cruise between breakpoints");
        assert!(ease.velocity(1.0).abs() < 1e-6, "stops at the end");
        // integral of velocity is the distance
        let steps = 1000;
        let integral: f32 = (0..steps)
            .map(|i| ease.velocity((i as f32 + 0.5) / steps as f32) / steps as f32)
            .sum();
        assert!((integral - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_ramps_are_constant_speed() {
        let ease = EaseInOut::new(0.0, 1.0);
        assert!((ease.cruise_velocity() - 1.0).abs() < 1e-6);
        assert!((ease.distance(0.3) - 0.3).abs() < 1e-6);
        assert!((ease.distance(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_faces_along_straight_path() {
        let spline = Spline::new(vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0)]).unwrap();
        let (position, rotation) = path_frame(&spline, 0.5, Vec3::Y);
        assert!((position - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-3);
        // local +Z (W) maps onto the direction of travel
        assert!((rotation * Vec3::Z - Vec3::Z).length() < 1e-3);
        assert!((rotation * Vec3::Y - Vec3::Y).length() < 1e-3, "V stays up on flat ground");
    }

    #[test]
    fn test_frame_at_end_still_faces_forward() {
        let spline = Spline::new(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)]).unwrap();
        let (_, rotation) = path_frame(&spline, 1.0, Vec3::Y);
        assert!(rotation.is_finite());
        assert!((rotation * Vec3::Z - Vec3::X).length() < 1e-3);
    }

    #[test]
    fn test_follower_wraps_after_one_traversal() {
        let spline = Spline::new(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)]).unwrap();
        let mut follower = PathFollower::new(1.0, EaseInOut::default());
        let mut last_x = -1.0;
        for _ in 0..10 {
            let sample = follower.advance(&spline, 0.1);
            assert!(sample.position.x >= last_x, "moves forward before wrapping");
            last_x = sample.position.x;
        }
        // t is now just past 1; the next advance wraps
        assert!(follower.t > 1.0 - 1e-4);
        follower.advance(&spline, 0.05);
        let sample = follower.advance(&spline, 0.05);
        assert!(sample.position.x < 1.0, "back near the start, got {}", sample.position.x);
    }

    #[test]
    fn test_approach_path_flattens_and_bows() {
        let path = approach_path(Vec3::new(0.0, 3.0, 0.0), Vec3::new(0.0, 1.0, 4.0), 1.0, SplineConfig::default()).unwrap();
        let points = path.control_points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], Vec3::ZERO);
        assert_eq!(points[1], Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(points[2], Vec3::new(0.0, 0.0, 4.0));
    }
}
