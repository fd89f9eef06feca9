//! Quaternion helpers shared by the IK solver and the rigid body integrator.
//!
//! Rotations are plain `bevy::math::Quat` values. This module only adds the
//! handful of operations the solvers need that glam does not spell out the
//! way we use them (antiparallel-safe arc rotation, shortest-arc angle,
//! the tilde matrix, pivot rotations).

use bevy::math::{Mat3, Mat4, Quat, Vec3};

/// Below this squared length a direction is treated as zero.
const DIRECTION_EPSILON: f32 = 1e-10;

/// Minimal rotation taking direction `from` onto direction `to`.
///
/// Inputs do not need to be normalized. A zero-length input yields the
/// identity. When the directions are antiparallel the rotation is a half
/// turn about an axis perpendicular to `from` (`Z × from`, or `X × from`
/// when `from` is parallel to Z).
pub fn rotation_between(from: Vec3, to: Vec3) -> Quat {
    if from.length_squared() < DIRECTION_EPSILON || to.length_squared() < DIRECTION_EPSILON {
        return Quat::IDENTITY;
    }

    let from = from.normalize();
    let to = to.normalize();
    let cos_theta = from.dot(to);

    if cos_theta < -1.0 + f32::EPSILON {
        let mut axis = Vec3::Z.cross(from);
        if axis.length_squared() < f32::EPSILON {
            axis = Vec3::X.cross(from);
        }
        return Quat::from_axis_angle(axis.normalize(), std::f32::consts::PI);
    }

    // Melax: q = (cross / s, s / 2) with s = sqrt(2 (1 + cos))
    let axis = from.cross(to);
    let s = ((1.0 + cos_theta) * 2.0).sqrt();
    let inv_s = 1.0 / s;
    Quat::from_xyzw(axis.x * inv_s, axis.y * inv_s, axis.z * inv_s, s * 0.5).normalize()
}

/// Rotation angle of `q` along the shortest arc, in `[0, π]`.
pub fn angle_of(q: Quat) -> f32 {
    let w = q.w.abs().min(1.0);
    2.0 * w.acos()
}

/// Axis and shortest-arc angle of `q`. Returns `(Vec3::X, 0.0)` for a
/// rotation too small to have a meaningful axis.
pub fn axis_angle_shortest(q: Quat) -> (Vec3, f32) {
    let q = if q.w < 0.0 { -q } else { q };
    let v = Vec3::new(q.x, q.y, q.z);
    let sin_half = v.length();
    if sin_half < 1e-7 {
        return (Vec3::X, 0.0);
    }
    (v / sin_half, 2.0 * sin_half.atan2(q.w))
}

/// Skew-symmetric matrix of `v`, so that `tilde(v) * x == v.cross(x)`.
pub fn tilde(v: Vec3) -> Mat3 {
    // columns
    Mat3::from_cols(
        Vec3::new(0.0, v.z, -v.y),
        Vec3::new(-v.z, 0.0, v.x),
        Vec3::new(v.y, -v.x, 0.0),
    )
}

/// Convert a (possibly drifted) rotation matrix back to a unit quaternion.
pub fn orthonormalize(m: Mat3) -> Quat {
    let q = Quat::from_mat3(&m);
    if q.length_squared() < DIRECTION_EPSILON || !q.is_finite() {
        return Quat::IDENTITY;
    }
    q.normalize()
}

/// Translate-rotate-untranslate: rotation `q` applied about `pivot`.
pub fn rotate_about_point(pivot: Vec3, q: Quat) -> Mat4 {
    Mat4::from_translation(pivot) * Mat4::from_quat(q) * Mat4::from_translation(-pivot)
}

/// Clamp `q` so that its shortest-arc angle does not exceed `max_angle`
/// radians. The rotation axis is preserved.
pub fn clamp_angle(q: Quat, max_angle: f32) -> Quat {
    let (axis, angle) = axis_angle_shortest(q);
    if angle <= max_angle {
        return q;
    }
    Quat::from_axis_angle(axis, max_angle)
}
