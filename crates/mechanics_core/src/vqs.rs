//! VQS transforms: translation (V), rotation quaternion (Q), scale (S).
//!
//! Bone poses and object transforms are exchanged as `Vqs` values. The
//! interpolation helpers are the ones the IK transition playback and the
//! path follower use.

use bevy::math::{Mat4, Quat, Vec3};
use bevy::prelude::Transform;

/// Below this, two quaternions are close enough to lerp instead of slerp.
const SLERP_LINEAR_THRESHOLD: f32 = 1.0 - f32::EPSILON;

/// Translation, rotation and uniform scale.
///
/// `scale` is stored per axis so it converts to and from [`Transform`], but
/// composition and [`Vqs::inverse`] assume all three components are equal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vqs {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Vqs {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Vqs {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_translation_rotation(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
            scale: Vec3::ONE,
        }
    }

    /// Apply scale, then rotation, then translation to a point.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * (self.scale * point) + self.translation
    }

    /// Apply scale and rotation to a direction (no translation).
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * (self.scale * vector)
    }

    /// Compose two transforms: the result applies `child` first, then `self`.
    pub fn mul_vqs(&self, child: &Vqs) -> Vqs {
        Vqs {
            translation: self.transform_point(child.translation),
            rotation: (self.rotation * child.rotation).normalize(),
            scale: self.scale * child.scale,
        }
    }

    /// Inverse transform. Exact for uniform scale; zero scale components
    /// invert to zero.
    pub fn inverse(&self) -> Vqs {
        let inv_scale = Vec3::new(
            safe_recip(self.scale.x),
            safe_recip(self.scale.y),
            safe_recip(self.scale.z),
        );
        let inv_rotation = self.rotation.inverse();
        Vqs {
            translation: inv_scale * (inv_rotation * -self.translation),
            rotation: inv_rotation,
            scale: inv_scale,
        }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Blend two transforms: lerp translation, slerp rotation, elerp scale.
    pub fn interpolate(&self, other: &Vqs, t: f32) -> Vqs {
        Vqs {
            translation: lerp(self.translation, other.translation, t),
            rotation: slerp(self.rotation, other.rotation, t),
            scale: elerp(self.scale, other.scale, t),
        }
    }
}

impl std::ops::Mul for Vqs {
    type Output = Vqs;

    fn mul(self, rhs: Vqs) -> Vqs {
        self.mul_vqs(&rhs)
    }
}

impl From<Vqs> for Transform {
    fn from(vqs: Vqs) -> Self {
        Transform {
            translation: vqs.translation,
            rotation: vqs.rotation,
            scale: vqs.scale,
        }
    }
}

impl From<&Transform> for Vqs {
    fn from(transform: &Transform) -> Self {
        Vqs {
            translation: transform.translation,
            rotation: transform.rotation,
            scale: transform.scale,
        }
    }
}

fn safe_recip(value: f32) -> f32 {
    if value.abs() < f32::EPSILON {
        0.0
    } else {
        1.0 / value
    }
}

// =============================================================================
// Interpolation
// =============================================================================

pub fn lerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    (1.0 - t) * a + t * b
}

/// Spherical interpolation along the shortest path.
///
/// Falls back to a normalized lerp when the inputs are nearly identical,
/// where `sin(alpha)` would vanish.
pub fn slerp(a: Quat, b: Quat, t: f32) -> Quat {
    let mut b = b;
    let mut cos_theta = a.dot(b);

    if cos_theta < 0.0 {
        b = -b;
        cos_theta = -cos_theta;
    }

    if cos_theta > SLERP_LINEAR_THRESHOLD {
        return (a * (1.0 - t) + b * t).normalize();
    }

    let alpha = cos_theta.acos();
    let sin_alpha = alpha.sin();
    let t1 = ((1.0 - t) * alpha).sin() / sin_alpha;
    let t2 = (t * alpha).sin() / sin_alpha;
    (a * t1 + b * t2).normalize()
}

/// Exponential interpolation, used for scale: `a * (b / a)^t` per axis.
///
/// Axes where either endpoint is non-positive fall back to linear.
pub fn elerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let axis = |a: f32, b: f32| {
        if a <= 0.0 || b <= 0.0 {
            (1.0 - t) * a + t * b
        } else {
            a * (b / a).powf(t)
        }
    };
    Vec3::new(axis(a.x, b.x), axis(a.y, b.y), axis(a.z, b.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_compose_applies_child_first() {
        let parent = Vqs::new(Vec3::new(1.0, 0.0, 0.0), Quat::from_rotation_z(std::f32::consts::FRAC_PI_2), Vec3::ONE);
        let child = Vqs::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let world = parent * child;
        // child offset (1,0,0) rotated 90 degrees about Z is (0,1,0), then shifted by (1,0,0)
        assert!(approx(world.translation, Vec3::new(1.0, 1.0, 0.0)), "got {:?}", world.translation);
    }

    #[test]
    fn test_inverse_round_trip() {
        let vqs = Vqs::new(
            Vec3::new(3.0, -2.0, 0.5),
            Quat::from_euler(bevy::math::EulerRot::XYZ, 0.3, 1.1, -0.4),
            Vec3::splat(2.5),
        );
        let p = Vec3::new(0.7, 0.2, -1.3);
        let back = vqs.inverse().transform_point(vqs.transform_point(p));
        assert!(approx(back, p), "got {:?}", back);

        let identity = vqs * vqs.inverse();
        assert!(approx(identity.translation, Vec3::ZERO), "got {:?}", identity.translation);
        assert!(identity.rotation.angle_between(Quat::IDENTITY) < 1e-4);
        assert!(approx(identity.scale, Vec3::ONE));
    }

    #[test]
    fn test_to_mat4_matches_transform_point() {
        let vqs = Vqs::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_x(0.8), Vec3::splat(2.0));
        let p = Vec3::new(-1.0, 0.5, 0.25);
        assert!(approx(vqs.to_mat4().transform_point3(p), vqs.transform_point(p)));
    }

    #[test]
    fn test_slerp_endpoints_and_midpoint() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_y(1.0);
        assert!(slerp(a, b, 0.0).abs_diff_eq(a, 1e-5));
        assert!(slerp(a, b, 1.0).abs_diff_eq(b, 1e-5));
        let mid = slerp(a, b, 0.5);
        assert!(mid.abs_diff_eq(Quat::from_rotation_y(0.5), 1e-5));
    }

    #[test]
    fn test_elerp_is_geometric() {
        let s = elerp(Vec3::splat(1.0), Vec3::splat(4.0), 0.5);
        assert!(approx(s, Vec3::splat(2.0)));
    }

    #[test]
    fn test_into_bevy_transform() {
        let vqs = Vqs::from_translation(Vec3::new(0.0, 5.0, 0.0));
        let transform: Transform = vqs.into();
        assert_eq!(transform.translation, Vec3::new(0.0, 5.0, 0.0));
    }
}
