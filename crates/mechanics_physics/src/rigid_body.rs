//! Rigid link state: mass properties, pose, momenta and the two attachment
//! points its springs pull on.

use bevy::math::{Mat3, Quat, Vec3};

/// Components smaller than this are rounded to zero when computing mass
/// properties, so symmetric shapes get exactly diagonal tensors.
const PRECISION_EPSILON: f32 = 1e-5;

/// Determinant below which an inertia tensor is treated as singular.
const SINGULAR_EPSILON: f32 = 1e-12;

fn clamp_small(v: Vec3) -> Vec3 {
    Vec3::select(v.abs().cmplt(Vec3::splat(PRECISION_EPSILON)), Vec3::ZERO, v)
}

// =============================================================================
// Mass properties
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    pub mass: f32,
    pub inv_mass: f32,
    /// Centre of mass in the points' frame.
    pub center_of_mass: Vec3,
    /// Inertia tensor about the centre of mass, body frame.
    pub inertia: Mat3,
    /// Inverse of `inertia`, zero when the tensor is singular.
    pub inv_inertia: Mat3,
}

impl MassProperties {
    /// Treat each point as a particle of `point_mass`.
    pub fn from_points(points: &[Vec3], point_mass: f32) -> Self {
        let mass = point_mass * points.len() as f32;
        if mass <= 0.0 {
            return Self::from_inertia(0.0, Vec3::ZERO, Mat3::ZERO);
        }

        let weighted: Vec3 = points.iter().map(|p| *p * point_mass).sum();
        let center_of_mass = clamp_small(weighted / mass);

        let mut inertia = Mat3::ZERO;
        for p in points {
            let r = *p - center_of_mass;
            // m (|r|^2 I - r r^T)
            inertia += (Mat3::from_diagonal(Vec3::splat(r.length_squared())) - outer(r, r)) * point_mass;
        }
        let inertia = Mat3::from_cols(
            clamp_small(inertia.x_axis),
            clamp_small(inertia.y_axis),
            clamp_small(inertia.z_axis),
        );
        Self::from_inertia(mass, center_of_mass, inertia)
    }

    /// Solid box of `mass` centred on the origin.
    pub fn cuboid(half_extents: Vec3, mass: f32) -> Self {
        let h2 = half_extents * half_extents;
        let diagonal = Vec3::new(h2.y + h2.z, h2.x + h2.z, h2.x + h2.y) * (mass / 3.0);
        Self::from_inertia(mass, Vec3::ZERO, Mat3::from_diagonal(diagonal))
    }

    fn from_inertia(mass: f32, center_of_mass: Vec3, inertia: Mat3) -> Self {
        let inv_mass = if mass > 0.0 { 1.0 / mass } else { 0.0 };
        let inv_inertia = if inertia.determinant().abs() > SINGULAR_EPSILON {
            inertia.inverse()
        } else {
            Mat3::ZERO
        };
        Self {
            mass,
            inv_mass,
            center_of_mass,
            inertia,
            inv_inertia,
        }
    }
}

fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}

// =============================================================================
// Link
// =============================================================================

/// One simulated stick in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidLink {
    /// Centre of mass, world space.
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_momentum: Vec3,
    pub angular_momentum: Vec3,
    pub mass: MassProperties,
    /// Attachment toward the previous link, body frame.
    pub anchor_a_local: Vec3,
    /// Attachment toward the next link, body frame.
    pub anchor_b_local: Vec3,
}

impl RigidLink {
    /// Box-shaped link lying along X, attached at both X ends.
    pub fn cuboid(position: Vec3, half_extents: Vec3, mass: f32) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
            linear_momentum: Vec3::ZERO,
            angular_momentum: Vec3::ZERO,
            mass: MassProperties::cuboid(half_extents, mass),
            anchor_a_local: Vec3::new(-half_extents.x, 0.0, 0.0),
            anchor_b_local: Vec3::new(half_extents.x, 0.0, 0.0),
        }
    }

    pub fn anchor_a(&self) -> Vec3 {
        self.position + self.orientation * self.anchor_a_local
    }

    pub fn anchor_b(&self) -> Vec3 {
        self.position + self.orientation * self.anchor_b_local
    }

    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_momentum * self.mass.inv_mass
    }

    /// `R I^-1 R^T`.
    pub fn world_inv_inertia(&self) -> Mat3 {
        let r = Mat3::from_quat(self.orientation);
        r * self.mass.inv_inertia * r.transpose()
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.world_inv_inertia() * self.angular_momentum
    }

    /// Velocity of a world-space point rigidly attached to the link.
    pub fn velocity_at(&self, point: Vec3) -> Vec3 {
        self.linear_velocity() + self.angular_velocity().cross(point - self.position)
    }

    pub fn kinetic_energy(&self) -> f32 {
        let linear = 0.5 * self.linear_momentum.dot(self.linear_velocity());
        let angular = 0.5 * self.angular_momentum.dot(self.angular_velocity());
        linear + angular
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_mat(a: Mat3, b: Mat3) -> bool {
        (a - b).to_cols_array().iter().all(|v| v.abs() < 1e-4)
    }

    #[test]
    fn test_cube_corners_have_diagonal_inertia() {
        let points: Vec<Vec3> = (0..8)
            .map(|i| Vec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { -1.0 } else { 1.0 },
            ))
            .collect();
        let props = MassProperties::from_points(&points, 0.5);
        assert_eq!(props.mass, 4.0);
        assert_eq!(props.center_of_mass, Vec3::ZERO);
        // each corner contributes m * 2 to every diagonal entry
        assert!(approx_mat(props.inertia, Mat3::from_diagonal(Vec3::splat(8.0))));
        assert!(approx_mat(props.inv_inertia, Mat3::from_diagonal(Vec3::splat(0.125))));
    }

    #[test]
    fn test_center_of_mass_of_offset_points() {
        let points = [Vec3::new(2.0, 0.0, 0.0), Vec3::new(4.0, 0.0, 0.0)];
        let props = MassProperties::from_points(&points, 1.0);
        assert!((props.center_of_mass - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_collinear_points_have_no_inverse() {
        let points = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let props = MassProperties::from_points(&points, 1.0);
        assert_eq!(props.inv_inertia, Mat3::ZERO, "no resistance about the line axis");
    }

    #[test]
    fn test_empty_point_set_is_massless() {
        let props = MassProperties::from_points(&[], 1.0);
        assert_eq!(props.mass, 0.0);
        assert_eq!(props.inv_mass, 0.0);
    }

    #[test]
    fn test_cuboid_inertia_matches_formula() {
        let props = MassProperties::cuboid(Vec3::new(1.0, 0.5, 0.25), 3.0);
        let expected = Vec3::new(0.25 + 0.0625, 1.0 + 0.0625, 1.0 + 0.25);
        assert!(approx_mat(props.inertia, Mat3::from_diagonal(expected)));
    }

    #[test]
    fn test_world_inertia_follows_rotation() {
        let mut link = RigidLink::cuboid(Vec3::ZERO, Vec3::new(1.0, 0.25, 0.25), 1.0);
        link.orientation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let world = link.world_inv_inertia();
        let body = link.mass.inv_inertia;
        // after a quarter turn about Z the X and Y entries swap
        assert!((world.x_axis.x - body.y_axis.y).abs() < 1e-3);
        assert!((world.y_axis.y - body.x_axis.x).abs() < 1e-3);
        assert!((link.anchor_b() - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_point_velocity_includes_spin() {
        let mut link = RigidLink::cuboid(Vec3::ZERO, Vec3::new(1.0, 0.25, 0.25), 1.0);
        link.linear_momentum = Vec3::new(0.0, 0.0, 2.0);
        // spin about Z at 1 rad/s
        let inertia_z = link.mass.inertia.z_axis.z;
        link.angular_momentum = Vec3::new(0.0, 0.0, inertia_z);
        let v = link.velocity_at(link.anchor_b());
        assert!((v - Vec3::new(0.0, 1.0, 2.0)).length() < 1e-4, "got {:?}", v);
    }
}
