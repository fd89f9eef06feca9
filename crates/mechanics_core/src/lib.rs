//! Core mechanics for the studio: spatial partitioning, collision,
//! inverse kinematics and path motion.
//!
//! This crate provides:
//! - Rotation helpers and VQS (translation, rotation, uniform scale) transforms
//! - Axis-aligned bounding boxes and split planes
//! - Octree and BSP tree construction over static scene triangles
//! - GJK intersection and a phased probe-vs-octree collision query
//! - CCD inverse kinematics with per-joint constraints
//! - Interpolating cubic splines with arc-length tables and eased path following
//! - GPU-ready debug line/triangle buffers
//! - JSON configuration for every stage
//! - `MechanicsPlugin`, which runs the stages each frame in `MechanicsSet` order

pub mod bounding_volume;
pub mod bsp_tree;
pub mod collision;
pub mod config;
pub mod debug_draw;
pub mod gjk;
pub mod ik;
pub mod octree;
pub mod path_motion;
pub mod plane;
pub mod plugin;
pub mod rotation;
pub mod skeleton;
pub mod spline;
pub mod vqs;

pub use bounding_volume::Aabb;
pub use bsp_tree::{split_palette, split_triangles, BspNode, BspTree, BuildStats, TriangleSoup};
pub use collision::{detect_collision, CollisionProbe, CollisionReport, NarrowPhaseTarget};
pub use config::{
    arm_constraints, load_config, save_config, ArcLengthMethod, BspConfig, CcdConfig, ConfigError,
    ConfigResult, EaseInOutConfig, GjkConfig, MechanicsConfig, OctreeConfig, SplineConfig,
};
pub use debug_draw::{DebugVertex, LineBatch, TriangleBatch};
pub use gjk::{gjk_intersect, minkowski_support, ConvexHull, GjkOutcome, GjkResult, Simplex};
pub use ik::{
    CcdSolver, ChainSnapshot, IkChain, IkError, IkJoint, IkOutcome, IkResult, IkSolution,
    IkTransition, JointConstraint,
};
pub use octree::{NodeId, NodeKind, Octree, OctreeNode};
pub use path_motion::{approach_path, path_frame, EaseInOut, PathFollower, PathSample};
pub use plane::{Plane, Side};
pub use plugin::{
    CollisionLog, CollisionProbeShape, IkRig, MechanicsPlugin, MechanicsSet,
    PathFollowerComponent, SceneGeometry, SpatialIndex, SplinePaths,
};
pub use rotation::{angle_of, orthonormalize, rotate_about_point, rotation_between, tilde};
pub use skeleton::{Bone, SkeletonPose};
pub use spline::{ArcLengthEntry, ArcLengthTable, Spline, SplineError, SplineResult};
pub use vqs::Vqs;
