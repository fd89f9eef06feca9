//! Tunable constants for every mechanics stage.
//!
//! Each stage has its own config struct with the reference values as its
//! `Default`. `MechanicsConfig` bundles them so a scene can be tuned from a
//! single JSON file:
//!
//! ```ignore
//! let config = load_config("assets/mechanics.json")?;
//! app.add_plugins(MechanicsPlugin::with_config(config));
//! ```
//!
//! Missing fields fall back to defaults (`#[serde(default)]`), so a file
//! only needs to list what it overrides.

use std::collections::HashMap;
use std::path::Path;

use bevy::log::info;
use bevy::math::Vec3;
use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::collision::NarrowPhaseTarget;
use crate::ik::JointConstraint;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur while loading a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// File system error
    Io(std::io::Error),
    /// Malformed JSON or wrong field types
    Json(serde_json::Error),
    /// Parsed, but a value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Per-stage configs
// =============================================================================

/// Octree build parameters.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// A node stops subdividing when it holds fewer than
    /// `max_triangles_per_leaf * 3` vertices.
    pub max_triangles_per_leaf: usize,
    /// Hard cap on recursion depth. Coincident vertices would otherwise
    /// keep landing in the same octant.
    pub max_depth: usize,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            max_triangles_per_leaf: 30,
            max_depth: 16,
        }
    }
}

/// BSP tree build parameters.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BspConfig {
    pub max_triangles_per_leaf: usize,
    pub max_depth: usize,
    /// `|front/n - back/n|` above this triggers a retry with the next
    /// palette normal.
    pub imbalance_ratio: f32,
    /// Signed distance tolerance for the coplanar classification.
    pub epsilon: f32,
}

impl Default for BspConfig {
    fn default() -> Self {
        Self {
            max_triangles_per_leaf: 30,
            max_depth: 10,
            imbalance_ratio: 0.7,
            epsilon: 1e-8,
        }
    }
}

/// GJK narrow-phase parameters.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GjkConfig {
    pub max_iterations: usize,
    /// Closest-point distance below which the origin counts as enclosed.
    pub tolerance: f32,
    pub narrow_phase: NarrowPhaseTarget,
}

impl Default for GjkConfig {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            tolerance: 1e-6,
            narrow_phase: NarrowPhaseTarget::LeafBounds,
        }
    }
}

/// CCD inverse kinematics parameters.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcdConfig {
    /// Maximum outer iterations per solve.
    pub num_steps: usize,
    /// End effector to goal distance that counts as reached. Also the
    /// stall threshold between consecutive iterations.
    pub threshold: f32,
    /// Joint rotations smaller than this (radians) are skipped.
    pub min_rotation_angle: f32,
    /// Constraint descriptors keyed by bone name, resolved once when the
    /// chain is built. Defaults to [`arm_constraints`].
    pub constraints: HashMap<String, JointConstraint>,
}

impl Default for CcdConfig {
    fn default() -> Self {
        Self {
            num_steps: 15,
            threshold: 1e-5,
            min_rotation_angle: 0.1,
            constraints: arm_constraints(),
        }
    }
}

/// Reference arm limits: shoulder cone of 150 degrees, elbow hinged about
/// its local Z, wrist cone of 30 degrees.
pub fn arm_constraints() -> HashMap<String, JointConstraint> {
    HashMap::from([
        (
            "shoulder".to_string(),
            JointConstraint::BallSocket { max_angle: 150f32.to_radians() },
        ),
        ("elbow".to_string(), JointConstraint::Hinge { axis: Vec3::Z }),
        (
            "wrist".to_string(),
            JointConstraint::BallSocket { max_angle: 30f32.to_radians() },
        ),
    ])
}

/// Which arc-length table builder a spline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArcLengthMethod {
    ForwardDifferencing,
    #[default]
    Adaptive,
}

/// Spline arc-length table parameters.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineConfig {
    pub method: ArcLengthMethod,
    /// Parameter step for forward differencing, in normalised `u`.
    pub forward_step: f32,
    /// Arc-chord error tolerance for the adaptive builder.
    pub adaptive_epsilon: f32,
    /// Widest `u` interval the adaptive builder accepts.
    pub adaptive_gamma: f32,
    /// Narrowest interval the adaptive builder will split.
    pub adaptive_min_width: f32,
}

impl Default for SplineConfig {
    fn default() -> Self {
        Self {
            method: ArcLengthMethod::Adaptive,
            forward_step: 0.001,
            adaptive_epsilon: 1e-4,
            adaptive_gamma: 0.01,
            adaptive_min_width: 1e-6,
        }
    }
}

/// Ease-in / constant / ease-out velocity profile breakpoints.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EaseInOutConfig {
    pub t1: f32,
    pub t2: f32,
}

impl Default for EaseInOutConfig {
    fn default() -> Self {
        Self { t1: 0.44, t2: 0.84 }
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Every stage config in one place. The plugin splits it into one resource
/// per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanicsConfig {
    pub octree: OctreeConfig,
    pub bsp: BspConfig,
    pub gjk: GjkConfig,
    pub ccd: CcdConfig,
    pub spline: SplineConfig,
    pub ease: EaseInOutConfig,
}

impl MechanicsConfig {
    /// Reject values that would make a stage misbehave (zero iteration
    /// caps, inverted ease breakpoints and so on).
    pub fn validate(&self) -> ConfigResult<()> {
        if self.octree.max_triangles_per_leaf == 0 {
            return Err(ConfigError::Invalid(
                "octree.max_triangles_per_leaf must be at least 1".to_string(),
            ));
        }
        if self.bsp.max_triangles_per_leaf == 0 {
            return Err(ConfigError::Invalid(
                "bsp.max_triangles_per_leaf must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.bsp.imbalance_ratio) {
            return Err(ConfigError::Invalid(format!(
                "bsp.imbalance_ratio {} is outside [0, 1]",
                self.bsp.imbalance_ratio
            )));
        }
        if self.bsp.epsilon < 0.0 || self.gjk.tolerance < 0.0 {
            return Err(ConfigError::Invalid("tolerances must be non-negative".to_string()));
        }
        if self.gjk.max_iterations == 0 {
            return Err(ConfigError::Invalid("gjk.max_iterations must be at least 1".to_string()));
        }
        if self.ccd.num_steps == 0 || self.ccd.threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "ccd.num_steps and ccd.threshold must be positive".to_string(),
            ));
        }
        if self.spline.forward_step <= 0.0 || self.spline.forward_step > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "spline.forward_step {} is outside (0, 1]",
                self.spline.forward_step
            )));
        }
        if self.spline.adaptive_epsilon <= 0.0
            || self.spline.adaptive_gamma <= 0.0
            || self.spline.adaptive_min_width <= 0.0
        {
            return Err(ConfigError::Invalid(
                "adaptive arc-length parameters must be positive".to_string(),
            ));
        }
        let EaseInOutConfig { t1, t2 } = self.ease;
        if !(0.0 <= t1 && t1 <= t2 && t2 <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "ease breakpoints must satisfy 0 <= t1 <= t2 <= 1 (got {}, {})",
                t1, t2
            )));
        }
        Ok(())
    }
}

/// Load and validate a `MechanicsConfig` from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<MechanicsConfig> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let config: MechanicsConfig = serde_json::from_str(&json)?;
    config.validate()?;
    info!("Loaded mechanics config from {:?}", path);
    Ok(config)
}

/// Write a config as pretty JSON. Handy for dumping the defaults as a
/// starting point.
pub fn save_config(config: &MechanicsConfig, path: impl AsRef<Path>) -> ConfigResult<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path.as_ref(), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_reference_values() {
        let config = MechanicsConfig::default();
        assert_eq!(config.octree.max_triangles_per_leaf, 30);
        assert_eq!(config.bsp.max_depth, 10);
        assert_eq!(config.gjk.max_iterations, 64);
        assert_eq!(config.ccd.num_steps, 15);
        assert_eq!(
            config.ccd.constraints.get("wrist"),
            Some(&JointConstraint::BallSocket { max_angle: 30f32.to_radians() })
        );
        assert_eq!(config.ccd.constraints.get("elbow"), Some(&JointConstraint::Hinge { axis: Vec3::Z }));
        assert_eq!(config.ccd.constraints.len(), 3);
        assert!((config.ease.t1 - 0.44).abs() < 1e-6);
        assert!(config.validate().is_ok(), "defaults must validate");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "gjk": {{ "max_iterations": 8 }} }}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.gjk.max_iterations, 8);
        assert!((config.gjk.tolerance - 1e-6).abs() < 1e-12, "unset field keeps default");
        assert_eq!(config.octree, OctreeConfig::default());
    }

    #[test]
    fn test_constraints_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mechanics.json");

        let mut config = MechanicsConfig::default();
        config.ccd.constraints.insert(
            "mixamorig:RightArm".to_string(),
            JointConstraint::BallSocket { max_angle: 150f32.to_radians() },
        );
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_ease_breakpoints_rejected() {
        let mut config = MechanicsConfig::default();
        config.ease = EaseInOutConfig { t1: 0.9, t2: 0.2 };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("nope.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Json(_))));
    }
}
