//! Cyclic coordinate descent inverse kinematics.
//!
//! A chain runs from its root joint (index 0) to the end effector (last
//! index). Each outer iteration visits the joints from the one nearest the
//! effector back to the root, rotating each so that the effector swings
//! toward the goal, then carries that rotation down to every distal joint.
//!
//! Joint limits are explicit [`JointConstraint`] values attached when the
//! chain is built. The solver never mutates the chain it is given; it works
//! on a copy and hands back an [`IkSolution`] holding the solved chain, a
//! snapshot per outer iteration, and how the solve ended.

use std::collections::HashMap;

use bevy::log::debug;
use bevy::math::{Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::config::CcdConfig;
use crate::debug_draw::LineBatch;
use crate::rotation::{angle_of, clamp_angle, rotate_about_point, rotation_between};
use crate::skeleton::SkeletonPose;
use crate::vqs::Vqs;

/// Rotations smaller than this after constraints are treated as no-ops.
const NEGLIGIBLE_ANGLE: f32 = 1e-6;

/// Squared distance below which a joint coincides with the effector or goal.
const COINCIDENT_EPSILON: f32 = 1e-10;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IkError {
    /// No bone with this name in the pose
    UnknownBone(String),
    /// The root bone is not an ancestor of the effector bone
    NotAncestor { root: String, effector: String },
    /// A chain needs a joint to rotate and an effector
    ChainTooShort(usize),
}

impl std::fmt::Display for IkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IkError::UnknownBone(name) => write!(f, "Unknown bone: {}", name),
            IkError::NotAncestor { root, effector } => {
                write!(f, "Bone {} is not an ancestor of {}", root, effector)
            }
            IkError::ChainTooShort(len) => write!(f, "IK chain needs at least 2 joints, got {}", len),
        }
    }
}

impl std::error::Error for IkError {}

pub type IkResult<T> = Result<T, IkError>;

// =============================================================================
// Chain
// =============================================================================

/// Per-joint rotation limit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum JointConstraint {
    #[default]
    Free,
    /// Rotation only about `axis`, given in the joint's local frame. The
    /// joint's axis is kept aligned with the same axis of its parent.
    Hinge { axis: Vec3 },
    /// Orientation stays within `max_angle` radians of the parent's.
    BallSocket { max_angle: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IkJoint {
    pub name: String,
    pub world_position: Vec3,
    /// Offset from the parent joint in the parent's frame.
    pub local_position: Vec3,
    pub world_rotation: Quat,
    /// Every rotation applied to this joint during the current solve.
    pub accumulated: Mat4,
    /// Bone index in the source pose, if built from one.
    pub bone_index: Option<usize>,
    pub constraint: JointConstraint,
}

impl IkJoint {
    fn new(name: String, world_position: Vec3, world_rotation: Quat) -> Self {
        Self {
            name,
            world_position,
            local_position: Vec3::ZERO,
            world_rotation,
            accumulated: Mat4::IDENTITY,
            bone_index: None,
            constraint: JointConstraint::Free,
        }
    }
}

/// World transforms of every joint at one instant.
pub type ChainSnapshot = Vec<Vqs>;

#[derive(Debug, Clone, PartialEq)]
pub struct IkChain {
    pub joints: Vec<IkJoint>,
    /// World rotation of whatever the root hangs from. Root constraints are
    /// measured against it.
    pub base_rotation: Quat,
}

impl IkChain {
    /// Walk the pose from `effector` up to `root` and build the chain
    /// between them. `constraints` is looked up by bone name.
    pub fn from_skeleton(
        pose: &SkeletonPose,
        root: &str,
        effector: &str,
        constraints: &HashMap<String, JointConstraint>,
    ) -> IkResult<Self> {
        let root_index = pose
            .index_of(root)
            .ok_or_else(|| IkError::UnknownBone(root.to_string()))?;
        let effector_index = pose
            .index_of(effector)
            .ok_or_else(|| IkError::UnknownBone(effector.to_string()))?;

        let mut indices = vec![effector_index];
        let mut current = effector_index;
        while current != root_index {
            let parent = pose.bone(current).and_then(|b| b.parent).ok_or_else(|| IkError::NotAncestor {
                root: root.to_string(),
                effector: effector.to_string(),
            })?;
            // guard against parent cycles in malformed poses
            if indices.len() > pose.len() {
                return Err(IkError::NotAncestor {
                    root: root.to_string(),
                    effector: effector.to_string(),
                });
            }
            indices.push(parent);
            current = parent;
        }
        indices.reverse();

        if indices.len() < 2 {
            return Err(IkError::ChainTooShort(indices.len()));
        }

        let mut joints = Vec::with_capacity(indices.len());
        for index in indices {
            let Some(bone) = pose.bone(index) else {
                return Err(IkError::UnknownBone(format!("#{}", index)));
            };
            let mut joint = IkJoint::new(bone.name.clone(), bone.world.translation, bone.world.rotation);
            joint.bone_index = Some(index);
            joint.constraint = constraints.get(&bone.name).copied().unwrap_or_default();
            joints.push(joint);
        }

        let mut chain = IkChain {
            joints,
            base_rotation: pose.parent_world(root_index).rotation,
        };
        chain.update_local_positions();
        Ok(chain)
    }

    /// Unconstrained chain through `positions`, all joints unrotated.
    pub fn from_positions(positions: &[Vec3]) -> IkResult<Self> {
        if positions.len() < 2 {
            return Err(IkError::ChainTooShort(positions.len()));
        }
        let joints = positions
            .iter()
            .enumerate()
            .map(|(i, p)| IkJoint::new(format!("joint_{}", i), *p, Quat::IDENTITY))
            .collect();
        let mut chain = IkChain {
            joints,
            base_rotation: Quat::IDENTITY,
        };
        chain.update_local_positions();
        Ok(chain)
    }

    pub fn with_constraint(mut self, index: usize, constraint: JointConstraint) -> Self {
        if let Some(joint) = self.joints.get_mut(index) {
            joint.constraint = constraint;
        }
        self
    }

    /// Copy the current pose into the joints and reset accumulated
    /// transforms. Run every frame before solving.
    pub fn refresh_from_pose(&mut self, pose: &SkeletonPose) {
        if let Some(root_index) = self.joints.first().and_then(|j| j.bone_index) {
            self.base_rotation = pose.parent_world(root_index).rotation;
        }
        for joint in &mut self.joints {
            if let Some(bone) = joint.bone_index.and_then(|i| pose.bone(i)) {
                joint.world_position = bone.world.translation;
                joint.world_rotation = bone.world.rotation;
            }
            joint.accumulated = Mat4::IDENTITY;
        }
        self.update_local_positions();
    }

    /// Write solved joint transforms back into the pose, keeping bone scale.
    pub fn write_to_pose(&self, pose: &mut SkeletonPose) {
        for joint in &self.joints {
            if let Some(index) = joint.bone_index {
                let scale = pose.bone(index).map(|b| b.world.scale).unwrap_or(Vec3::ONE);
                pose.set_world(index, Vqs::new(joint.world_position, joint.world_rotation, scale));
            }
        }
    }

    /// Write one interpolated snapshot (see [`IkTransition`]) into the pose.
    pub fn write_snapshot_to_pose(&self, snapshot: &[Vqs], pose: &mut SkeletonPose) {
        for (joint, frame) in self.joints.iter().zip(snapshot) {
            if let Some(index) = joint.bone_index {
                let scale = pose.bone(index).map(|b| b.world.scale).unwrap_or(Vec3::ONE);
                pose.set_world(index, Vqs::new(frame.translation, frame.rotation, scale));
            }
        }
    }

    fn update_local_positions(&mut self) {
        let mut parent: Option<(Vec3, Quat)> = None;
        for joint in &mut self.joints {
            joint.local_position = match parent {
                Some((position, rotation)) => rotation.inverse() * (joint.world_position - position),
                None => joint.world_position,
            };
            parent = Some((joint.world_position, joint.world_rotation));
        }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn end_effector(&self) -> Option<Vec3> {
        self.joints.last().map(|j| j.world_position)
    }

    pub fn joint_positions(&self) -> Vec<Vec3> {
        self.joints.iter().map(|j| j.world_position).collect()
    }

    /// Sum of the distances between consecutive joints.
    pub fn reach(&self) -> f32 {
        self.joints
            .windows(2)
            .map(|w| w[0].world_position.distance(w[1].world_position))
            .sum()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        self.joints
            .iter()
            .map(|j| Vqs::from_translation_rotation(j.world_position, j.world_rotation))
            .collect()
    }

    /// World rotation a joint's constraint is measured against.
    fn parent_rotation(&self, index: usize) -> Quat {
        if index == 0 {
            self.base_rotation
        } else {
            self.joints[index - 1].world_rotation
        }
    }

    /// Restrict a world-space rotation delta for joint `index` to what its
    /// constraint allows.
    fn constrain(&self, index: usize, delta: Quat) -> Quat {
        let joint = &self.joints[index];
        let parent_rotation = self.parent_rotation(index);
        let candidate = (delta * joint.world_rotation).normalize();

        let constrained = match joint.constraint {
            JointConstraint::Free => return delta,
            JointConstraint::BallSocket { max_angle } => {
                let relative = parent_rotation.inverse() * candidate;
                parent_rotation * clamp_angle(relative, max_angle)
            }
            JointConstraint::Hinge { axis } => {
                let joint_axis = candidate * axis;
                let parent_axis = parent_rotation * axis;
                rotation_between(joint_axis, parent_axis) * candidate
            }
        };
        (constrained * joint.world_rotation.inverse()).normalize()
    }

    /// Rotate joint `start` and everything distal to it by `delta` about
    /// joint `start`'s position.
    fn apply_hierarchically(&mut self, start: usize, delta: Quat) {
        let pivot = self.joints[start].world_position;
        let transform = rotate_about_point(pivot, delta);
        for joint in &mut self.joints[start..] {
            joint.world_position = transform.transform_point3(joint.world_position);
            joint.world_rotation = (delta * joint.world_rotation).normalize();
            joint.accumulated = transform * joint.accumulated;
        }
    }

    /// Bones as a line strip from root to effector.
    pub fn debug_lines(&self, color: Vec4) -> LineBatch {
        let mut batch = LineBatch::default();
        batch.push_strip(&self.joint_positions(), color);
        batch
    }
}

// =============================================================================
// Solver
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkOutcome {
    /// Effector within `threshold` of the goal.
    Reached,
    /// An iteration moved the effector less than `threshold`. Usually the
    /// goal is out of reach or blocked by constraints.
    Stalled,
    MaxIterationsReached,
    /// Nothing to solve (fewer than two joints).
    Degenerate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IkSolution {
    pub outcome: IkOutcome,
    pub chain: IkChain,
    /// One snapshot per outer iteration that rotated at least one joint.
    pub history: Vec<ChainSnapshot>,
    pub iterations: usize,
    /// Final effector to goal distance.
    pub distance: f32,
}

impl IkSolution {
    /// Whether the solver ran at all. Matches the legacy boolean result:
    /// only a degenerate chain reports false.
    pub fn applied(&self) -> bool {
        self.outcome != IkOutcome::Degenerate
    }

    pub fn reached(&self) -> bool {
        self.outcome == IkOutcome::Reached
    }
}

#[derive(Debug, Clone, Default)]
pub struct CcdSolver {
    pub config: CcdConfig,
}

impl CcdSolver {
    pub fn new(config: CcdConfig) -> Self {
        Self { config }
    }

    /// Solve `chain` toward `goal`. The input chain is left untouched.
    pub fn solve(&self, chain: &IkChain, goal: Vec3) -> IkSolution {
        let mut chain = chain.clone();
        for joint in &mut chain.joints {
            joint.accumulated = Mat4::IDENTITY;
        }

        let n = chain.len();
        let Some(mut effector) = chain.end_effector().filter(|_| n >= 2) else {
            return IkSolution {
                outcome: IkOutcome::Degenerate,
                distance: f32::INFINITY,
                chain,
                history: Vec::new(),
                iterations: 0,
            };
        };

        let threshold = self.config.threshold;
        let mut history = Vec::new();
        let mut outcome = IkOutcome::MaxIterationsReached;
        let mut iterations = 0;

        if effector.distance(goal) < threshold {
            outcome = IkOutcome::Reached;
        }

        while outcome == IkOutcome::MaxIterationsReached && iterations < self.config.num_steps {
            iterations += 1;
            let previous = effector;
            let mut touched = false;

            for j in (0..n - 1).rev() {
                let pivot = chain.joints[j].world_position;
                let to_effector = effector - pivot;
                let to_goal = goal - pivot;
                if to_effector.length_squared() < COINCIDENT_EPSILON
                    || to_goal.length_squared() < COINCIDENT_EPSILON
                {
                    continue;
                }

                let delta = rotation_between(to_effector, to_goal);
                if angle_of(delta) < self.config.min_rotation_angle {
                    continue;
                }
                let delta = chain.constrain(j, delta);
                if angle_of(delta) < NEGLIGIBLE_ANGLE {
                    continue;
                }

                chain.apply_hierarchically(j, delta);
                touched = true;
                effector = chain.joints[n - 1].world_position;

                if effector.distance(goal) < threshold {
                    outcome = IkOutcome::Reached;
                    break;
                }
            }

            if touched {
                history.push(chain.snapshot());
            }
            if outcome == IkOutcome::MaxIterationsReached && effector.distance(previous) < threshold {
                outcome = IkOutcome::Stalled;
            }
        }

        let distance = effector.distance(goal);
        if outcome != IkOutcome::Reached {
            debug!(
                "CCD solve ended {:?} after {} iterations, {:.4} from goal",
                outcome, iterations, distance
            );
        }
        chain.update_local_positions();

        IkSolution {
            outcome,
            chain,
            history,
            iterations,
            distance,
        }
    }
}

// =============================================================================
// Transition playback
// =============================================================================

/// Replays a solve's intermediate snapshots so the pose eases into the IK
/// result instead of snapping.
#[derive(Debug, Clone, PartialEq)]
pub struct IkTransition {
    frames: Vec<ChainSnapshot>,
    duration: f32,
    elapsed: f32,
}

impl IkTransition {
    /// Frames are the chain before solving, every recorded snapshot, then
    /// the solved chain.
    pub fn new(start: &IkChain, solution: &IkSolution, duration: f32) -> Self {
        let mut frames = Vec::with_capacity(solution.history.len() + 2);
        frames.push(start.snapshot());
        frames.extend(solution.history.iter().cloned());
        let last = solution.chain.snapshot();
        if frames.last() != Some(&last) {
            frames.push(last);
        }
        Self {
            frames,
            duration: duration.max(f32::EPSILON),
            elapsed: 0.0,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Joint transforms at normalised time `t` in `[0, 1]`.
    pub fn sample(&self, t: f32) -> ChainSnapshot {
        let Some(first) = self.frames.first() else {
            return Vec::new();
        };
        if self.frames.len() == 1 {
            return first.clone();
        }

        let segments = (self.frames.len() - 1) as f32;
        let scaled = t.clamp(0.0, 1.0) * segments;
        let index = (scaled.floor() as usize).min(self.frames.len() - 2);
        let local = scaled - index as f32;

        self.frames[index]
            .iter()
            .zip(&self.frames[index + 1])
            .map(|(a, b)| a.interpolate(b, local))
            .collect()
    }

    /// Advance by `dt` seconds and return the pose at the new time.
    pub fn advance(&mut self, dt: f32) -> ChainSnapshot {
        self.elapsed = (self.elapsed + dt).min(self.duration);
        self.sample(self.elapsed / self.duration)
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.duration
    }
}
