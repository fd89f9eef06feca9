//! Bevy wiring for the per-frame mechanics stages.
//!
//! Stages run in [`MechanicsSet`] order every `Update`:
//!
//! ```text
//! Spatial -> Collision -> Kinematics -> Motion -> Physics
//! ```
//!
//! - **Spatial** promotes last frame's rebuilt trees and starts a rebuild
//!   when `SceneGeometry` changed. Queries in the same frame keep seeing the
//!   previous tree.
//! - **Collision** tests every `CollisionProbeShape` against the octree.
//! - **Kinematics** refreshes the IK chain from `SkeletonPose`, solves
//!   toward `IkRig::goal` and plays the transition back into the pose.
//! - **Motion** re-solves edited splines and moves path followers.
//! - **Physics** belongs to the spring chain plugin.

use std::path::Path;

use bevy::log::{debug, info, warn};
use bevy::prelude::*;

use crate::bounding_volume::Aabb;
use crate::bsp_tree::BspTree;
use crate::collision::{detect_collision, CollisionProbe, CollisionReport};
use crate::config::{
    load_config, BspConfig, CcdConfig, EaseInOutConfig, GjkConfig, MechanicsConfig, OctreeConfig,
    SplineConfig,
};
use crate::ik::{CcdSolver, IkChain, IkError, IkSolution, IkTransition};
use crate::octree::Octree;
use crate::path_motion::{EaseInOut, PathFollower, PathSample};
use crate::skeleton::SkeletonPose;
use crate::spline::{Spline, SplineResult};
use crate::vqs::Vqs;

/// Ordered stages of one mechanics frame.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MechanicsSet {
    Spatial,
    Collision,
    Kinematics,
    Motion,
    Physics,
}

/// Plugin that installs every stage except physics.
#[derive(Default)]
pub struct MechanicsPlugin {
    pub config: MechanicsConfig,
}

impl MechanicsPlugin {
    pub fn with_config(config: MechanicsConfig) -> Self {
        Self { config }
    }

    /// Load the config from JSON, falling back to defaults if the file is
    /// missing or invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match load_config(path) {
            Ok(config) => Self::with_config(config),
            Err(e) => {
                warn!("Using default mechanics config, could not load {:?}: {}", path, e);
                Self::default()
            }
        }
    }
}

impl Plugin for MechanicsPlugin {
    fn build(&self, app: &mut App) {
        let config = &self.config;
        app.insert_resource(config.octree.clone())
            .insert_resource(config.bsp.clone())
            .insert_resource(config.gjk.clone())
            .insert_resource(config.ccd.clone())
            .insert_resource(config.spline.clone())
            .insert_resource(config.ease.clone())
            .init_resource::<SceneGeometry>()
            .init_resource::<SpatialIndex>()
            .init_resource::<CollisionLog>()
            .init_resource::<IkRig>()
            .init_resource::<SkeletonPose>()
            .init_resource::<SplinePaths>();

        app.configure_sets(
            Update,
            (
                MechanicsSet::Spatial,
                MechanicsSet::Collision,
                MechanicsSet::Kinematics,
                MechanicsSet::Motion,
                MechanicsSet::Physics,
            )
                .chain(),
        );

        app.add_systems(Update, rebuild_spatial_index.in_set(MechanicsSet::Spatial))
            .add_systems(Update, detect_probe_collisions.in_set(MechanicsSet::Collision))
            .add_systems(
                Update,
                (refresh_ik_chain, solve_ik)
                    .chain()
                    .in_set(MechanicsSet::Kinematics),
            )
            .add_systems(
                Update,
                (update_spline_paths, follow_spline_paths)
                    .chain()
                    .in_set(MechanicsSet::Motion),
            );
    }
}

// =============================================================================
// Resources and components
// =============================================================================

/// Static scene triangles the spatial trees are built from.
#[derive(Resource, Debug, Clone, Default)]
pub struct SceneGeometry {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    dirty: bool,
}

impl SceneGeometry {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            dirty: true,
        }
    }

    /// Replace the mesh and schedule a rebuild.
    pub fn set_mesh(&mut self, vertices: Vec<Vec3>, indices: Vec<u32>) {
        self.vertices = vertices;
        self.indices = indices;
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.vertices)
    }
}

/// Octree and BSP tree over `SceneGeometry`.
///
/// A rebuild lands in `pending` and becomes `active` one frame later.
#[derive(Resource, Debug, Default)]
pub struct SpatialIndex {
    pub octree: Option<Octree>,
    pub bsp: Option<BspTree>,
    pending: Option<(Octree, BspTree)>,
    /// Number of promotions so far.
    pub generation: u64,
}

impl SpatialIndex {
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Per-frame probe results.
#[derive(Resource, Debug, Default)]
pub struct CollisionLog {
    /// This frame's reports, one per probe entity.
    pub reports: Vec<(Entity, CollisionReport)>,
    /// Hits across all frames.
    pub total_hits: u64,
}

impl CollisionLog {
    pub fn hits(&self) -> impl Iterator<Item = &(Entity, CollisionReport)> {
        self.reports.iter().filter(|(_, report)| report.hit)
    }
}

/// World-space convex shape tested against the octree each frame. Points
/// are local to the entity's `Transform`.
#[derive(Component, Debug, Clone)]
pub struct CollisionProbeShape {
    pub local_points: Vec<Vec3>,
}

impl CollisionProbeShape {
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self {
            local_points: Aabb::from_center_half_extent(Vec3::ZERO, half_extents)
                .corners()
                .to_vec(),
        }
    }
}

/// Which bones the IK chain spans and where it should reach.
#[derive(Resource, Debug, Default)]
pub struct IkRig {
    pub root: String,
    pub effector: String,
    /// Setting a new goal triggers a solve on the next frame.
    pub goal: Option<Vec3>,
    /// Seconds to blend from the current pose into the solution. Zero
    /// snaps.
    pub transition_duration: f32,
    pub chain: Option<IkChain>,
    pub last_solution: Option<IkSolution>,
    pub last_error: Option<IkError>,
    transition: Option<IkTransition>,
    solved_goal: Option<Vec3>,
}

impl IkRig {
    pub fn new(root: impl Into<String>, effector: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            effector: effector.into(),
            transition_duration: 1.0,
            ..Default::default()
        }
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }
}

/// Every spline in the scene, addressed by index.
#[derive(Resource, Debug, Default)]
pub struct SplinePaths {
    pub splines: Vec<Spline>,
}

impl SplinePaths {
    /// Fit a spline through `points` and return its index.
    pub fn add_path(&mut self, points: Vec<Vec3>, config: &SplineConfig) -> SplineResult<usize> {
        self.splines.push(Spline::with_config(points, config.clone())?);
        Ok(self.splines.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&Spline> {
        self.splines.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Spline> {
        self.splines.get_mut(index)
    }
}

/// Moves its entity along `SplinePaths[path]`.
#[derive(Component, Debug, Clone)]
pub struct PathFollowerComponent {
    pub path: usize,
    pub follower: PathFollower,
    pub last_sample: Option<PathSample>,
}

impl PathFollowerComponent {
    pub fn new(path: usize, duration: f32, ease: &EaseInOutConfig) -> Self {
        Self {
            path,
            follower: PathFollower::new(duration, EaseInOut::from(ease)),
            last_sample: None,
        }
    }
}

// =============================================================================
// Systems
// =============================================================================

pub fn rebuild_spatial_index(
    mut geometry: ResMut<SceneGeometry>,
    mut index: ResMut<SpatialIndex>,
    octree_config: Res<OctreeConfig>,
    bsp_config: Res<BspConfig>,
) {
    if let Some((octree, bsp)) = index.pending.take() {
        index.octree = Some(octree);
        index.bsp = Some(bsp);
        index.generation += 1;
        debug!("Spatial index generation {} active", index.generation);
    }

    if !geometry.dirty {
        return;
    }
    geometry.dirty = false;

    let Some(bounds) = geometry.bounds() else {
        index.pending = Some((Octree::default(), BspTree::default()));
        return;
    };

    let octree = Octree::build(&geometry.vertices, bounds, &octree_config);
    let bsp = BspTree::build(&geometry.indices, &geometry.vertices, &bsp_config);
    info!(
        "Rebuilt spatial index: octree {} nodes, bsp {} nodes over {} triangles",
        octree.node_count(),
        bsp.node_count(),
        geometry.indices.len() / 3
    );
    index.pending = Some((octree, bsp));
}

pub fn detect_probe_collisions(
    index: Res<SpatialIndex>,
    config: Res<GjkConfig>,
    mut log: ResMut<CollisionLog>,
    probes: Query<(Entity, &CollisionProbeShape, &Transform)>,
) {
    log.reports.clear();
    let Some(octree) = index.octree.as_ref() else {
        return;
    };

    for (entity, shape, transform) in probes.iter() {
        let probe = CollisionProbe::new(&shape.local_points, &Vqs::from(transform));
        let report = detect_collision(&probe, octree, &config);
        if report.hit {
            log.total_hits += 1;
        }
        log.reports.push((entity, report));
    }
}

pub fn refresh_ik_chain(mut rig: ResMut<IkRig>, pose: Res<SkeletonPose>, config: Res<CcdConfig>) {
    if rig.root.is_empty() || rig.effector.is_empty() || pose.is_empty() {
        return;
    }

    if let Some(chain) = rig.chain.as_mut() {
        chain.refresh_from_pose(&pose);
        return;
    }

    // report a bad rig once rather than every frame
    if rig.last_error.is_some() {
        return;
    }
    match IkChain::from_skeleton(&pose, &rig.root, &rig.effector, &config.constraints) {
        Ok(chain) => {
            debug!("IK chain {} -> {} with {} joints", rig.root, rig.effector, chain.len());
            rig.chain = Some(chain);
        }
        Err(e) => {
            warn!("Cannot build IK chain: {}", e);
            rig.last_error = Some(e);
        }
    }
}

pub fn solve_ik(
    mut rig: ResMut<IkRig>,
    mut pose: ResMut<SkeletonPose>,
    config: Res<CcdConfig>,
    time: Res<Time>,
) {
    let rig = rig.as_mut();
    let Some(chain) = rig.chain.as_ref() else {
        return;
    };

    if let Some(goal) = rig.goal.filter(|g| rig.solved_goal != Some(*g)) {
        let solution = CcdSolver::new(config.clone()).solve(chain, goal);
        rig.solved_goal = Some(goal);
        if solution.applied() {
            if rig.transition_duration > 0.0 {
                rig.transition = Some(IkTransition::new(chain, &solution, rig.transition_duration));
            } else {
                solution.chain.write_to_pose(&mut pose);
            }
        }
        rig.last_solution = Some(solution);
    }

    if let Some(transition) = rig.transition.as_mut() {
        let frame = transition.advance(time.delta_secs());
        chain.write_snapshot_to_pose(&frame, &mut pose);
        if transition.is_finished() {
            rig.transition = None;
        }
    }
}

pub fn update_spline_paths(mut paths: ResMut<SplinePaths>) {
    for (i, spline) in paths.splines.iter_mut().enumerate() {
        match spline.update() {
            Ok(true) => debug!("Spline {} rebuilt, length {:.3}", i, spline.length()),
            Ok(false) => {}
            Err(e) => warn!("Spline {} update failed: {}", i, e),
        }
    }
}

pub fn follow_spline_paths(
    paths: Res<SplinePaths>,
    time: Res<Time>,
    mut followers: Query<(&mut PathFollowerComponent, &mut Transform)>,
) {
    for (mut component, mut transform) in followers.iter_mut() {
        let Some(spline) = paths.get(component.path) else {
            continue;
        };
        let sample = component.follower.advance(spline, time.delta_secs());
        transform.translation = sample.position;
        transform.rotation = sample.rotation;
        component.last_sample = Some(sample);
    }
}
