//! Headless mechanics demo.
//!
//! Builds a bumpy terrain with a few crates on it, sends a box probe along a
//! spline loop across it, reaches an arm toward a goal with CCD IK and lets
//! a spring chain settle, then logs what happened.
//!
//! ```text
//! mechanics_studio [config.json] [frames]
//! ```

use bevy::log::LogPlugin;
use bevy::prelude::*;
use mechanics_core::{
    Aabb, CollisionLog, CollisionProbeShape, EaseInOutConfig, IkRig, MechanicsPlugin,
    PathFollowerComponent, SceneGeometry, SkeletonPose, SpatialIndex, SplineConfig, SplinePaths,
    Vqs,
};
use mechanics_physics::{SpringChainPlugin, SpringChainState};

const DEFAULT_FRAMES: usize = 600;

const TERRAIN_HALF_SIZE: f32 = 16.0;
const TERRAIN_CELLS: usize = 32;

/// Control points of the demo loop.
const LOOP_POINTS: [[f32; 3]; 12] = [
    [0.0, 0.0, 0.0],
    [-2.0, 0.0, 5.8],
    [-0.7, 0.0, 11.3],
    [2.5, 0.0, 13.3],
    [5.1, 0.0, 12.4],
    [7.2, 0.0, 9.4],
    [8.0, 0.0, 2.5],
    [6.4, 0.0, -4.7],
    [3.3, 0.0, -10.0],
    [-1.1, 0.0, -9.7],
    [-5.0, 0.0, -3.6],
    [-6.2, 0.0, 4.6],
];

fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let frames = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);

    let mut app = App::new();
    app.add_plugins(MinimalPlugins).add_plugins(LogPlugin {
        filter: "mechanics_core=info,mechanics_physics=info,mechanics_studio=info".into(),
        level: bevy::log::Level::INFO,
        ..default()
    });

    // after LogPlugin so a bad config file is reported
    let mechanics = match &config_path {
        Some(path) => MechanicsPlugin::from_file(path),
        None => MechanicsPlugin::default(),
    };
    app.add_plugins(mechanics)
        .add_plugins(SpringChainPlugin::default())
        .add_systems(Startup, setup_scene);

    for _ in 0..frames {
        app.update();
    }

    log_summary(app.world(), frames);
}

fn setup_scene(
    mut commands: Commands,
    mut geometry: ResMut<SceneGeometry>,
    mut paths: ResMut<SplinePaths>,
    mut pose: ResMut<SkeletonPose>,
    mut rig: ResMut<IkRig>,
    spline_config: Res<SplineConfig>,
    ease: Res<EaseInOutConfig>,
) {
    let (vertices, indices) = demo_terrain();
    geometry.set_mesh(vertices, indices);

    let points = LOOP_POINTS.iter().map(|p| Vec3::from_array(*p)).collect();
    match paths.add_path(points, &spline_config) {
        Ok(path) => {
            commands.spawn((
                Transform::default(),
                PathFollowerComponent::new(path, 10.0, &ease),
                CollisionProbeShape::cuboid(Vec3::splat(0.5)),
            ));
        }
        Err(e) => warn!("Demo path not created: {}", e),
    }

    // shoulder -> elbow -> wrist -> hand along +X
    let shoulder = pose.push_bone("shoulder", None, Vqs::from_translation(Vec3::new(0.0, 1.5, 0.0)));
    let elbow = pose.push_local("elbow", Some(shoulder), Vqs::from_translation(Vec3::X));
    let wrist = pose.push_local("wrist", Some(elbow), Vqs::from_translation(Vec3::X));
    pose.push_local("hand", Some(wrist), Vqs::from_translation(Vec3::X * 0.5));

    *rig = IkRig::new("shoulder", "hand");
    rig.goal = Some(Vec3::new(1.0, 3.0, 0.5));
}

/// Height field with a few crates dropped on it.
fn demo_terrain() -> (Vec<Vec3>, Vec<u32>) {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    let step = 2.0 * TERRAIN_HALF_SIZE / TERRAIN_CELLS as f32;
    let row = TERRAIN_CELLS as u32 + 1;
    for j in 0..=TERRAIN_CELLS {
        for i in 0..=TERRAIN_CELLS {
            let x = -TERRAIN_HALF_SIZE + i as f32 * step;
            let z = -TERRAIN_HALF_SIZE + j as f32 * step;
            let y = 0.4 * (x * 0.5).sin() * (z * 0.5).cos();
            vertices.push(Vec3::new(x, y, z));
        }
    }
    for j in 0..TERRAIN_CELLS as u32 {
        for i in 0..TERRAIN_CELLS as u32 {
            let a = j * row + i;
            let b = a + 1;
            let c = a + row;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    for center in [Vec3::new(3.0, 0.5, 6.0), Vec3::new(-4.0, 0.5, -2.0), Vec3::new(6.0, 1.0, -6.0)] {
        let crate_box = Aabb::from_center_half_extent(center, Vec3::splat(0.5 + center.y * 0.5));
        let base = vertices.len() as u32;
        vertices.extend_from_slice(&crate_box.corners());
        indices.extend(Aabb::box_indices().map(|i| i + base));
    }

    (vertices, indices)
}

fn log_summary(world: &World, frames: usize) {
    info!("Ran {} frames", frames);

    let index = world.resource::<SpatialIndex>();
    if let Some(octree) = index.octree.as_ref() {
        info!(
            "Octree: {} nodes, {} leaves, depth {}",
            octree.node_count(),
            octree.leaves().count(),
            octree.depth()
        );
    }
    if let Some(bsp) = index.bsp.as_ref() {
        let stats = bsp.stats();
        info!(
            "BSP: {} nodes, {} leaves, {} leaf vertices, {} unbalanced splits",
            stats.node_count, stats.leaf_count, stats.total_leaf_vertices, stats.unbalanced_splits
        );
    }

    let log = world.resource::<CollisionLog>();
    info!("Probe collisions: {} frames with a hit", log.total_hits);

    let rig = world.resource::<IkRig>();
    if let Some(solution) = rig.last_solution.as_ref() {
        info!(
            "IK: {:?} after {} iterations, {:.4} from goal",
            solution.outcome, solution.iterations, solution.distance
        );
    }

    let paths = world.resource::<SplinePaths>();
    for (i, spline) in paths.splines.iter().enumerate() {
        info!("Path {}: length {:.3}, {} table entries", i, spline.length(), spline.arc_length_table().len());
    }

    let chain = world.resource::<SpringChainState>();
    if let Some(chain_state) = chain.chain.as_ref() {
        info!(
            "Spring chain: {} steps, kinetic energy {:.5}",
            chain.steps,
            chain_state.kinetic_energy()
        );
    }
}
