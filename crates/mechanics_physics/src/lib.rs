//! Spring-mass-damper rigid link chain and its Bevy plugin.
//!
//! The chain steps once per frame at a fixed `dt` inside
//! `MechanicsSet::Physics`, after every other mechanics stage.

use std::path::Path;

use bevy::log::{info, warn};
use bevy::prelude::*;
use mechanics_core::config::{ConfigError, ConfigResult};
use mechanics_core::plugin::MechanicsSet;
use serde::{Deserialize, Serialize};

pub mod rigid_body;
pub mod spring_chain;

pub use rigid_body::{MassProperties, RigidLink};
pub use spring_chain::{Anchor, ChainEnd, ChainError, ChainResult, Spring, SpringChain};

/// Plugin that simulates the chain and mirrors its links onto entities.
#[derive(Default)]
pub struct SpringChainPlugin {
    pub config: SpringChainConfig,
}

impl Plugin for SpringChainPlugin {
    fn build(&self, app: &mut App) {
        let state = match SpringChain::from_config(&self.config) {
            Ok(chain) => SpringChainState::new(chain),
            Err(e) => {
                warn!("Spring chain disabled: {}", e);
                SpringChainState::default()
            }
        };

        app.insert_resource(self.config.clone())
            .insert_resource(state)
            .init_resource::<AnchorDrive>()
            .add_systems(Startup, spawn_chain_links)
            .add_systems(
                Update,
                (drive_chain_anchors, step_spring_chain, sync_link_transforms)
                    .chain()
                    .in_set(MechanicsSet::Physics),
            );
    }
}

/// Chain layout and constants.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringChainConfig {
    /// Fixed step, seconds.
    pub dt: f32,
    pub gravity: Vec3,
    /// Spring constants left to right. One more than the number of links.
    pub stiffness: Vec<f32>,
    /// Damper constants, same length as `stiffness`.
    pub damping: Vec<f32>,
    pub left_anchor: Vec3,
    pub right_anchor: Vec3,
    pub link_half_extents: Vec3,
    pub link_mass: f32,
    /// How fast a driven anchor moves, units per second.
    pub anchor_speed: f32,
}

impl Default for SpringChainConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            stiffness: vec![20.0, 30.0, 10.0, 15.0, 25.0, 35.0],
            damping: vec![0.9; 6],
            left_anchor: Vec3::new(-6.0, 0.0, 0.0),
            right_anchor: Vec3::new(6.0, 0.0, 0.0),
            link_half_extents: Vec3::new(1.0, 0.25, 0.25),
            link_mass: 1.0,
            anchor_speed: 6.0,
        }
    }
}

/// Load a chain config from JSON. Missing fields keep their defaults.
pub fn load_chain_config(path: impl AsRef<Path>) -> ConfigResult<SpringChainConfig> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let config: SpringChainConfig = serde_json::from_str(&json)?;
    if config.dt <= 0.0 {
        return Err(ConfigError::Invalid(format!("dt must be positive, got {}", config.dt)));
    }
    info!("Loaded spring chain config from {:?}", path);
    Ok(config)
}

#[derive(Resource, Debug, Default)]
pub struct SpringChainState {
    pub chain: Option<SpringChain>,
    pub steps: u64,
    /// Pauses integration without dropping the chain.
    pub paused: bool,
}

impl SpringChainState {
    pub fn new(chain: SpringChain) -> Self {
        Self {
            chain: Some(chain),
            steps: 0,
            paused: false,
        }
    }
}

/// Vertical drive input per anchor: -1 down, 0 hold, 1 up.
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq)]
pub struct AnchorDrive {
    pub left: f32,
    pub right: f32,
}

/// Links a Bevy entity to a chain link
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink(pub usize);

fn spawn_chain_links(mut commands: Commands, state: Res<SpringChainState>) {
    let Some(chain) = state.chain.as_ref() else {
        return;
    };
    for (i, (position, rotation)) in chain.link_poses().enumerate() {
        commands.spawn((
            Transform::from_translation(position).with_rotation(rotation),
            ChainLink(i),
        ));
    }
}

pub fn drive_chain_anchors(
    drive: Res<AnchorDrive>,
    config: Res<SpringChainConfig>,
    mut state: ResMut<SpringChainState>,
) {
    let Some(chain) = state.chain.as_mut() else {
        return;
    };
    let dt = config.dt;
    for (end, input) in [(ChainEnd::Left, drive.left), (ChainEnd::Right, drive.right)] {
        if input == 0.0 {
            chain.release_anchor(end);
        } else {
            let offset = Vec3::Y * input.clamp(-1.0, 1.0) * config.anchor_speed * dt;
            chain.drive_anchor(end, offset, dt);
        }
    }
}

pub fn step_spring_chain(config: Res<SpringChainConfig>, mut state: ResMut<SpringChainState>) {
    if state.paused {
        return;
    }
    let state = state.as_mut();
    if let Some(chain) = state.chain.as_mut() {
        chain.step(config.dt);
        state.steps += 1;
    }
}

fn sync_link_transforms(state: Res<SpringChainState>, mut query: Query<(&ChainLink, &mut Transform)>) {
    let Some(chain) = state.chain.as_ref() else {
        return;
    };
    for (link, mut transform) in query.iter_mut() {
        if let Some(body) = chain.links.get(link.0) {
            transform.translation = body.position;
            transform.rotation = body.orientation;
        }
    }
}
