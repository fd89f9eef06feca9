//! Spring-mass-damper chain of rigid links between two anchors.
//!
//! ```text
//! anchor L ~~k0~~ [A link 0 B] ~~k1~~ [A link 1 B] ~~k2~~ ... ~~kn~~ anchor R
//! ```
//!
//! Spring `i` joins the B end of whatever is on its left to the A end of
//! whatever is on its right, so a chain of `n` links has `n + 1` springs.
//! Anchors are never integrated; they only move when driven.
//!
//! Per link and step the force at each attachment is
//!
//! ```text
//! f = k (neighbor - own) + m g / 2 + d (v_neighbor - v_own)
//! ```
//!
//! and the torque is `(attachment - centre) x f`. Position, rotation and
//! both momenta are integrated with classic RK4. Links are stepped in index
//! order, each seeing the already-updated state of the link before it.

use bevy::log::debug;
use bevy::math::{Mat3, Quat, Vec3, Vec4};
use mechanics_core::debug_draw::LineBatch;
use mechanics_core::rotation::{orthonormalize, rotation_between, tilde};

use crate::rigid_body::RigidLink;
use crate::SpringChainConfig;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// At least one simulated link is needed between the anchors.
    TooFewLinks(usize),
    /// Spring/damper lists must have one entry per link plus one.
    ParameterCountMismatch { expected: usize, found: usize },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::TooFewLinks(n) => write!(f, "Spring chain needs at least one link, got {}", n),
            ChainError::ParameterCountMismatch { expected, found } => {
                write!(f, "Expected {} spring parameters, got {}", expected, found)
            }
        }
    }
}

impl std::error::Error for ChainError {}

pub type ChainResult<T> = Result<T, ChainError>;

// =============================================================================
// Chain parts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spring {
    pub stiffness: f32,
    pub damping: f32,
}

/// Immovable end of the chain. `velocity` is only non-zero while the
/// anchor is being driven, and feeds the damper.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Anchor {
    pub position: Vec3,
    pub velocity: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEnd {
    Left,
    Right,
}

/// Where a spring attaches on a neighbour, and how fast that point moves.
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    position: Vec3,
    velocity: Vec3,
}

/// Integrated quantities of one link. Also used for their derivatives.
#[derive(Debug, Clone, Copy)]
struct LinkState {
    position: Vec3,
    rotation: Mat3,
    momentum: Vec3,
    angular_momentum: Vec3,
}

impl LinkState {
    fn of(link: &RigidLink) -> Self {
        Self {
            position: link.position,
            rotation: Mat3::from_quat(link.orientation),
            momentum: link.linear_momentum,
            angular_momentum: link.angular_momentum,
        }
    }

    /// `self + rate * h`, with the rotation pulled back onto a rotation.
    fn offset(&self, rate: &LinkState, h: f32) -> Self {
        Self {
            position: self.position + rate.position * h,
            rotation: Mat3::from_quat(orthonormalize(self.rotation + rate.rotation * h)),
            momentum: self.momentum + rate.momentum * h,
            angular_momentum: self.angular_momentum + rate.angular_momentum * h,
        }
    }
}

// =============================================================================
// Chain
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SpringChain {
    pub anchors: [Anchor; 2],
    pub links: Vec<RigidLink>,
    /// `springs[i]` sits left of `links[i]`; the last one meets the right
    /// anchor.
    pub springs: Vec<Spring>,
    pub gravity: Vec3,
}

impl SpringChain {
    pub fn new(
        left: Vec3,
        right: Vec3,
        links: Vec<RigidLink>,
        springs: Vec<Spring>,
        gravity: Vec3,
    ) -> ChainResult<Self> {
        if links.is_empty() {
            return Err(ChainError::TooFewLinks(0));
        }
        if springs.len() != links.len() + 1 {
            return Err(ChainError::ParameterCountMismatch {
                expected: links.len() + 1,
                found: springs.len(),
            });
        }
        Ok(Self {
            anchors: [
                Anchor {
                    position: left,
                    velocity: Vec3::ZERO,
                },
                Anchor {
                    position: right,
                    velocity: Vec3::ZERO,
                },
            ],
            links,
            springs,
            gravity,
        })
    }

    /// Cuboid links laid end to end between the configured anchors with
    /// equal gaps, one fewer link than springs.
    pub fn from_config(config: &SpringChainConfig) -> ChainResult<Self> {
        if config.damping.len() != config.stiffness.len() {
            return Err(ChainError::ParameterCountMismatch {
                expected: config.stiffness.len(),
                found: config.damping.len(),
            });
        }
        let link_count = config.stiffness.len().saturating_sub(1);
        if link_count == 0 {
            return Err(ChainError::TooFewLinks(link_count));
        }

        let span = config.right_anchor - config.left_anchor;
        let direction = span.try_normalize().unwrap_or(Vec3::X);
        let orientation = rotation_between(Vec3::X, direction);
        let half_length = config.link_half_extents.x;
        let gap = (span.length() - 2.0 * half_length * link_count as f32) / (link_count as f32 + 1.0);

        let links = (0..link_count)
            .map(|i| {
                let along = gap * (i as f32 + 1.0) + half_length * (2.0 * i as f32 + 1.0);
                let mut link = RigidLink::cuboid(
                    config.left_anchor + direction * along,
                    config.link_half_extents,
                    config.link_mass,
                );
                link.orientation = orientation;
                link
            })
            .collect();
        let springs = config
            .stiffness
            .iter()
            .zip(&config.damping)
            .map(|(&stiffness, &damping)| Spring { stiffness, damping })
            .collect();

        Self::new(config.left_anchor, config.right_anchor, links, springs, config.gravity)
    }

    fn anchor_mut(&mut self, end: ChainEnd) -> &mut Anchor {
        match end {
            ChainEnd::Left => &mut self.anchors[0],
            ChainEnd::Right => &mut self.anchors[1],
        }
    }

    /// Move an anchor by `offset` over `dt` seconds.
    pub fn drive_anchor(&mut self, end: ChainEnd, offset: Vec3, dt: f32) {
        let anchor = self.anchor_mut(end);
        anchor.position += offset;
        anchor.velocity = if dt > 0.0 { offset / dt } else { Vec3::ZERO };
    }

    /// Stop driving one anchor; it holds its current position.
    pub fn release_anchor(&mut self, end: ChainEnd) {
        self.anchor_mut(end).velocity = Vec3::ZERO;
    }

    pub fn release_anchors(&mut self) {
        self.release_anchor(ChainEnd::Left);
        self.release_anchor(ChainEnd::Right);
    }

    /// Neighbour attachment on the left of link `i`.
    fn left_of(&self, i: usize) -> Endpoint {
        match i.checked_sub(1).and_then(|j| self.links.get(j)) {
            Some(link) => {
                let position = link.anchor_b();
                Endpoint {
                    position,
                    velocity: link.velocity_at(position),
                }
            }
            None => Endpoint {
                position: self.anchors[0].position,
                velocity: self.anchors[0].velocity,
            },
        }
    }

    /// Neighbour attachment on the right of link `i`.
    fn right_of(&self, i: usize) -> Endpoint {
        match self.links.get(i + 1) {
            Some(link) => {
                let position = link.anchor_a();
                Endpoint {
                    position,
                    velocity: link.velocity_at(position),
                }
            }
            None => Endpoint {
                position: self.anchors[1].position,
                velocity: self.anchors[1].velocity,
            },
        }
    }

    /// Time derivative of link `i`'s state with both neighbours frozen.
    fn derivative(&self, i: usize, state: &LinkState, left: Endpoint, right: Endpoint) -> LinkState {
        let link = &self.links[i];
        let mass = &link.mass;

        let inv_inertia = state.rotation * mass.inv_inertia * state.rotation.transpose();
        let velocity = state.momentum * mass.inv_mass;
        let omega = inv_inertia * state.angular_momentum;

        let arm_a = state.rotation * link.anchor_a_local;
        let arm_b = state.rotation * link.anchor_b_local;
        let velocity_a = velocity + omega.cross(arm_a);
        let velocity_b = velocity + omega.cross(arm_b);

        let half_weight = 0.5 * mass.mass * self.gravity;
        let spring_a = self.springs[i];
        let spring_b = self.springs[i + 1];

        let force_a = spring_a.stiffness * (left.position - (state.position + arm_a))
            + half_weight
            + spring_a.damping * (left.velocity - velocity_a);
        let force_b = spring_b.stiffness * (right.position - (state.position + arm_b))
            + half_weight
            + spring_b.damping * (right.velocity - velocity_b);

        LinkState {
            position: velocity,
            rotation: tilde(omega) * state.rotation,
            momentum: force_a + force_b,
            angular_momentum: arm_a.cross(force_a) + arm_b.cross(force_b),
        }
    }

    /// Advance every link by `dt` with RK4.
    pub fn step(&mut self, dt: f32) {
        for i in 0..self.links.len() {
            let left = self.left_of(i);
            let right = self.right_of(i);
            let s0 = LinkState::of(&self.links[i]);

            let k1 = self.derivative(i, &s0, left, right);
            let k2 = self.derivative(i, &s0.offset(&k1, dt * 0.5), left, right);
            let k3 = self.derivative(i, &s0.offset(&k2, dt * 0.5), left, right);
            let k4 = self.derivative(i, &s0.offset(&k3, dt), left, right);

            let rate = LinkState {
                position: (k1.position + 2.0 * k2.position + 2.0 * k3.position + k4.position) / 6.0,
                rotation: (k1.rotation + k2.rotation * 2.0 + k3.rotation * 2.0 + k4.rotation) * (1.0 / 6.0),
                momentum: (k1.momentum + 2.0 * k2.momentum + 2.0 * k3.momentum + k4.momentum) / 6.0,
                angular_momentum: (k1.angular_momentum
                    + 2.0 * k2.angular_momentum
                    + 2.0 * k3.angular_momentum
                    + k4.angular_momentum)
                    / 6.0,
            };
            let next = s0.offset(&rate, dt);

            let link = &mut self.links[i];
            link.position = next.position;
            link.orientation = orthonormalize(next.rotation);
            link.linear_momentum = next.momentum;
            link.angular_momentum = next.angular_momentum;
        }
    }

    /// Run `steps` fixed steps, logging the energy at the end.
    pub fn simulate(&mut self, dt: f32, steps: usize) {
        for _ in 0..steps {
            self.step(dt);
        }
        debug!(
            "Spring chain after {} steps: kinetic energy {:.5}",
            steps,
            self.kinetic_energy()
        );
    }

    /// Every spring as a `(left, right)` segment, left to right.
    pub fn spring_segments(&self) -> Vec<(Vec3, Vec3)> {
        (0..self.springs.len())
            .map(|i| {
                let left = match i.checked_sub(1) {
                    Some(j) => self.links[j].anchor_b(),
                    None => self.anchors[0].position,
                };
                let right = match self.links.get(i) {
                    Some(link) => link.anchor_a(),
                    None => self.anchors[1].position,
                };
                (left, right)
            })
            .collect()
    }

    pub fn total_momentum(&self) -> Vec3 {
        self.links.iter().map(|l| l.linear_momentum).sum()
    }

    pub fn kinetic_energy(&self) -> f32 {
        self.links.iter().map(RigidLink::kinetic_energy).sum()
    }

    /// Springs in one colour, link axes (A to B) in another.
    pub fn debug_lines(&self, spring_color: Vec4, link_color: Vec4) -> LineBatch {
        let mut batch = LineBatch::default();
        for (a, b) in self.spring_segments() {
            batch.push_line(a, b, spring_color);
        }
        for link in &self.links {
            batch.push_line(link.anchor_a(), link.anchor_b(), link_color);
        }
        batch
    }

    /// World orientation of every link, for syncing transforms.
    pub fn link_poses(&self) -> impl Iterator<Item = (Vec3, Quat)> + '_ {
        self.links.iter().map(|l| (l.position, l.orientation))
    }
}
