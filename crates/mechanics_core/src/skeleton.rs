//! Animated skeleton pose as seen by the IK stage.
//!
//! Whatever drives animation writes world-space bone transforms here once
//! per frame; the IK chain reads them back before each solve and writes the
//! solved joints into the same pose.

use std::collections::HashMap;

use bevy::prelude::Resource;

use crate::vqs::Vqs;

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub world: Vqs,
}

/// Ordered bones (parents before children) plus a name lookup.
#[derive(Resource, Debug, Clone, Default, PartialEq)]
pub struct SkeletonPose {
    bones: Vec<Bone>,
    names: HashMap<String, usize>,
}

impl SkeletonPose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bone with a world transform. Returns its index.
    pub fn push_bone(&mut self, name: impl Into<String>, parent: Option<usize>, world: Vqs) -> usize {
        let name = name.into();
        let index = self.bones.len();
        self.names.insert(name.clone(), index);
        self.bones.push(Bone { name, parent, world });
        index
    }

    /// Append a bone given relative to its parent.
    pub fn push_local(&mut self, name: impl Into<String>, parent: Option<usize>, local: Vqs) -> usize {
        let world = match parent.and_then(|p| self.bones.get(p)) {
            Some(parent_bone) => parent_bone.world * local,
            None => local,
        };
        self.push_bone(name, parent, world)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// Overwrite a bone's world transform. Out-of-range indices are ignored.
    pub fn set_world(&mut self, index: usize, world: Vqs) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.world = world;
        }
    }

    /// Parent transform of a bone, identity for roots.
    pub fn parent_world(&self, index: usize) -> Vqs {
        self.bones
            .get(index)
            .and_then(|b| b.parent)
            .and_then(|p| self.bones.get(p))
            .map(|p| p.world)
            .unwrap_or(Vqs::IDENTITY)
    }
}
