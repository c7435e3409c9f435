//! Transform/velocity state sync shared by every networked physical object.
//!
//! The authoritative side snapshots an object's transform with
//! [`ReplicatedBody::publish_state`] and broadcasts the result; replicas
//! write it back with [`ReplicatedBody::apply_state`]. A snapshot is applied
//! atomically within a single call and the next snapshot simply overwrites
//! the previous one (last-write-wins, no error channel).

use crate::math::Vec3;
use serde::{Deserialize, Serialize};

/// One broadcast frame of an object's transform state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub position: Vec3,
    /// Rotation as Euler angles (pitch, yaw, roll) in radians.
    pub rotation: Vec3,
    /// Zero when the object is not physics-driven.
    pub velocity: Vec3,
    pub scale: Vec3,
}

/// Replicated transform of a networked object.
///
/// An object is either physics-driven (position and velocity flow through
/// the simulated body) or kinematic (position is placed directly, velocity
/// is ignored). The bomb switches to kinematic "carried" mode while held
/// and back to physics mode once the round ends.
#[derive(Debug, Clone)]
pub struct ReplicatedBody {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    pub velocity: Vec3,
    physics_driven: bool,
}

impl Default for ReplicatedBody {
    fn default() -> Self {
        ReplicatedBody {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            velocity: Vec3::ZERO,
            physics_driven: true,
        }
    }
}

impl ReplicatedBody {
    pub fn new(position: Vec3) -> Self {
        ReplicatedBody {
            position,
            ..Default::default()
        }
    }

    pub fn is_physics_driven(&self) -> bool {
        self.physics_driven
    }

    /// Toggles between physics-driven and kinematic placement. Authoritative
    /// call; replicated to all clients through a dedicated packet.
    pub fn set_physics_driven(&mut self, enabled: bool) {
        self.physics_driven = enabled;
        if !enabled {
            self.velocity = Vec3::ZERO;
        }
    }

    /// Snapshots the current transform for broadcast. Velocity is reported
    /// only while physics-driven; kinematic objects always publish zero.
    pub fn publish_state(&self) -> EntitySnapshot {
        EntitySnapshot {
            position: self.position,
            rotation: self.rotation,
            velocity: if self.physics_driven {
                self.velocity
            } else {
                Vec3::ZERO
            },
            scale: self.scale,
        }
    }

    /// Writes a broadcast snapshot into this replica. Rotation and scale are
    /// written unconditionally; velocity is only taken over while the object
    /// is physics-driven.
    pub fn apply_state(&mut self, snapshot: &EntitySnapshot) {
        self.rotation = snapshot.rotation;
        self.scale = snapshot.scale;
        self.position = snapshot.position;
        if self.physics_driven {
            self.velocity = snapshot.velocity;
        }
    }
}
