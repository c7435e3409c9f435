//! Replicated player state and the movement integration shared by the
//! authoritative simulation and client-side prediction.
//!
//! Both sides must run the exact same math over the same tunables, otherwise
//! predicted movement drifts from server truth and every broadcast triggers
//! a rollback.

use crate::math::{yaw_forward, yaw_right, Vec3};
use crate::replication::EntitySnapshot;
use crate::{GROUND_Y, JUMP_STAMINA_COST};
use serde::{Deserialize, Serialize};

/// One tick of movement intent from a client. Consumed once by the
/// authoritative movement resolver, never persisted.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MoveInput {
    pub sequence: u32,
    pub timestamp: u64,
    /// Connection identity the intent claims to originate from. Validated
    /// against the receiving player session before any state changes.
    pub source: u64,
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub sprint: bool,
}

impl MoveInput {
    pub fn is_idle(&self) -> bool {
        !(self.forward || self.backward || self.left || self.right || self.up || self.down)
    }
}

/// Server-owned movement parameters, assigned to each player on join.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovementTunables {
    pub movement_speed: f32,
    pub running_speed: f32,
    pub jump_height: f32,
    pub gravity: f32,
    pub drag: f32,
    pub terminal_velocity: f32,
    pub max_stamina: f32,
    pub stamina_regen: f32,
    pub stamina_drain: f32,
}

impl Default for MovementTunables {
    fn default() -> Self {
        MovementTunables {
            movement_speed: 6.0,
            running_speed: 14.0,
            jump_height: 8.0,
            gravity: 17.0,
            drag: 40.0,
            terminal_velocity: 30.0,
            max_stamina: 100.0,
            stamina_regen: 10.0,
            stamina_drain: 20.0,
        }
    }
}

/// The read-mostly replica of one player. Owned exclusively by the
/// authoritative side; clients receive copies through state broadcasts.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlayerState {
    pub id: u64,
    pub name: String,
    pub position: Vec3,
    /// Yaw around the vertical axis, radians.
    pub yaw: f32,
    /// Pitch of the view, radians. Does not affect movement.
    pub pitch: f32,
    pub velocity: Vec3,
    pub is_grounded: bool,
    pub is_alive: bool,
    pub has_bomb: bool,
    pub has_won: bool,
    pub stamina: f32,
}

impl PlayerState {
    pub fn new(id: u64, position: Vec3) -> Self {
        PlayerState {
            id,
            name: String::new(),
            position,
            yaw: 0.0,
            pitch: 0.0,
            velocity: Vec3::ZERO,
            is_grounded: true,
            is_alive: true,
            has_bomb: false,
            has_won: false,
            stamina: MovementTunables::default().max_stamina,
        }
    }

    /// Stamina as a 0..100 percentage for presentation layers.
    pub fn stamina_percent(&self, tunables: &MovementTunables) -> f32 {
        if tunables.max_stamina <= 0.0 {
            return 0.0;
        }
        (self.stamina / tunables.max_stamina * 100.0).clamp(0.0, 100.0)
    }

    /// Transform snapshot in the shared replication format.
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            position: self.position,
            rotation: Vec3::new(self.pitch, self.yaw, 0.0),
            velocity: self.velocity,
            scale: Vec3::ONE,
        }
    }

    /// Writes a transform snapshot back into this replica.
    pub fn apply_snapshot(&mut self, snapshot: &EntitySnapshot) {
        self.position = snapshot.position;
        self.pitch = snapshot.rotation.x;
        self.yaw = snapshot.rotation.y;
        self.velocity = snapshot.velocity;
    }
}

/// Resolves one movement intent into the player's velocity. Returns whether
/// the player is sprinting this tick so the caller can suppress regen.
///
/// Horizontal flags map to yaw-relative axes. Jumping is gated by
/// `is_grounded` and costs a flat chunk of stamina; the down flag is a
/// fast-fall nudge that only applies airborne. Sprint needs stamina left.
pub fn apply_intent(
    state: &mut PlayerState,
    tunables: &MovementTunables,
    input: &MoveInput,
    dt: f32,
) -> bool {
    let fw = yaw_forward(state.yaw);
    let right = yaw_right(state.yaw);

    let mut wish = Vec3::ZERO;
    if input.forward {
        wish = wish.add(&fw);
    }
    if input.backward {
        wish = wish.sub(&fw);
    }
    if input.right {
        wish = wish.add(&right);
    }
    if input.left {
        wish = wish.sub(&right);
    }
    wish = wish.normalize();

    let moving = wish.magnitude() > 0.0;
    let sprinting = input.sprint && moving && state.stamina > 0.0;

    let speed = if sprinting {
        tunables.running_speed
    } else {
        tunables.movement_speed
    };

    if moving {
        state.velocity.x = wish.x * speed;
        state.velocity.z = wish.z * speed;
    }

    if sprinting {
        state.stamina = (state.stamina - tunables.stamina_drain * dt).max(0.0);
    }

    if input.up && state.is_grounded {
        state.velocity.y = tunables.jump_height;
        state.is_grounded = false;
        state.stamina = (state.stamina - JUMP_STAMINA_COST).max(0.0);
    }

    if input.down && !state.is_grounded {
        state.velocity.y -= tunables.jump_height * dt;
    }

    sprinting
}

/// Integrates gravity, drag and position for one tick and snaps the player
/// to the ground plane. `drag_override` replaces the normal drag while a
/// forced slide is in effect.
pub fn step_physics(
    state: &mut PlayerState,
    tunables: &MovementTunables,
    drag_override: Option<f32>,
    regen_stamina: bool,
    dt: f32,
) {
    if !state.is_grounded {
        state.velocity.y -= tunables.gravity * dt;
        if state.velocity.y < -tunables.terminal_velocity {
            state.velocity.y = -tunables.terminal_velocity;
        }
    }

    let drag = drag_override.unwrap_or(tunables.drag);
    if drag > 0.0 {
        let damp = 1.0 / (1.0 + drag * dt);
        state.velocity.x *= damp;
        state.velocity.z *= damp;
    }

    state.position = state.position.add(&state.velocity.scale(dt));

    if state.position.y <= GROUND_Y {
        state.position.y = GROUND_Y;
        if state.velocity.y < 0.0 {
            state.velocity.y = 0.0;
        }
        state.is_grounded = true;
    } else {
        state.is_grounded = false;
    }

    if regen_stamina {
        state.stamina = (state.stamina + tunables.stamina_regen * dt).min(tunables.max_stamina);
    }
}
