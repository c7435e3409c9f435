//! Authoritative per-connection player session.
//!
//! Owns one player's movement, stamina and alive/bomb/win flags, and is the
//! validation gate for every client-originated request. Clients only ever
//! see the [`PlayerState`] replica broadcast from here.

use crate::events::{EventQueue, GameEvent};
use log::{debug, warn};
use shared::{apply_intent, step_physics, MoveInput, MovementTunables, PlayerState, Vec3};

/// Pure transform applied to raw movement flags before resolution. Owned by
/// whichever system currently holds the hook (the bomb, while carried).
pub type MovementHook = fn(MoveInput) -> MoveInput;

/// Identity hook: the carried bomb claims the holder's movement without
/// remapping it.
pub fn passthrough_hook(input: MoveInput) -> MoveInput {
    input
}

/// Lifecycle of one connection's player entity. `Disconnected` is terminal;
/// eliminated players stay `Active` (they remain in the roster for result
/// reporting) with `is_alive` cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    /// Joined, waiting for identity resolution.
    Connecting,
    Active,
    Disconnected,
}

pub struct PlayerSession {
    pub state: PlayerState,
    pub tunables: MovementTunables,
    phase: PlayerPhase,
    can_move: bool,
    forced_slide_remaining: f32,
    drag_override: Option<f32>,
    movement_hook: Option<MovementHook>,
    sprinted: bool,
}

impl PlayerSession {
    pub fn new(id: u64, spawn: Vec3, tunables: MovementTunables) -> Self {
        let mut state = PlayerState::new(id, spawn);
        state.stamina = tunables.max_stamina;
        PlayerSession {
            state,
            tunables,
            phase: PlayerPhase::Connecting,
            can_move: true,
            forced_slide_remaining: 0.0,
            drag_override: None,
            movement_hook: None,
            sprinted: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn phase(&self) -> PlayerPhase {
        self.phase
    }

    pub fn can_move(&self) -> bool {
        self.can_move
    }

    /// Completes the join handshake once the identity provider answered.
    pub fn activate(&mut self, name: String, events: &mut EventQueue) {
        if self.phase != PlayerPhase::Connecting {
            debug!("Player {} name resolved after activation", self.state.id);
        }
        self.state.name = name.clone();
        self.phase = PlayerPhase::Active;
        events.push(GameEvent::NameResolved {
            id: self.state.id,
            name,
        });
    }

    pub fn mark_disconnected(&mut self) {
        self.phase = PlayerPhase::Disconnected;
    }

    /// Resolves a movement intent. Rejected (logged, no state change) unless
    /// the request comes from this entity's own connection, the session is
    /// active, the player is alive and movement is currently allowed.
    pub fn request_move(&mut self, input: &MoveInput, requesting: u64, dt: f32) -> bool {
        if requesting != self.state.id || input.source != self.state.id {
            warn!(
                "Connection {} tried to move player {}",
                requesting, self.state.id
            );
            return false;
        }
        if self.phase != PlayerPhase::Active {
            debug!("Move for player {} ignored: not active", self.state.id);
            return false;
        }
        if !self.state.is_alive || !self.can_move {
            debug!("Move for player {} ignored: no authority", self.state.id);
            return false;
        }

        let resolved = match self.movement_hook {
            Some(hook) => hook(input.clone()),
            None => input.clone(),
        };

        self.sprinted = apply_intent(&mut self.state, &self.tunables, &resolved, dt);
        true
    }

    /// Applies a yaw/pitch delta under the same authority check as movement.
    pub fn request_rotate(&mut self, yaw: f32, pitch: f32, requesting: u64) -> bool {
        if requesting != self.state.id {
            warn!(
                "Connection {} tried to rotate player {}",
                requesting, self.state.id
            );
            return false;
        }
        if self.phase != PlayerPhase::Active || !self.state.is_alive {
            return false;
        }

        self.state.yaw += yaw;
        self.state.pitch = (self.state.pitch + pitch).clamp(-1.5, 1.5);
        true
    }

    pub fn set_alive(&mut self, alive: bool, events: &mut EventQueue) {
        if self.state.is_alive != alive {
            self.state.is_alive = alive;
            events.push(GameEvent::AliveChanged {
                id: self.state.id,
                alive,
            });
        }
    }

    pub fn set_can_move(&mut self, can_move: bool) {
        self.can_move = can_move;
    }

    pub fn set_bomb_held(&mut self, held: bool, events: &mut EventQueue) {
        if self.state.has_bomb != held {
            self.state.has_bomb = held;
            events.push(GameEvent::BombHeldChanged {
                id: self.state.id,
                held,
            });
        }
    }

    pub fn set_won(&mut self, won: bool, events: &mut EventQueue) {
        if self.state.has_won != won {
            self.state.has_won = won;
            events.push(GameEvent::ResultChanged {
                id: self.state.id,
                won,
            });
        }
    }

    /// Timed knockback override: move authority is revoked and the effective
    /// drag zeroed so current velocity carries the player, until the timer
    /// restores both.
    pub fn apply_forced_slide(&mut self, duration: f32, events: &mut EventQueue) {
        self.can_move = false;
        self.drag_override = Some(0.0);
        self.forced_slide_remaining = duration;
        events.push(GameEvent::ForcedSlide {
            id: self.state.id,
            duration,
        });
    }

    /// Ends an active forced slide early, restoring drag and move authority.
    pub fn clear_forced_slide(&mut self) {
        if self.forced_slide_remaining > 0.0 {
            self.forced_slide_remaining = 0.0;
            self.drag_override = None;
            self.can_move = true;
        }
    }

    pub fn is_force_sliding(&self) -> bool {
        self.forced_slide_remaining > 0.0
    }

    /// Installs a movement hook. Fails if another system already holds one.
    pub fn hook_movement(&mut self, hook: MovementHook) -> bool {
        if self.movement_hook.is_some() {
            return false;
        }
        self.movement_hook = Some(hook);
        true
    }

    /// The single release path, used on normal handoff and on abrupt
    /// destruction of the hook owner.
    pub fn unhook_movement(&mut self) {
        self.movement_hook = None;
    }

    pub fn is_movement_hooked(&self) -> bool {
        self.movement_hook.is_some()
    }

    pub fn teleport(&mut self, position: Vec3) {
        self.state.position = position;
        self.state.velocity = Vec3::ZERO;
    }

    pub fn stamina_percent(&self) -> f32 {
        self.state.stamina_percent(&self.tunables)
    }

    /// One simulation step: forced-slide countdown, then the shared physics
    /// integration. Stamina regenerates unless this tick's intent sprinted.
    pub fn tick(&mut self, dt: f32) {
        if self.forced_slide_remaining > 0.0 {
            self.forced_slide_remaining -= dt;
            if self.forced_slide_remaining <= 0.0 {
                self.forced_slide_remaining = 0.0;
                self.drag_override = None;
                self.can_move = true;
            }
        }

        let regen = !self.sprinted;
        step_physics(
            &mut self.state,
            &self.tunables,
            self.drag_override,
            regen,
            dt,
        );
        self.sprinted = false;
    }
}
