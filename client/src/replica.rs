//! Client-side replica of the authoritative session.
//!
//! Holds the last broadcast state of every player and the bomb, plus a
//! locally predicted copy of our own player. Prediction applies our inputs
//! immediately through the same shared integration the server runs; when an
//! authoritative broadcast disagrees beyond a small threshold, the predicted
//! state is reset to server truth and the unacknowledged inputs replayed.

use log::debug;
use shared::{
    apply_intent, step_physics, EntitySnapshot, MoveInput, MovementTunables, PlayerState,
    ReplicatedBody,
};
use std::collections::HashMap;

/// Divergence (in world units) between predicted and confirmed position
/// that forces a rollback.
const ROLLBACK_THRESHOLD: f32 = 0.5;

const PREDICTION_DT: f32 = 1.0 / 30.0;

pub struct Replica {
    pub players: HashMap<u64, PlayerState>,
    pub bomb: ReplicatedBody,
    pub bomb_holder: Option<u64>,
    pub bomb_duration: f32,
    pub bomb_elapsed: f32,
    pub bomb_activated: bool,
    /// Explosion effect latch; a repeated trigger is a no-op.
    bomb_exploded: bool,
    pub round_active: bool,
    pub last_winner: Option<u64>,
    pub tunables: MovementTunables,

    local_id: Option<u64>,
    predicted: Option<PlayerState>,
    input_history: Vec<MoveInput>,
}

impl Replica {
    pub fn new() -> Self {
        Replica {
            players: HashMap::new(),
            bomb: ReplicatedBody::default(),
            bomb_holder: None,
            bomb_duration: 0.0,
            bomb_elapsed: 0.0,
            bomb_activated: false,
            bomb_exploded: false,
            round_active: false,
            last_winner: None,
            tunables: MovementTunables::default(),
            local_id: None,
            predicted: None,
            input_history: Vec::new(),
        }
    }

    pub fn set_local_id(&mut self, id: u64) {
        self.local_id = Some(id);
    }

    pub fn local_id(&self) -> Option<u64> {
        self.local_id
    }

    pub fn predicted(&self) -> Option<&PlayerState> {
        self.predicted.as_ref()
    }

    /// Applies an authoritative state broadcast, reconciling our predicted
    /// player against server truth.
    pub fn apply_game_state(
        &mut self,
        players: Vec<PlayerState>,
        last_processed_input: &HashMap<u64, u32>,
    ) {
        self.players.clear();
        for player in players {
            self.players.insert(player.id, player);
        }

        let local_id = match self.local_id {
            Some(id) => id,
            None => return,
        };
        let confirmed = match self.players.get(&local_id) {
            Some(state) => state.clone(),
            None => {
                self.predicted = None;
                return;
            }
        };

        if let Some(&processed) = last_processed_input.get(&local_id) {
            self.input_history
                .retain(|input| input.sequence > processed);
        }

        match self.predicted.as_mut() {
            None => {
                self.predicted = Some(confirmed);
            }
            Some(predicted) => {
                // Flags and stamina are never predicted, only transforms
                predicted.name = confirmed.name.clone();
                predicted.is_alive = confirmed.is_alive;
                predicted.has_bomb = confirmed.has_bomb;
                predicted.has_won = confirmed.has_won;
                predicted.stamina = confirmed.stamina;

                let divergence = predicted.position.distance(&confirmed.position);
                if divergence > ROLLBACK_THRESHOLD {
                    debug!("Rollback needed, divergence {:.2}", divergence);
                    let mut replayed = confirmed;
                    for input in &self.input_history {
                        apply_intent(&mut replayed, &self.tunables, input, PREDICTION_DT);
                        step_physics(&mut replayed, &self.tunables, None, true, PREDICTION_DT);
                    }
                    self.predicted = Some(replayed);
                }
            }
        }
    }

    /// Applies one local input to the predicted state before the server has
    /// confirmed it.
    pub fn predict(&mut self, input: &MoveInput) {
        self.input_history.push(input.clone());
        if let Some(predicted) = self.predicted.as_mut() {
            apply_intent(predicted, &self.tunables, input, PREDICTION_DT);
        }
    }

    /// Advances the predicted state by one frame.
    pub fn step(&mut self, dt: f32) {
        if let Some(predicted) = self.predicted.as_mut() {
            step_physics(predicted, &self.tunables, None, true, dt);
        }
    }

    pub fn pending_inputs(&self) -> usize {
        self.input_history.len()
    }

    pub fn on_name_resolved(&mut self, id: u64, name: String) {
        if let Some(player) = self.players.get_mut(&id) {
            player.name = name;
        }
    }

    pub fn on_round_started(&mut self) {
        self.round_active = true;
        self.bomb_activated = false;
        self.bomb_exploded = false;
        self.last_winner = None;
    }

    pub fn on_bomb_activated(&mut self, holder: u64, duration: f32, elapsed: f32) {
        // Repeated activation is a no-op, matching the broadcast contract
        if self.bomb_activated {
            return;
        }
        self.bomb_activated = true;
        self.bomb_holder = Some(holder);
        self.bomb_duration = duration;
        self.bomb_elapsed = elapsed;
    }

    pub fn on_bomb_timer(&mut self, elapsed: f32) {
        self.bomb_elapsed = elapsed;
    }

    /// Returns true when the explosion effect should actually fire; the
    /// latch makes duplicate triggers no-ops until the next round.
    pub fn on_bomb_exploded(&mut self) -> bool {
        if self.bomb_exploded {
            return false;
        }
        self.bomb_exploded = true;
        true
    }

    pub fn on_possession_changed(&mut self, holder: u64) {
        self.bomb_holder = Some(holder);
        for player in self.players.values_mut() {
            player.has_bomb = player.id == holder;
        }
    }

    pub fn on_bomb_physics_mode(&mut self, enabled: bool) {
        self.bomb.set_physics_driven(enabled);
    }

    pub fn on_bomb_state(&mut self, snapshot: &EntitySnapshot) {
        self.bomb.apply_state(snapshot);
    }

    pub fn on_round_ended(&mut self, winner: Option<u64>) {
        self.round_active = false;
        self.bomb_holder = None;
        self.last_winner = winner;
    }

    /// Players as they should be displayed: our own predicted state, server
    /// truth for everyone else.
    pub fn render_players(&self) -> Vec<PlayerState> {
        let mut out = Vec::with_capacity(self.players.len());
        for (id, player) in &self.players {
            if Some(*id) == self.local_id {
                if let Some(predicted) = &self.predicted {
                    out.push(predicted.clone());
                    continue;
                }
            }
            out.push(player.clone());
        }
        out
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec3;

    fn broadcast(players: Vec<PlayerState>) -> (Vec<PlayerState>, HashMap<u64, u32>) {
        (players, HashMap::new())
    }

    fn forward(source: u64, sequence: u32) -> MoveInput {
        MoveInput {
            source,
            sequence,
            forward: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_game_state_replaces_players() {
        let mut replica = Replica::new();
        let (players, acks) = broadcast(vec![
            PlayerState::new(1, Vec3::ZERO),
            PlayerState::new(2, Vec3::new(1.0, 0.0, 0.0)),
        ]);
        replica.apply_game_state(players, &acks);
        assert_eq!(replica.players.len(), 2);

        let (players, acks) = broadcast(vec![PlayerState::new(2, Vec3::ZERO)]);
        replica.apply_game_state(players, &acks);
        assert_eq!(replica.players.len(), 1);
        assert!(!replica.players.contains_key(&1));
    }

    #[test]
    fn test_prediction_initialized_from_confirmed() {
        let mut replica = Replica::new();
        replica.set_local_id(1);

        let (players, acks) = broadcast(vec![PlayerState::new(1, Vec3::new(2.0, 0.0, 3.0))]);
        replica.apply_game_state(players, &acks);

        assert_eq!(
            replica.predicted().unwrap().position,
            Vec3::new(2.0, 0.0, 3.0)
        );
    }

    #[test]
    fn test_small_divergence_keeps_prediction() {
        let mut replica = Replica::new();
        replica.set_local_id(1);

        let (players, acks) = broadcast(vec![PlayerState::new(1, Vec3::ZERO)]);
        replica.apply_game_state(players, &acks);

        // Drift the prediction slightly under the threshold
        replica.predicted.as_mut().unwrap().position = Vec3::new(0.2, 0.0, 0.0);
        let (players, acks) = broadcast(vec![PlayerState::new(1, Vec3::ZERO)]);
        replica.apply_game_state(players, &acks);

        assert_eq!(
            replica.predicted().unwrap().position,
            Vec3::new(0.2, 0.0, 0.0)
        );
    }

    #[test]
    fn test_large_divergence_rolls_back_and_replays() {
        let mut replica = Replica::new();
        replica.set_local_id(1);

        let (players, acks) = broadcast(vec![PlayerState::new(1, Vec3::ZERO)]);
        replica.apply_game_state(players, &acks);

        replica.predict(&forward(1, 1));
        replica.predict(&forward(1, 2));
        replica.predicted.as_mut().unwrap().position = Vec3::new(50.0, 0.0, 0.0);

        // Server confirms origin and has processed nothing yet
        let confirmed = PlayerState::new(1, Vec3::ZERO);
        let mut acks = HashMap::new();
        acks.insert(1u64, 0u32);
        replica.apply_game_state(vec![confirmed], &acks);

        // Rolled back to server truth, then both pending inputs replayed
        let predicted = replica.predicted().unwrap();
        assert!(predicted.position.x.abs() < 1.0);
        assert!(predicted.position.z > 0.0);
        assert_eq!(replica.pending_inputs(), 2);
    }

    #[test]
    fn test_acknowledged_inputs_are_trimmed() {
        let mut replica = Replica::new();
        replica.set_local_id(1);

        let (players, acks) = broadcast(vec![PlayerState::new(1, Vec3::ZERO)]);
        replica.apply_game_state(players, &acks);

        replica.predict(&forward(1, 1));
        replica.predict(&forward(1, 2));
        replica.predict(&forward(1, 3));

        let mut acks = HashMap::new();
        acks.insert(1u64, 2u32);
        replica.apply_game_state(vec![PlayerState::new(1, Vec3::ZERO)], &acks);

        assert_eq!(replica.pending_inputs(), 1);
    }

    #[test]
    fn test_flags_are_never_predicted() {
        let mut replica = Replica::new();
        replica.set_local_id(1);

        let (players, acks) = broadcast(vec![PlayerState::new(1, Vec3::ZERO)]);
        replica.apply_game_state(players, &acks);

        let mut confirmed = PlayerState::new(1, Vec3::ZERO);
        confirmed.has_bomb = true;
        confirmed.stamina = 42.0;
        replica.apply_game_state(vec![confirmed], &HashMap::new());

        let predicted = replica.predicted().unwrap();
        assert!(predicted.has_bomb);
        assert_eq!(predicted.stamina, 42.0);
    }

    #[test]
    fn test_explosion_latch_is_idempotent() {
        let mut replica = Replica::new();
        assert!(replica.on_bomb_exploded());
        assert!(!replica.on_bomb_exploded());

        // New round re-arms the latch
        replica.on_round_started();
        assert!(replica.on_bomb_exploded());
    }

    #[test]
    fn test_possession_updates_bomb_flags() {
        let mut replica = Replica::new();
        let (players, acks) = broadcast(vec![
            PlayerState::new(1, Vec3::ZERO),
            PlayerState::new(2, Vec3::ZERO),
        ]);
        replica.apply_game_state(players, &acks);

        replica.on_possession_changed(2);
        assert_eq!(replica.bomb_holder, Some(2));
        assert!(!replica.players.get(&1).unwrap().has_bomb);
        assert!(replica.players.get(&2).unwrap().has_bomb);

        replica.on_possession_changed(1);
        assert!(replica.players.get(&1).unwrap().has_bomb);
        assert!(!replica.players.get(&2).unwrap().has_bomb);
    }

    #[test]
    fn test_duplicate_activation_ignored() {
        let mut replica = Replica::new();
        replica.on_round_started();
        replica.on_bomb_activated(1, 30.0, 0.0);
        replica.on_bomb_activated(2, 99.0, 5.0);

        assert_eq!(replica.bomb_holder, Some(1));
        assert_eq!(replica.bomb_duration, 30.0);
    }

    #[test]
    fn test_render_players_prefers_prediction_for_self() {
        let mut replica = Replica::new();
        replica.set_local_id(1);

        let (players, acks) = broadcast(vec![
            PlayerState::new(1, Vec3::ZERO),
            PlayerState::new(2, Vec3::new(5.0, 0.0, 0.0)),
        ]);
        replica.apply_game_state(players, &acks);
        replica.predicted.as_mut().unwrap().position = Vec3::new(0.3, 0.0, 0.0);

        let rendered = replica.render_players();
        let me = rendered.iter().find(|p| p.id == 1).unwrap();
        let other = rendered.iter().find(|p| p.id == 2).unwrap();
        assert_eq!(me.position, Vec3::new(0.3, 0.0, 0.0));
        assert_eq!(other.position, Vec3::new(5.0, 0.0, 0.0));
    }
}
