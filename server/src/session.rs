//! Session orchestrator and authoritative context.
//!
//! One [`Session`] owns everything the authority mutates: the roster, the
//! live bomb, the event queue and the session clock. The network layer
//! feeds it client requests as discrete serialized calls and drains the
//! resulting events; nothing in here touches a socket. Requests from
//! different connections arriving within the same tick window are applied
//! in arrival order, so for competing mutations the last call wins.

use crate::bomb::{Bomb, BombPhase};
use crate::events::{EventQueue, GameEvent};
use crate::physics::PhysicsQuery;
use crate::player::PlayerSession;
use crate::roster::{deterministic_pick, AckOutcome, Roster};
use log::{debug, info, warn};
use shared::{
    yaw_forward, MoveInput, MovementTunables, PlayerState, Vec3, BOMB_DETONATION_SECS,
    BOMB_GRACE_EXTENSION_SECS, BOMB_PASS_COOLDOWN_SECS, FORCED_SLIDE_SECS, PASS_PUSH_STRENGTH,
    PASS_REACH,
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub min_players: usize,
    pub bomb_duration: f32,
    pub bomb_pass_cooldown: f32,
    pub bomb_grace_extension: f32,
    pub tunables: MovementTunables,
    pub death_position: Vec3,
    /// Spawn ring used while a round is running.
    pub inbound_spawn_points: Vec<Vec3>,
    /// Spawn ring used in the lobby.
    pub outbound_spawn_points: Vec<Vec3>,
    pub pass_reach: f32,
    pub pass_push_strength: f32,
    pub forced_slide_secs: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            min_players: 2,
            bomb_duration: BOMB_DETONATION_SECS,
            bomb_pass_cooldown: BOMB_PASS_COOLDOWN_SECS,
            bomb_grace_extension: BOMB_GRACE_EXTENSION_SECS,
            tunables: MovementTunables::default(),
            death_position: Vec3::new(0.0, -50.0, 0.0),
            inbound_spawn_points: vec![
                Vec3::new(8.0, 0.0, 8.0),
                Vec3::new(-8.0, 0.0, 8.0),
                Vec3::new(8.0, 0.0, -8.0),
                Vec3::new(-8.0, 0.0, -8.0),
            ],
            outbound_spawn_points: vec![
                Vec3::new(14.0, 0.0, 0.0),
                Vec3::new(-14.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 14.0),
                Vec3::new(0.0, 0.0, -14.0),
            ],
            pass_reach: PASS_REACH,
            pass_push_strength: PASS_PUSH_STRENGTH,
            forced_slide_secs: FORCED_SLIDE_SECS,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    pub roster: Roster,
    bomb: Option<Bomb>,
    events: EventQueue,
    physics: Box<dyn PhysicsQuery>,
    elapsed: f32,
    tick_count: u32,
    round_in_progress: bool,
}

impl Session {
    pub fn new(config: SessionConfig, physics: Box<dyn PhysicsQuery>) -> Self {
        let roster = Roster::new(config.min_players);
        Session {
            config,
            roster,
            bomb: None,
            events: EventQueue::new(),
            physics,
            elapsed: 0.0,
            tick_count: 0,
            round_in_progress: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Elapsed session time in seconds. Seeds the deterministic selection.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    pub fn round_in_progress(&self) -> bool {
        self.round_in_progress
    }

    pub fn bomb(&self) -> Option<&Bomb> {
        self.bomb.as_ref()
    }

    /// Creates the player entity for a freshly accepted connection, placed
    /// on the lobby spawn ring. The display name arrives later through
    /// [`Session::assign_name`].
    pub fn handle_join(&mut self, id: u64) -> bool {
        if self.roster.find_player(id).is_some() {
            warn!("Connection {} already has a player instance", id);
            return false;
        }

        let spawn = self.spawn_point(false, self.roster.len());
        let player = PlayerSession::new(id, spawn, self.config.tunables);
        if !self.roster.add_player(player) {
            return false;
        }
        self.events.push(GameEvent::PlayerJoined { id });
        true
    }

    /// Applies a resolved display name; completes the join handshake.
    pub fn assign_name(&mut self, id: u64, name: String) {
        match self.roster.find_player_mut(id) {
            Some(player) => player.activate(name, &mut self.events),
            None => debug!("Name resolved for {} after disconnect", id),
        }
    }

    /// Synchronous disconnect path. The roster is notified before anything
    /// else so no component ever sees a dangling reference, then the bomb
    /// reacts as if the player had been passed over.
    pub fn remove_player(&mut self, id: u64) {
        if self.roster.remove_player(id).is_none() {
            return;
        }
        self.events.push(GameEvent::PlayerLeft { id });

        if let Some(bomb) = self.bomb.as_mut() {
            bomb.on_player_disconnected(id, &mut self.roster, self.elapsed, &mut self.events);
            let ended = bomb.phase() == BombPhase::Ended;
            if ended {
                self.end_round();
            }
        }

        debug!(
            "{} players connected, round start {}",
            self.roster.len(),
            if self.roster.can_start() {
                "available"
            } else {
                "unavailable"
            }
        );
    }

    pub fn handle_move(&mut self, id: u64, input: &MoveInput, dt: f32) -> bool {
        match self.roster.find_player_mut(id) {
            Some(player) => player.request_move(input, id, dt),
            None => {
                warn!("Move from unknown connection {}", id);
                false
            }
        }
    }

    pub fn handle_rotate(&mut self, id: u64, yaw: f32, pitch: f32, source: u64) -> bool {
        if source != id {
            warn!("Connection {} sent rotate claiming source {}", id, source);
            return false;
        }
        match self.roster.find_player_mut(id) {
            Some(player) => player.request_rotate(yaw, pitch, id),
            None => false,
        }
    }

    /// One client finished loading. When the last expected ack lands, the
    /// bomb activates.
    pub fn handle_loaded_ack(&mut self, id: u64) {
        if self.record_ack(id) == AckOutcome::AllLoaded {
            match self.bomb.as_mut() {
                Some(bomb) => {
                    bomb.on_all_players_loaded(&mut self.roster, self.elapsed, &mut self.events)
                }
                None => debug!("Load gate completed without a bomb"),
            }
        }
    }

    fn record_ack(&mut self, id: u64) -> AckOutcome {
        self.roster.record_loaded_ack(id)
    }

    /// Direct pass request toward a specific target.
    pub fn handle_pass(&mut self, target: u64, requesting: u64) -> bool {
        match self.bomb.as_mut() {
            Some(bomb) => bomb.try_pass(
                target,
                requesting,
                &mut self.roster,
                self.elapsed,
                &mut self.events,
            ),
            None => {
                debug!("Pass from {} ignored: no bomb in play", requesting);
                false
            }
        }
    }

    /// Melee swing: raycast forward from the requester; a struck alive
    /// player is knocked into a forced slide, shoved, and handed the bomb.
    pub fn handle_swing(&mut self, requesting: u64) -> bool {
        let can_pass = match self.bomb.as_ref() {
            Some(bomb) => bomb.can_be_passed(),
            None => false,
        };
        if !can_pass {
            return false;
        }

        let (origin, yaw) = match self.roster.find_player(requesting) {
            Some(player) => (player.state.position, player.state.yaw),
            None => return false,
        };
        let direction = yaw_forward(yaw);

        let candidates: Vec<(u64, Vec3)> = self
            .roster
            .iter()
            .filter(|p| p.id() != requesting && p.state.is_alive)
            .map(|p| (p.id(), p.state.position))
            .collect();

        let hit = match self
            .physics
            .raycast(origin, direction, self.config.pass_reach, &candidates)
        {
            Some(hit) => hit,
            None => return false,
        };

        let valid = self
            .bomb
            .as_ref()
            .map_or(false, |bomb| bomb.is_valid_pass_target(hit));
        if !valid {
            return false;
        }

        if let Some(target) = self.roster.find_player_mut(hit) {
            target.apply_forced_slide(self.config.forced_slide_secs, &mut self.events);
            let push = direction.scale(self.config.pass_push_strength);
            target.state.velocity.x = push.x;
            target.state.velocity.z = push.z;
        }

        match self.bomb.as_mut() {
            Some(bomb) => bomb.try_pass(
                hit,
                requesting,
                &mut self.roster,
                self.elapsed,
                &mut self.events,
            ),
            None => false,
        }
    }

    /// Starts a round: everyone is teleported onto the in-round spawn ring,
    /// a fresh bomb spawns in carried (non-physics) mode and the load gate
    /// arms for the current roster. A no-op while a round is running.
    pub fn start_round(&mut self) -> bool {
        if self.round_in_progress {
            warn!("Can't start game, game is already running");
            return false;
        }
        if !self.roster.can_start() {
            warn!(
                "Can't start game with {} players (need {})",
                self.roster.len(),
                self.config.min_players
            );
            return false;
        }

        self.round_in_progress = true;

        let spawns: Vec<(u64, Vec3)> = self
            .roster
            .ids()
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, self.spawn_point(true, i)))
            .collect();
        for (id, spawn) in spawns {
            if let Some(player) = self.roster.find_player_mut(id) {
                player.teleport(spawn);
            }
        }

        let mut bomb = Bomb::new(
            self.config.bomb_duration,
            self.config.bomb_pass_cooldown,
            self.config.bomb_grace_extension,
            self.config.death_position,
        );
        bomb.body.set_physics_driven(false);
        bomb.begin_loading();
        self.bomb = Some(bomb);
        self.roster.arm_load_gate(self.roster.len());

        self.events.push(GameEvent::BombPhysicsMode { enabled: false });
        self.events.push(GameEvent::RoundStarted);
        info!("Round starting with {} players", self.roster.len());
        true
    }

    /// Despawns the bomb and returns to the lobby state where
    /// [`Session::start_round`] is legal again.
    pub fn end_round(&mut self) {
        if self.bomb.take().is_none() && !self.round_in_progress {
            return;
        }
        self.round_in_progress = false;
        info!(
            "Round over; start {}",
            if self.roster.can_start() {
                "available"
            } else {
                "needs more players"
            }
        );
    }

    /// One fixed-rate authoritative step: session clock, player physics
    /// (grounded answered by the physics provider), then the bomb.
    pub fn tick(&mut self, dt: f32) {
        self.elapsed += dt;
        self.tick_count += 1;

        let physics = &self.physics;
        for player in self.roster.iter_mut() {
            player.state.is_grounded = physics.is_grounded(&player.state);
            player.tick(dt);
        }

        let mut ended = false;
        if let Some(bomb) = self.bomb.as_mut() {
            bomb.tick(dt, &mut self.roster, self.elapsed, &mut self.events);
            ended = bomb.phase() == BombPhase::Ended;
        }
        if ended {
            self.end_round();
        }
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        self.events.drain()
    }

    /// Replica states for the periodic broadcast, in roster order.
    pub fn player_states(&self) -> Vec<PlayerState> {
        self.roster.iter().map(|p| p.state.clone()).collect()
    }

    /// Deterministic spawn choice: the time-seeded base index, offset by
    /// the player's roster position so a simultaneous teleport of the whole
    /// roster still spreads across the ring.
    fn spawn_point(&self, inbound: bool, offset: usize) -> Vec3 {
        let points = if inbound && self.round_in_progress {
            &self.config.inbound_spawn_points
        } else {
            &self.config.outbound_spawn_points
        };
        if points.is_empty() {
            return Vec3::ZERO;
        }
        let base = deterministic_pick(points.len(), self.elapsed).unwrap_or(0);
        points[(base + offset) % points.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::FlatWorld;

    const DT: f32 = 1.0 / 30.0;

    fn session_with(players: u64) -> Session {
        let mut session = Session::new(SessionConfig::default(), Box::new(FlatWorld::default()));
        for id in 1..=players {
            assert!(session.handle_join(id));
            session.assign_name(id, format!("player-{}", id));
        }
        session
    }

    fn start_and_load(session: &mut Session) {
        assert!(session.start_round());
        for id in session.roster.ids() {
            session.handle_loaded_ack(id);
        }
    }

    #[test]
    fn test_join_assigns_unique_players() {
        let mut session = session_with(2);
        assert_eq!(session.roster.len(), 2);
        assert!(!session.handle_join(1));
        assert_eq!(session.roster.len(), 2);
    }

    #[test]
    fn test_start_round_requires_min_players() {
        let mut session = session_with(1);
        assert!(!session.start_round());
        assert!(session.handle_join(2));
        session.assign_name(2, "player-2".into());
        assert!(session.start_round());
    }

    #[test]
    fn test_start_round_idempotent_guard() {
        let mut session = session_with(2);
        assert!(session.start_round());
        assert!(!session.start_round());
        assert!(session.round_in_progress());
    }

    #[test]
    fn test_round_starts_after_all_acks() {
        let mut session = session_with(4);
        assert!(session.start_round());
        assert_eq!(session.bomb().unwrap().phase(), BombPhase::Loading);

        let ids = session.roster.ids();
        for &id in &ids[..3] {
            session.handle_loaded_ack(id);
            assert_eq!(session.bomb().unwrap().phase(), BombPhase::Loading);
        }
        session.handle_loaded_ack(ids[3]);

        let bomb = session.bomb().unwrap();
        assert_eq!(bomb.phase(), BombPhase::Active);
        assert!(bomb.holder().is_some());
        assert!(!bomb.body.is_physics_driven());
    }

    #[test]
    fn test_duplicate_ack_does_not_activate_early() {
        let mut session = session_with(3);
        assert!(session.start_round());

        session.handle_loaded_ack(1);
        session.handle_loaded_ack(1);
        session.handle_loaded_ack(1);
        assert_eq!(session.bomb().unwrap().phase(), BombPhase::Loading);

        session.handle_loaded_ack(2);
        session.handle_loaded_ack(3);
        assert_eq!(session.bomb().unwrap().phase(), BombPhase::Active);
    }

    #[test]
    fn test_move_applies_only_for_owner() {
        let mut session = session_with(2);
        let input = MoveInput {
            source: 1,
            forward: true,
            ..Default::default()
        };

        // Connection 2 replaying connection 1's intent
        assert!(!session.handle_move(2, &input, DT));
        assert!(session.handle_move(1, &input, DT));
    }

    #[test]
    fn test_round_trip_back_to_lobby() {
        let mut session = session_with(2);
        start_and_load(&mut session);

        // Short-fuse rounds for the test
        let mut guard = 0;
        while session.round_in_progress() {
            session.tick(0.5);
            guard += 1;
            assert!(guard < 1000, "round never ended");
        }

        assert!(session.bomb().is_none());
        // Lobby again: a new round may start
        assert!(session.start_round());
    }

    #[test]
    fn test_swing_passes_bomb_to_raycast_hit() {
        let mut session = session_with(2);
        start_and_load(&mut session);
        // Let the pass cooldown elapse
        for _ in 0..20 {
            session.tick(DT);
        }

        let holder = session.bomb().unwrap().holder().unwrap();
        let victim = session.roster.ids().into_iter().find(|&id| id != holder).unwrap();

        // Stand the holder 1.5 units behind the victim, facing +z
        {
            let victim_pos = session.roster.find_player(victim).unwrap().state.position;
            let attacker = session.roster.find_player_mut(holder).unwrap();
            attacker.teleport(victim_pos.sub(&Vec3::new(0.0, 0.0, 1.5)));
            attacker.state.yaw = 0.0;
        }

        assert!(session.handle_swing(holder));
        assert_eq!(session.bomb().unwrap().holder(), Some(victim));

        let victim_player = session.roster.find_player(victim).unwrap();
        assert!(victim_player.is_force_sliding());
        assert!(victim_player.state.velocity.z > 0.0);
    }

    #[test]
    fn test_swing_misses_out_of_reach() {
        let mut session = session_with(2);
        start_and_load(&mut session);
        for _ in 0..20 {
            session.tick(DT);
        }

        let holder = session.bomb().unwrap().holder().unwrap();
        {
            let attacker = session.roster.find_player_mut(holder).unwrap();
            attacker.teleport(Vec3::new(100.0, 0.0, 100.0));
        }

        assert!(!session.handle_swing(holder));
        assert_eq!(session.bomb().unwrap().holder(), Some(holder));
    }

    #[test]
    fn test_disconnect_mid_round_reassigns_bomb() {
        let mut session = session_with(3);
        start_and_load(&mut session);

        let holder = session.bomb().unwrap().holder().unwrap();
        session.remove_player(holder);

        assert_eq!(session.roster.len(), 2);
        let bomb = session.bomb().unwrap();
        let new_holder = bomb.holder().unwrap();
        assert_ne!(new_holder, holder);
        assert!(session.roster.find_player(new_holder).is_some());
    }

    #[test]
    fn test_disconnect_below_two_ends_round() {
        let mut session = session_with(2);
        start_and_load(&mut session);

        let holder = session.bomb().unwrap().holder().unwrap();
        session.remove_player(holder);

        assert!(!session.round_in_progress());
        assert!(session.bomb().is_none());
        let survivor = session.roster.ids()[0];
        assert!(session.roster.find_player(survivor).unwrap().state.has_won);
    }

    #[test]
    fn test_round_start_spreads_spawns() {
        let mut session = session_with(4);
        assert!(session.start_round());

        let mut positions: Vec<Vec3> = session
            .roster
            .iter()
            .map(|p| p.state.position)
            .collect();
        positions.dedup_by(|a, b| a == b);
        assert_eq!(positions.len(), 4);
    }

    #[test]
    fn test_events_flow_through_drain() {
        let mut session = session_with(2);
        start_and_load(&mut session);

        let events = session.drain_events();
        assert!(events.contains(&GameEvent::RoundStarted));
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::BombActivated { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::PossessionChanged { .. })));
    }
}
