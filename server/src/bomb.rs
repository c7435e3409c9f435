//! The passable hazard entity and its detonation state machine.
//!
//! Spawned by the session orchestrator at round start, the bomb waits for
//! every client's load acknowledgment, then runs its countdown against the
//! current holder. Detonation eliminates the holder and either re-arms with
//! a shorter timer and a new holder, or ends the round.

use crate::events::{EventQueue, GameEvent};
use crate::player::passthrough_hook;
use crate::roster::Roster;
use log::{debug, info, warn};
use shared::{ReplicatedBody, Vec3, BOMB_ATTACH_OFFSET, BOMB_LATE_PASS_THRESHOLD};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BombPhase {
    /// Spawned, not yet waiting for clients.
    Idle,
    /// Waiting for all load acknowledgments.
    Loading,
    /// Countdown running against the current holder.
    Active,
    /// Mid-detonation; transient within a single mutation.
    Exploding,
    /// Round over. Terminal for this bomb entity.
    Ended,
}

pub struct Bomb {
    phase: BombPhase,
    pub body: ReplicatedBody,
    holder: Option<u64>,
    duration_base: f32,
    duration: f32,
    elapsed: f32,
    pass_cooldown: f32,
    pass_cooldown_elapsed: f32,
    grace_extension: f32,
    death_position: Vec3,
    colliders_enabled: bool,
    exploded_broadcast: bool,
    /// Identities that acknowledged load, snapshotted at activation. The
    /// denominator of the shrinking-timer ratio for the whole round.
    connected_roster: HashSet<u64>,
    /// Identities still in play, in roster insertion order.
    alive_roster: Vec<u64>,
}

impl Bomb {
    pub fn new(
        duration_base: f32,
        pass_cooldown: f32,
        grace_extension: f32,
        death_position: Vec3,
    ) -> Self {
        Bomb {
            phase: BombPhase::Idle,
            body: ReplicatedBody::default(),
            holder: None,
            duration_base,
            duration: duration_base,
            elapsed: 0.0,
            pass_cooldown,
            pass_cooldown_elapsed: 0.0,
            grace_extension,
            death_position,
            colliders_enabled: true,
            exploded_broadcast: false,
            connected_roster: HashSet::new(),
            alive_roster: Vec::new(),
        }
    }

    pub fn phase(&self) -> BombPhase {
        self.phase
    }

    pub fn holder(&self) -> Option<u64> {
        self.holder
    }

    pub fn detonation_duration(&self) -> f32 {
        self.duration
    }

    pub fn detonation_elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn alive_roster(&self) -> &[u64] {
        &self.alive_roster
    }

    pub fn connected_count(&self) -> usize {
        self.connected_roster.len()
    }

    pub fn colliders_enabled(&self) -> bool {
        self.colliders_enabled
    }

    /// Whether the pass cooldown has elapsed since the last pass/activation.
    pub fn can_be_passed(&self) -> bool {
        self.pass_cooldown_elapsed >= self.pass_cooldown
    }

    pub fn is_valid_pass_target(&self, id: u64) -> bool {
        self.alive_roster.contains(&id)
    }

    pub fn begin_loading(&mut self) {
        if self.phase == BombPhase::Idle {
            self.phase = BombPhase::Loading;
        }
    }

    /// Loading -> Active. Snapshots the roster, picks the initial holder
    /// deterministically and disables the bomb's own colliders so it cannot
    /// be struck independently while carried.
    pub fn on_all_players_loaded(
        &mut self,
        roster: &mut Roster,
        session_elapsed: f32,
        events: &mut EventQueue,
    ) {
        if self.phase != BombPhase::Loading {
            warn!("Bomb activation in phase {:?} ignored", self.phase);
            return;
        }

        self.alive_roster = roster.ids();
        self.connected_roster = self.alive_roster.iter().copied().collect();
        debug_assert!(
            !self.alive_roster.is_empty(),
            "activated with empty roster"
        );

        self.colliders_enabled = false;
        self.elapsed = 0.0;
        self.pass_cooldown_elapsed = 0.0;
        self.phase = BombPhase::Active;

        if let Some(initial) = Roster::select_deterministic(&self.alive_roster, session_elapsed) {
            self.pass_to(initial, roster, session_elapsed, events);
        }

        if let Some(holder) = self.holder {
            events.push(GameEvent::BombActivated {
                holder,
                duration: self.duration,
                elapsed: self.elapsed,
                grace_extension: self.grace_extension,
            });
        }
    }

    /// One authoritative simulation step while active: advances both timers,
    /// pins the bomb to the holder's attach point and republishes. Once the
    /// countdown fills, resets it and detonates.
    pub fn tick(
        &mut self,
        dt: f32,
        roster: &mut Roster,
        session_elapsed: f32,
        events: &mut EventQueue,
    ) {
        if self.phase != BombPhase::Active {
            return;
        }

        // A disconnect may have left the holder dangling; treat it as a
        // forced pass (or round end) rather than a fault.
        if let Some(holder) = self.holder {
            if roster.find_player(holder).is_none() {
                warn!("Bomb holder {} no longer connected", holder);
                self.holder = None;
                self.alive_roster.retain(|&id| id != holder);
                self.reassign_holder(roster, session_elapsed, events);
                if self.phase != BombPhase::Active {
                    return;
                }
            }
        }

        if self.elapsed >= self.duration {
            self.elapsed = 0.0;
            self.on_detonate(roster, session_elapsed, events);
            return;
        }

        self.elapsed = (self.elapsed + dt).min(self.duration);
        self.pass_cooldown_elapsed += dt;

        if let Some(holder) = self.holder {
            debug_assert!(self.alive_roster.contains(&holder));
            if let Some(player) = roster.find_player(holder) {
                self.body.position = player.state.position.add(&BOMB_ATTACH_OFFSET);
                self.body.rotation = Vec3::new(0.0, player.state.yaw, 0.0);
            }
        }

        events.push(GameEvent::BombTimer {
            elapsed: self.elapsed,
        });
        events.push(GameEvent::BombMoved {
            snapshot: self.body.publish_state(),
        });
    }

    /// Eliminates the current holder. With more than one player left the
    /// countdown re-arms at `base * (alive / connected) + 2.0` seconds and
    /// the bomb moves to a deterministically selected survivor; otherwise
    /// the round ends.
    fn on_detonate(&mut self, roster: &mut Roster, session_elapsed: f32, events: &mut EventQueue) {
        self.phase = BombPhase::Exploding;

        let holder = match self.holder.take() {
            Some(holder) => holder,
            None => {
                debug_assert!(false, "detonation without holder");
                self.reassign_holder(roster, session_elapsed, events);
                return;
            }
        };

        if let Some(player) = roster.find_player_mut(holder) {
            player.set_can_move(false);
            player.teleport(self.death_position);
            player.unhook_movement();
            player.set_bomb_held(false, events);
            player.set_alive(false, events);
            player.set_won(false, events);
        }
        self.alive_roster.retain(|&id| id != holder);

        if !self.exploded_broadcast {
            self.exploded_broadcast = true;
            events.push(GameEvent::BombExploded);
        }
        events.push(GameEvent::PlayerEliminated { id: holder });
        info!("Player {} eliminated by detonation", holder);

        // Survivors that dropped mid-round are no longer candidates
        self.alive_roster
            .retain(|&id| roster.find_player(id).is_some());

        if self.alive_roster.len() > 1 {
            let alive = self.alive_roster.len() as f32;
            let connected = self.connected_roster.len() as f32;
            self.duration = self.duration_base * (alive / connected) + 2.0;
            self.exploded_broadcast = false;
            self.phase = BombPhase::Active;
            self.reassign_holder(roster, session_elapsed, events);
        } else {
            self.on_round_end(roster, events);
        }
    }

    /// Hands the bomb to a deterministically selected alive player, or ends
    /// the round when at most one candidate remains.
    fn reassign_holder(
        &mut self,
        roster: &mut Roster,
        session_elapsed: f32,
        events: &mut EventQueue,
    ) {
        self.alive_roster
            .retain(|&id| roster.find_player(id).is_some());

        if self.alive_roster.len() <= 1 {
            self.on_round_end(roster, events);
            return;
        }

        if let Some(target) = Roster::select_deterministic(&self.alive_roster, session_elapsed) {
            self.pass_to(target, roster, session_elapsed, events);
        }
    }

    /// Requests a pass toward `target`. Rejected while the cooldown runs or
    /// when the target is not an alive roster member. Competing requests
    /// arriving within one tick are applied in arrival order: the last
    /// accepted call wins.
    pub fn try_pass(
        &mut self,
        target: u64,
        requesting: u64,
        roster: &mut Roster,
        session_elapsed: f32,
        events: &mut EventQueue,
    ) -> bool {
        if self.phase != BombPhase::Active {
            debug!("Pass from {} ignored: bomb not active", requesting);
            return false;
        }
        if !self.can_be_passed() {
            debug!("Pass from {} ignored: cooldown running", requesting);
            return false;
        }
        if !self.alive_roster.contains(&target) {
            warn!(
                "Pass from {} rejected: target {} not in play",
                requesting, target
            );
            return false;
        }

        // Passing with detonation imminent keeps some of the accumulated
        // time on the clock instead of handing the receiver a free reset.
        let percentage = self.elapsed / self.duration;
        if percentage > BOMB_LATE_PASS_THRESHOLD {
            self.elapsed = (self.elapsed - self.grace_extension).max(0.0);
            events.push(GameEvent::BombTimer {
                elapsed: self.elapsed,
            });
        }

        self.pass_cooldown_elapsed = 0.0;
        self.pass_to(target, roster, session_elapsed, events);
        true
    }

    /// Core handoff: detach the old holder (hook released, drag and slide
    /// state restored), attach the new one, republish. A target that
    /// resolved to nothing reselects instead of completing.
    fn pass_to(&mut self, target: u64, roster: &mut Roster, session_elapsed: f32, events: &mut EventQueue) {
        if roster.find_player(target).is_none() || !self.alive_roster.contains(&target) {
            warn!("Pass target {} unavailable, reselecting", target);
            self.alive_roster.retain(|&id| id != target);
            self.reassign_holder(roster, session_elapsed, events);
            return;
        }

        if let Some(old_id) = self.holder {
            if let Some(old) = roster.find_player_mut(old_id) {
                old.unhook_movement();
                old.clear_forced_slide();
                old.set_bomb_held(false, events);
            }
        }

        if let Some(new) = roster.find_player_mut(target) {
            new.hook_movement(passthrough_hook);
            new.set_bomb_held(true, events);
            self.body.position = new.state.position.add(&BOMB_ATTACH_OFFSET);
        }
        self.holder = Some(target);

        events.push(GameEvent::PossessionChanged { holder: target });
        events.push(GameEvent::BombMoved {
            snapshot: self.body.publish_state(),
        });
    }

    /// Removes a disconnected identity from both rosters and forces a pass
    /// or round end when the holder dropped.
    pub fn on_player_disconnected(
        &mut self,
        id: u64,
        roster: &mut Roster,
        session_elapsed: f32,
        events: &mut EventQueue,
    ) {
        self.alive_roster.retain(|&other| other != id);

        if self.phase != BombPhase::Active {
            return;
        }

        if self.holder == Some(id) {
            self.holder = None;
            self.reassign_holder(roster, session_elapsed, events);
        } else if self.alive_roster.len() <= 1 {
            self.on_round_end(roster, events);
        }
    }

    /// Ends the round: the sole survivor (if any) wins, everyone else
    /// loses, eliminated players are revived for the next round and the
    /// bomb returns to free physics mode.
    pub fn on_round_end(&mut self, roster: &mut Roster, events: &mut EventQueue) {
        if self.phase == BombPhase::Ended {
            return;
        }
        self.phase = BombPhase::Ended;
        self.colliders_enabled = true;
        self.body.set_physics_driven(true);
        events.push(GameEvent::BombPhysicsMode { enabled: true });

        let winner = if self.alive_roster.len() == 1 {
            Some(self.alive_roster[0])
        } else {
            None
        };

        if let Some(old_id) = self.holder.take() {
            if let Some(old) = roster.find_player_mut(old_id) {
                old.unhook_movement();
                old.clear_forced_slide();
                old.set_bomb_held(false, events);
            }
        }

        for player in roster.iter_mut() {
            player.set_won(Some(player.id()) == winner, events);
            player.set_alive(true, events);
            player.set_can_move(true);
        }

        info!("Game ended, winner: {:?}", winner);
        events.push(GameEvent::RoundEnded { winner });
    }
}
