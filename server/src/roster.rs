//! Canonical player list and join protocol.
//!
//! The insertion-ordered list is the single source of truth; the id index
//! is rebuilt from it on every mutation and never diverges. The roster also
//! owns the load-acknowledgment gate that lets a round start exactly once,
//! and the deterministic time-seeded selection shared by holder and spawn
//! choice.

use crate::player::PlayerSession;
use log::{info, warn};
use std::collections::{HashMap, HashSet};

/// Outcome of one load acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Counted, still waiting for others.
    Recorded,
    /// Same connection acked before; no state change.
    Duplicate,
    /// Sender is not in the roster; ignored.
    Unknown,
    /// This ack completed the set. Returned exactly once per round.
    AllLoaded,
}

pub struct Roster {
    players: Vec<PlayerSession>,
    index: HashMap<u64, usize>,
    min_players: usize,
    loaded: HashSet<u64>,
    expected_players: usize,
    start_triggered: bool,
}

impl Roster {
    pub fn new(min_players: usize) -> Self {
        Roster {
            players: Vec::new(),
            index: HashMap::new(),
            min_players,
            loaded: HashSet::new(),
            expected_players: 0,
            // Disarmed until a round start arms the gate
            start_triggered: true,
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .players
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id(), i))
            .collect();
    }

    /// Adds a player entity. Rejected if the connection identity is already
    /// present; identities must stay unique across all live entities.
    pub fn add_player(&mut self, player: PlayerSession) -> bool {
        if self.index.contains_key(&player.id()) {
            warn!("Player {} already in roster", player.id());
            return false;
        }
        info!("Player {} added to roster", player.id());
        self.players.push(player);
        self.rebuild_index();
        true
    }

    /// Removes a player entity, returning it for final inspection. Callers
    /// must invoke this synchronously on disconnect, before the underlying
    /// connection is dropped.
    pub fn remove_player(&mut self, id: u64) -> Option<PlayerSession> {
        let position = self.index.get(&id).copied()?;
        let mut player = self.players.remove(position);
        player.mark_disconnected();
        self.rebuild_index();
        info!("Player {} removed from roster", id);
        Some(player)
    }

    pub fn find_player(&self, id: u64) -> Option<&PlayerSession> {
        self.index.get(&id).map(|&i| &self.players[i])
    }

    pub fn find_player_mut(&mut self, id: u64) -> Option<&mut PlayerSession> {
        let position = self.index.get(&id).copied()?;
        Some(&mut self.players[position])
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Connection identities in insertion order.
    pub fn ids(&self) -> Vec<u64> {
        self.players.iter().map(|p| p.id()).collect()
    }

    pub fn alive_ids(&self) -> Vec<u64> {
        self.players
            .iter()
            .filter(|p| p.state.is_alive)
            .map(|p| p.id())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.players.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.players.iter_mut()
    }

    /// Whether enough players are connected for a round to start.
    pub fn can_start(&self) -> bool {
        self.players.len() >= self.min_players
    }

    /// Re-arms the load gate for a new round expecting `expected` acks.
    pub fn arm_load_gate(&mut self, expected: usize) {
        self.loaded.clear();
        self.expected_players = expected;
        self.start_triggered = false;
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded
            .iter()
            .filter(|id| self.index.contains_key(id))
            .count()
    }

    /// Records one client's load acknowledgment. Duplicate acks from the
    /// same connection are rejected without any state change. When the
    /// count of distinct acknowledged and still-connected identities
    /// reaches the expected player count, returns [`AckOutcome::AllLoaded`]
    /// exactly once.
    pub fn record_loaded_ack(&mut self, id: u64) -> AckOutcome {
        if !self.index.contains_key(&id) {
            warn!("Load ack from unknown connection {}", id);
            return AckOutcome::Unknown;
        }
        if !self.loaded.insert(id) {
            warn!("Player {} tried sending load request twice", id);
            return AckOutcome::Duplicate;
        }

        if !self.start_triggered && self.loaded_count() >= self.expected_players {
            self.start_triggered = true;
            info!("All clients loaded, game starting");
            return AckOutcome::AllLoaded;
        }
        AckOutcome::Recorded
    }

    /// Picks one identity from an ordered pool using the shared
    /// deterministic selection.
    pub fn select_deterministic(pool: &[u64], elapsed_secs: f32) -> Option<u64> {
        deterministic_pick(pool.len(), elapsed_secs).map(|i| pool[i])
    }
}

/// Deterministic, time-seeded pseudo-random index used for holder and spawn
/// selection. The elapsed session time is scaled up by 12 while under 12
/// seconds, divided by 6.969 and rounded to the nearest integer; the
/// candidate sequence is then walked cyclically, one step per unit, and the
/// candidate reached last is returned. Outcomes are reproducible from the
/// session clock alone.
pub fn deterministic_pick(len: usize, elapsed_secs: f32) -> Option<usize> {
    if len == 0 {
        return None;
    }

    let mut t = elapsed_secs;
    if t < 12.0 {
        t *= 12.0;
    }
    let calc = (t / 6.969).round() as i64;
    if calc <= 0 {
        return Some(0);
    }

    let mut picked = 0;
    let mut i: i64 = 0;
    'walk: while i < calc {
        for slot in 0..len {
            if i + 1 >= calc {
                picked = slot;
                break 'walk;
            }
            i += 1;
        }
    }
    Some(picked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use crate::player::PlayerPhase;
    use shared::{MovementTunables, Vec3};

    fn player(id: u64) -> PlayerSession {
        let mut p = PlayerSession::new(id, Vec3::ZERO, MovementTunables::default());
        let mut events = EventQueue::new();
        p.activate(format!("player-{}", id), &mut events);
        p
    }

    fn roster_with(ids: &[u64]) -> Roster {
        let mut roster = Roster::new(2);
        for &id in ids {
            assert!(roster.add_player(player(id)));
        }
        roster
    }

    #[test]
    fn test_add_remove_and_lookup() {
        let mut roster = roster_with(&[1, 2, 3]);
        assert_eq!(roster.len(), 3);
        assert!(roster.find_player(2).is_some());

        let removed = roster.remove_player(2).unwrap();
        assert_eq!(removed.phase(), PlayerPhase::Disconnected);
        assert_eq!(roster.len(), 2);
        assert!(roster.find_player(2).is_none());
        assert_eq!(roster.ids(), vec![1, 3]);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut roster = roster_with(&[1]);
        assert!(!roster.add_player(player(1)));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_can_start_gating() {
        let mut roster = roster_with(&[1]);
        assert!(!roster.can_start());
        roster.add_player(player(2));
        assert!(roster.can_start());
        roster.remove_player(1);
        assert!(!roster.can_start());
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let mut roster = roster_with(&[1, 2, 3]);
        roster.arm_load_gate(3);

        assert_eq!(roster.record_loaded_ack(1), AckOutcome::Recorded);
        let count_after_one = roster.loaded_count();

        for _ in 0..5 {
            assert_eq!(roster.record_loaded_ack(1), AckOutcome::Duplicate);
        }
        assert_eq!(roster.loaded_count(), count_after_one);
    }

    #[test]
    fn test_all_loaded_triggers_exactly_once() {
        let mut roster = roster_with(&[1, 2]);
        roster.arm_load_gate(2);

        assert_eq!(roster.record_loaded_ack(1), AckOutcome::Recorded);
        assert_eq!(roster.record_loaded_ack(2), AckOutcome::AllLoaded);
        // A straggler ack after the trigger must not re-fire it
        roster.add_player(player(3));
        assert_eq!(roster.record_loaded_ack(3), AckOutcome::Recorded);
    }

    #[test]
    fn test_ack_from_unknown_connection_ignored() {
        let mut roster = roster_with(&[1, 2]);
        roster.arm_load_gate(2);
        assert_eq!(roster.record_loaded_ack(99), AckOutcome::Unknown);
        assert_eq!(roster.loaded_count(), 0);
    }

    #[test]
    fn test_disconnected_acks_do_not_count() {
        let mut roster = roster_with(&[1, 2, 3]);
        roster.arm_load_gate(3);

        assert_eq!(roster.record_loaded_ack(1), AckOutcome::Recorded);
        assert_eq!(roster.record_loaded_ack(2), AckOutcome::Recorded);
        roster.remove_player(1);
        // 2 and 3 acked-and-connected of 3 expected: still waiting
        assert_eq!(roster.record_loaded_ack(3), AckOutcome::Recorded);
    }

    #[test]
    fn test_deterministic_pick_scale_up_branch() {
        // t < 12 is scaled by 12: 6.969 * 12 / 6.969 rounds to 12 units,
        // which walks to index (12 - 1) % 3
        assert_eq!(deterministic_pick(3, 6.969), Some(2));
    }

    #[test]
    fn test_deterministic_pick_no_scale_branch() {
        // 12.0 / 6.969 = 1.722 rounds to 2 units -> index 1
        assert_eq!(deterministic_pick(3, 12.0), Some(1));
        // 20.9 / 6.969 = 2.999 rounds to 3 units -> index 2
        assert_eq!(deterministic_pick(4, 20.9), Some(2));
    }

    #[test]
    fn test_deterministic_pick_zero_time_falls_back_to_first() {
        assert_eq!(deterministic_pick(3, 0.0), Some(0));
    }

    #[test]
    fn test_deterministic_pick_single_candidate() {
        assert_eq!(deterministic_pick(1, 500.0), Some(0));
        assert_eq!(deterministic_pick(0, 500.0), None);
    }

    #[test]
    fn test_deterministic_pick_matches_cyclic_closed_form() {
        for len in 1..6usize {
            for t in [0.5f32, 3.0, 11.9, 12.0, 50.0, 123.4] {
                let mut scaled = t;
                if scaled < 12.0 {
                    scaled *= 12.0;
                }
                let calc = (scaled / 6.969).round() as i64;
                let expected = if calc <= 0 {
                    0
                } else {
                    ((calc - 1) % len as i64) as usize
                };
                assert_eq!(deterministic_pick(len, t), Some(expected));
            }
        }
    }

    #[test]
    fn test_select_deterministic_maps_to_pool() {
        let pool = vec![10u64, 20, 30];
        assert_eq!(Roster::select_deterministic(&pool, 12.0), Some(20));
        assert_eq!(Roster::select_deterministic(&[], 12.0), None);
    }
}
