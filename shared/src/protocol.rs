//! Wire protocol between clients and the authoritative server.
//!
//! One packet enum covers both directions; every packet travels
//! bincode-encoded over the per-connection reliable-ordered channel.

use crate::player::{MoveInput, PlayerState};
use crate::replication::EntitySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server
    Join {
        client_version: u32,
        /// Opaque authentication token, resolved to a display name by the
        /// server's identity provider.
        token: String,
    },
    /// Sent once after scene/asset load. Duplicates are rejected.
    LoadedAck,
    Move {
        input: MoveInput,
    },
    Rotate {
        yaw: f32,
        pitch: f32,
        source: u64,
    },
    /// Melee swing; the server raycasts from the sender to find a target.
    SwingBomb,
    /// Direct pass request toward a specific player.
    PassBomb {
        target: u64,
    },
    StartRound,
    Heartbeat {
        timestamp: u64,
    },
    Disconnect,

    // Server -> client
    Joined {
        client_id: u64,
    },
    Disconnected {
        reason: String,
    },
    NameResolved {
        client_id: u64,
        name: String,
    },
    RoundStarted,
    BombActivated {
        holder: u64,
        duration: f32,
        elapsed: f32,
        grace_extension: f32,
    },
    BombTimer {
        elapsed: f32,
    },
    BombExploded,
    PossessionChanged {
        holder: u64,
    },
    PlayerEliminated {
        client_id: u64,
    },
    SetPhysicsDriven {
        enabled: bool,
    },
    BombState {
        snapshot: EntitySnapshot,
    },
    ForcedSlide {
        client_id: u64,
        duration: f32,
    },
    GameState {
        tick: u32,
        timestamp: u64,
        last_processed_input: HashMap<u64, u32>,
        players: Vec<PlayerState>,
    },
    RoundEnded {
        winner: Option<u64>,
    },
}
