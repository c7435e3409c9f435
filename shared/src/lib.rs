//! Types shared between the authoritative server and game clients: wire
//! protocol, replication snapshots, player state and the movement
//! integration both sides must agree on.

pub mod math;
pub mod player;
pub mod protocol;
pub mod replication;

pub use math::{yaw_forward, yaw_right, Vec3};
pub use player::{apply_intent, step_physics, MoveInput, MovementTunables, PlayerState};
pub use protocol::Packet;
pub use replication::{EntitySnapshot, ReplicatedBody};

pub const PROTOCOL_VERSION: u32 = 1;

/// Height of the flat ground plane.
pub const GROUND_Y: f32 = 0.0;

/// Flat stamina cost charged on takeoff.
pub const JUMP_STAMINA_COST: f32 = 10.0;

pub const BOMB_DETONATION_SECS: f32 = 30.0;
pub const BOMB_PASS_COOLDOWN_SECS: f32 = 0.4;
pub const BOMB_GRACE_EXTENSION_SECS: f32 = 0.6;

/// Fraction of the detonation timer past which a pass counts as late and
/// the grace extension is subtracted from the elapsed time.
pub const BOMB_LATE_PASS_THRESHOLD: f32 = 0.86;

/// Where the bomb sits relative to its holder while carried.
pub const BOMB_ATTACH_OFFSET: Vec3 = Vec3::new(0.0, 1.2, 0.4);

/// Melee reach of a bomb swing.
pub const PASS_REACH: f32 = 2.0;
pub const PASS_PUSH_STRENGTH: f32 = 10.0;
pub const FORCED_SLIDE_SECS: f32 = 1.0;
