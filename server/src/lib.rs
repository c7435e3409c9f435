//! # Game Server Library
//!
//! Authoritative server for the networked bomb-tag game. This process owns
//! the canonical game state: the player roster, every player's transform and
//! flags, and the bomb's countdown. Clients send requests; the server
//! validates, mutates and broadcasts. Nothing a client claims about its own
//! state is ever trusted directly.
//!
//! ## Architecture
//!
//! All state mutation happens on one event-driven loop ([`network::Server`]),
//! which multiplexes incoming packets, timeout notifications and identity
//! resolution results with a fixed-rate simulation tick. Each request is
//! applied as a single serialized mutation; no two authoritative mutations
//! interleave. Ordering is guaranteed per connection but not across
//! connections, so competing same-tick requests resolve by last call wins.
//!
//! ## Module Organization
//!
//! - [`session`]: the orchestrator owning roster, bomb, clock and events;
//!   the only component allowed to start and end rounds
//! - [`roster`]: canonical player list, join/load-ack protocol and the
//!   deterministic time-seeded selection
//! - [`player`]: per-connection player entity with movement authority checks
//! - [`bomb`]: the possession object's countdown/elimination state machine
//! - [`connection`]: transport-side table mapping addresses to identities
//! - [`network`]: UDP plumbing and the main loop
//! - [`identity`] / [`physics`]: seams for the external login backend and
//!   collision queries
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::identity::TokenIdentity;
//! use server::network::Server;
//! use server::physics::FlatWorld;
//! use server::session::{Session, SessionConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(SessionConfig::default(), Box::new(FlatWorld::default()));
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(33), // 30Hz simulation tick
//!         16,
//!         session,
//!         Arc::new(TokenIdentity),
//!     )
//!     .await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bomb;
pub mod connection;
pub mod events;
pub mod identity;
pub mod network;
pub mod physics;
pub mod player;
pub mod roster;
pub mod session;
