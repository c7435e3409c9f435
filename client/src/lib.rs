//! # Game Client Library
//!
//! Client-side state management for the networked bomb-tag game: the join
//! handshake, the replica of the authoritative session, and the prediction/
//! reconciliation machinery that keeps locally applied movement consistent
//! with server truth.
//!
//! The client never decides game outcomes. It applies its own inputs
//! immediately for responsiveness ([`replica::Replica::predict`]), and every
//! authoritative broadcast either confirms the prediction or rolls it back
//! and replays the unacknowledged inputs.
//!
//! Rendering and real input capture are out of scope here; the
//! [`bot::WanderBot`] drives the headless binary for demos and soak tests.

pub mod bot;
pub mod network;
pub mod replica;
