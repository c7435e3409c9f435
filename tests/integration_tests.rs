//! Integration tests for networked multiplayer components
//!
//! These tests validate cross-component interactions and real network behavior.

use bincode::{deserialize, serialize};
use shared::{MoveInput, Packet, PlayerState, ReplicatedBody, Vec3, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::UdpSocket;
use std::thread;
use std::time::Duration;
use tokio::time::sleep;

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests packet serialization round-trip for network protocol validation
    #[tokio::test]
    async fn packet_serialization_roundtrip() {
        let test_packets = vec![
            Packet::Join {
                client_version: PROTOCOL_VERSION,
                token: "alice".to_string(),
            },
            Packet::LoadedAck,
            Packet::Move {
                input: MoveInput {
                    sequence: 42,
                    timestamp: 123456789,
                    source: 3,
                    forward: true,
                    sprint: true,
                    ..Default::default()
                },
            },
            Packet::PassBomb { target: 2 },
            Packet::Joined { client_id: 42 },
            Packet::BombActivated {
                holder: 1,
                duration: 30.0,
                elapsed: 0.0,
                grace_extension: 0.6,
            },
            Packet::RoundEnded { winner: Some(7) },
            Packet::Disconnected {
                reason: "Test".to_string(),
            },
        ];

        for packet in test_packets {
            let serialized = serialize(&packet).unwrap();
            let deserialized: Packet = deserialize(&serialized).unwrap();

            // Verify packet type matches (simplified check)
            match (&packet, &deserialized) {
                (Packet::Join { .. }, Packet::Join { .. }) => {}
                (Packet::LoadedAck, Packet::LoadedAck) => {}
                (Packet::Move { .. }, Packet::Move { .. }) => {}
                (Packet::PassBomb { .. }, Packet::PassBomb { .. }) => {}
                (Packet::Joined { .. }, Packet::Joined { .. }) => {}
                (Packet::BombActivated { .. }, Packet::BombActivated { .. }) => {}
                (Packet::RoundEnded { .. }, Packet::RoundEnded { .. }) => {}
                (Packet::Disconnected { .. }, Packet::Disconnected { .. }) => {}
                _ => panic!("Packet type mismatch after serialization"),
            }
        }
    }

    /// Tests real UDP socket communication
    #[tokio::test]
    async fn udp_socket_communication() {
        let server_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind server socket");
        let server_addr = server_socket.local_addr().unwrap();

        // Echo server
        let server_socket_clone = server_socket.try_clone().unwrap();
        thread::spawn(move || {
            let mut buf = [0; 1024];
            if let Ok((size, client_addr)) = server_socket_clone.recv_from(&mut buf) {
                let _ = server_socket_clone.send_to(&buf[..size], client_addr);
            }
        });

        sleep(Duration::from_millis(10)).await;

        let client_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind client socket");
        client_socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        let test_packet = Packet::Join {
            client_version: PROTOCOL_VERSION,
            token: "echo".to_string(),
        };
        let serialized = serialize(&test_packet).unwrap();

        client_socket.send_to(&serialized, server_addr).unwrap();

        let mut buf = [0; 1024];
        let (size, _) = client_socket.recv_from(&mut buf).unwrap();
        let received_packet: Packet = deserialize(&buf[..size]).unwrap();

        match received_packet {
            Packet::Join { client_version, .. } => assert_eq!(client_version, PROTOCOL_VERSION),
            _ => panic!("Wrong packet type received"),
        }
    }

    /// A state broadcast survives serialization with the full player list
    #[test]
    fn game_state_broadcast_roundtrip() {
        let mut last_processed_input = HashMap::new();
        last_processed_input.insert(1u64, 99u32);

        let packet = Packet::GameState {
            tick: 1000,
            timestamp: 42,
            last_processed_input,
            players: vec![
                PlayerState::new(1, Vec3::new(1.0, 0.0, 2.0)),
                PlayerState::new(2, Vec3::ZERO),
            ],
        };

        let serialized = serialize(&packet).unwrap();
        let deserialized: Packet = deserialize(&serialized).unwrap();

        match deserialized {
            Packet::GameState {
                tick,
                players,
                last_processed_input,
                ..
            } => {
                assert_eq!(tick, 1000);
                assert_eq!(players.len(), 2);
                assert_eq!(last_processed_input.get(&1), Some(&99));
            }
            _ => panic!("Wrong packet type after roundtrip"),
        }
    }
}

/// REPLICATION PRIMITIVE TESTS
mod replication_tests {
    use super::*;

    /// Publish followed by apply on a non-physics-driven object leaves the
    /// position exactly equal.
    #[test]
    fn static_mode_snapshot_is_idempotent() {
        let mut authority = ReplicatedBody::new(Vec3::new(3.25, 1.0, -7.5));
        authority.set_physics_driven(false);
        authority.rotation = Vec3::new(0.0, 1.2, 0.0);

        let snapshot = authority.publish_state();

        let mut replica = ReplicatedBody::default();
        replica.set_physics_driven(false);
        replica.apply_state(&snapshot);

        assert_eq!(replica.position, authority.position);
        assert_eq!(replica.rotation, authority.rotation);

        // Re-applying the same snapshot changes nothing
        replica.apply_state(&snapshot);
        assert_eq!(replica.position, authority.position);
    }

    /// The wire snapshot carries a server player's transform into a client
    /// replica unchanged.
    #[test]
    fn player_snapshot_crosses_the_wire() {
        let mut state = PlayerState::new(5, Vec3::new(2.0, 0.0, 4.0));
        state.yaw = 0.7;
        state.velocity = Vec3::new(1.0, 0.0, -1.0);

        let serialized = serialize(&state.snapshot()).unwrap();
        let snapshot = deserialize(&serialized).unwrap();

        let mut replica = PlayerState::new(5, Vec3::ZERO);
        replica.apply_snapshot(&snapshot);

        assert_eq!(replica.position, state.position);
        assert_eq!(replica.velocity, state.velocity);
        assert!((replica.yaw - state.yaw).abs() < 0.0001);
    }
}

/// CLIENT/SERVER STATE FLOW TESTS
mod state_flow_tests {
    use super::*;
    use client::replica::Replica;
    use server::physics::FlatWorld;
    use server::session::{Session, SessionConfig};

    fn session_with(players: u64) -> Session {
        let mut session = Session::new(SessionConfig::default(), Box::new(FlatWorld::default()));
        for id in 1..=players {
            assert!(session.handle_join(id));
            session.assign_name(id, format!("player-{}", id));
        }
        session
    }

    /// Server broadcast state applied to a client replica reproduces the
    /// roster.
    #[test]
    fn server_states_feed_client_replica() {
        let mut session = session_with(3);
        session.tick(1.0 / 30.0);

        let mut replica = Replica::new();
        replica.set_local_id(2);
        replica.apply_game_state(session.player_states(), &HashMap::new());

        assert_eq!(replica.players.len(), 3);
        assert!(replica.predicted().is_some());
        assert_eq!(replica.predicted().unwrap().id, 2);
    }

    /// The full possession flow reaches the replica through drained events.
    #[test]
    fn possession_events_reach_replica() {
        let mut session = session_with(2);
        assert!(session.start_round());
        for id in session.roster.ids() {
            session.handle_loaded_ack(id);
        }

        let mut replica = Replica::new();
        replica.set_local_id(1);
        replica.apply_game_state(session.player_states(), &HashMap::new());

        for event in session.drain_events() {
            match event {
                server::events::GameEvent::RoundStarted => replica.on_round_started(),
                server::events::GameEvent::BombActivated {
                    holder,
                    duration,
                    elapsed,
                    ..
                } => replica.on_bomb_activated(holder, duration, elapsed),
                server::events::GameEvent::PossessionChanged { holder } => {
                    replica.on_possession_changed(holder)
                }
                server::events::GameEvent::BombPhysicsMode { enabled } => {
                    replica.on_bomb_physics_mode(enabled)
                }
                _ => {}
            }
        }

        assert!(replica.round_active);
        assert!(replica.bomb_activated);
        assert_eq!(
            replica.bomb_holder,
            session.bomb().unwrap().holder()
        );
        assert!(!replica.bomb.is_physics_driven());
    }
}
