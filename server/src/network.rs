//! Server network layer handling UDP communications and game loop coordination

use crate::connection::ConnectionTable;
use crate::events::GameEvent;
use crate::identity::{IdentityError, IdentityProvider};
use crate::session::Session;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PlayerState, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to the main authoritative loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u64,
    },
    /// Fire-and-forget identity resolution rejoining the loop as a
    /// discrete event
    NameResolved {
        client_id: u64,
        result: Result<String, IdentityError>,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the authoritative loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u64>,
    },
}

/// Main server coordinating networking and the authoritative session
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    session: Session,
    identity: Arc<dyn IdentityProvider>,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        session: Session,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new(max_clients))),
            session,
            identity,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let connections_guard = connections.read().await;
                            connections_guard.addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections_guard = connections.write().await;
                    connections_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet: packet.clone(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn broadcast_packet(&self, packet: &Packet, exclude: Option<u64>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket {
            packet: packet.clone(),
            exclude,
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Kicks off fire-and-forget name resolution for a new connection. The
    /// result rejoins the authoritative loop as a ServerMessage.
    fn spawn_identity_resolution(&self, client_id: u64, token: String) {
        let provider = Arc::clone(&self.identity);
        let server_tx = self.server_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = provider.resolve(&token);
            if let Err(e) = server_tx.send(ServerMessage::NameResolved { client_id, result }) {
                error!("Failed to deliver identity result: {}", e);
            }
        });
    }

    /// Processes one incoming packet as a single serialized mutation
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                client_version,
                token,
            } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_packet(&response, addr).await;
                    return;
                }

                // Remove existing connection if present
                let existing_client_id = {
                    let connections = self.connections.read().await;
                    connections.find_by_addr(addr)
                };

                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    let mut connections = self.connections.write().await;
                    connections.remove(existing_id);
                    self.session.remove_player(existing_id);
                }

                // Try to accept the new connection
                let client_id = {
                    let mut connections = self.connections.write().await;
                    connections.add(addr)
                };

                if let Some(client_id) = client_id {
                    self.session.handle_join(client_id);
                    let response = Packet::Joined { client_id };
                    self.send_packet(&response, addr).await;
                    self.spawn_identity_resolution(client_id, token);
                } else {
                    let response = Packet::Disconnected {
                        reason: "Server full".to_string(),
                    };
                    self.send_packet(&response, addr).await;
                }
            }

            Packet::LoadedAck => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.session.handle_loaded_ack(client_id);
                }
            }

            Packet::Move { input } => {
                if let Some(client_id) = self.client_for(addr).await {
                    let sequence = input.sequence;
                    let dt = self.tick_duration.as_secs_f32();
                    if self.session.handle_move(client_id, &input, dt) {
                        let mut connections = self.connections.write().await;
                        connections.mark_move_processed(client_id, sequence);
                    }
                }
            }

            Packet::Rotate { yaw, pitch, source } => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.session.handle_rotate(client_id, yaw, pitch, source);
                }
            }

            Packet::SwingBomb => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.session.handle_swing(client_id);
                }
            }

            Packet::PassBomb { target } => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.session.handle_pass(target, client_id);
                }
            }

            Packet::StartRound => {
                if let Some(client_id) = self.client_for(addr).await {
                    let is_host = {
                        let connections = self.connections.read().await;
                        connections.is_host(client_id)
                    };
                    if is_host {
                        self.session.start_round();
                    } else {
                        warn!("Non-host connection {} tried to start a round", client_id);
                    }
                }
            }

            Packet::Heartbeat { .. } => {
                if let Some(client_id) = self.client_for(addr).await {
                    let mut connections = self.connections.write().await;
                    connections.refresh(client_id);
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let connections = self.connections.read().await;
                    connections.find_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    let mut connections = self.connections.write().await;
                    connections.remove(client_id);
                    drop(connections);
                    self.session.remove_player(client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Resolves the sender and refreshes its liveness in one step.
    async fn client_for(&self, addr: SocketAddr) -> Option<u64> {
        let mut connections = self.connections.write().await;
        let client_id = connections.find_by_addr(addr)?;
        connections.refresh(client_id);
        Some(client_id)
    }

    /// Applies one identity resolution result. Failures disconnect only the
    /// affected connection.
    async fn handle_name_resolved(&mut self, client_id: u64, result: Result<String, IdentityError>) {
        match result {
            Ok(name) => {
                info!("Resolved name for {}: {}", client_id, name);
                self.session.assign_name(client_id, name);
            }
            Err(e) => {
                warn!("Identity resolution failed for {}: {}", client_id, e);
                let addr = {
                    let connections = self.connections.read().await;
                    connections.addr_of(client_id)
                };
                if let Some(addr) = addr {
                    let response = Packet::Disconnected {
                        reason: "Identity resolution failed".to_string(),
                    };
                    self.send_packet(&response, addr).await;
                }
                let mut connections = self.connections.write().await;
                connections.remove(client_id);
                drop(connections);
                self.session.remove_player(client_id);
            }
        }
    }

    /// Translates a drained simulation event into a broadcast packet, when
    /// one is warranted. Flag transitions ride the periodic state broadcast.
    fn event_packet(event: &GameEvent) -> Option<Packet> {
        match event {
            GameEvent::NameResolved { id, name } => Some(Packet::NameResolved {
                client_id: *id,
                name: name.clone(),
            }),
            GameEvent::ForcedSlide { id, duration } => Some(Packet::ForcedSlide {
                client_id: *id,
                duration: *duration,
            }),
            GameEvent::PlayerEliminated { id } => {
                Some(Packet::PlayerEliminated { client_id: *id })
            }
            GameEvent::PossessionChanged { holder } => {
                Some(Packet::PossessionChanged { holder: *holder })
            }
            GameEvent::BombActivated {
                holder,
                duration,
                elapsed,
                grace_extension,
            } => Some(Packet::BombActivated {
                holder: *holder,
                duration: *duration,
                elapsed: *elapsed,
                grace_extension: *grace_extension,
            }),
            GameEvent::BombTimer { elapsed } => Some(Packet::BombTimer { elapsed: *elapsed }),
            GameEvent::BombExploded => Some(Packet::BombExploded),
            GameEvent::BombPhysicsMode { enabled } => {
                Some(Packet::SetPhysicsDriven { enabled: *enabled })
            }
            GameEvent::BombMoved { snapshot } => Some(Packet::BombState {
                snapshot: *snapshot,
            }),
            GameEvent::RoundStarted => Some(Packet::RoundStarted),
            GameEvent::RoundEnded { winner } => Some(Packet::RoundEnded { winner: *winner }),
            GameEvent::PlayerJoined { .. }
            | GameEvent::PlayerLeft { .. }
            | GameEvent::AliveChanged { .. }
            | GameEvent::BombHeldChanged { .. }
            | GameEvent::ResultChanged { .. } => None,
        }
    }

    /// Broadcasts drained events and the periodic state snapshot
    async fn broadcast_tick_output(&mut self) {
        for event in self.session.drain_events() {
            if let Some(packet) = Self::event_packet(&event) {
                self.broadcast_packet(&packet, None).await;
            }
        }

        let client_count = {
            let connections = self.connections.read().await;
            connections.len()
        };
        if client_count == 0 {
            return;
        }

        let players: Vec<PlayerState> = self.session.player_states();
        let last_processed_input = {
            let connections = self.connections.read().await;
            connections.last_processed_moves()
        };

        // Take timestamp as close to transmission as possible
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis();
        let timestamp_safe = (timestamp.min(u64::MAX as u128)) as u64;

        let packet = Packet::GameState {
            tick: self.session.tick_count(),
            timestamp: timestamp_safe,
            last_processed_input,
            players,
        };

        self.broadcast_packet(&packet, None).await;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.session.remove_player(client_id);
                        },
                        Some(ServerMessage::NameResolved { client_id, result }) => {
                            self.handle_name_resolved(client_id, result).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Fixed-rate authoritative tick
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.session.tick(dt);
                    self.broadcast_tick_output().await;

                    if self.session.tick_count() % 60 == 0 {
                        let client_count = {
                            let connections = self.connections.read().await;
                            connections.len()
                        };
                        if client_count > 0 {
                            debug!("Tick {}: {} clients, {:.1}Hz",
                                   self.session.tick_count(), client_count, 1.0 / dt);
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
