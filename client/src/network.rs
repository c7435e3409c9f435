//! Client network loop: join handshake, intent sending and replica updates.

use crate::bot::WanderBot;
use crate::replica::Replica;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};

pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    token: String,
    client_id: Option<u64>,
    connected: bool,
    shutdown: bool,

    pub replica: Replica,
    bot: WanderBot,

    ping_ms: u64,
    fake_ping_ms: u64,
    run_for: Option<Duration>,
    /// When set, request a round start this long after connecting. Only
    /// honored by the server for the host connection.
    start_after: Option<Duration>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        token: &str,
        fake_ping_ms: u64,
        run_for: Option<Duration>,
        start_after: Option<Duration>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            token: token.to_string(),
            client_id: None,
            connected: false,
            shutdown: false,
            replica: Replica::new(),
            bot: WanderBot::new(),
            ping_ms: 0,
            fake_ping_ms,
            run_for,
            start_after,
        })
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Join {
            client_version: PROTOCOL_VERSION,
            token: self.token.clone(),
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Joined { client_id } => {
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(client_id);
                self.connected = true;
                self.replica.set_local_id(client_id);
            }

            Packet::NameResolved { client_id, name } => {
                debug!("Player {} is named {}", client_id, name);
                self.replica.on_name_resolved(client_id, name);
            }

            Packet::RoundStarted => {
                info!("Round starting, acknowledging load");
                self.replica.on_round_started();
                if let Err(e) = self.send_packet(&Packet::LoadedAck).await {
                    error!("Failed to send load ack: {}", e);
                }
            }

            Packet::BombActivated {
                holder,
                duration,
                elapsed,
                ..
            } => {
                info!("Bomb activated on player {} ({}s fuse)", holder, duration);
                self.replica.on_bomb_activated(holder, duration, elapsed);
            }

            Packet::BombTimer { elapsed } => {
                self.replica.on_bomb_timer(elapsed);
            }

            Packet::BombExploded => {
                if self.replica.on_bomb_exploded() {
                    info!("Bomb exploded!");
                }
            }

            Packet::PossessionChanged { holder } => {
                debug!("Bomb passed to player {}", holder);
                self.replica.on_possession_changed(holder);
            }

            Packet::PlayerEliminated { client_id } => {
                info!("Player {} was eliminated", client_id);
            }

            Packet::SetPhysicsDriven { enabled } => {
                self.replica.on_bomb_physics_mode(enabled);
            }

            Packet::BombState { snapshot } => {
                self.replica.on_bomb_state(&snapshot);
            }

            Packet::ForcedSlide { client_id, duration } => {
                debug!("Player {} force-slid for {}s", client_id, duration);
            }

            Packet::GameState {
                timestamp,
                last_processed_input,
                players,
                ..
            } => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_millis() as u64;
                if timestamp > 0 {
                    self.ping_ms = now.saturating_sub(timestamp);
                }

                self.replica
                    .apply_game_state(players, &last_processed_input);
            }

            Packet::RoundEnded { winner } => {
                match winner {
                    Some(id) if Some(id) == self.client_id => info!("Round over: we won!"),
                    Some(id) => info!("Round over: player {} won", id),
                    None => info!("Round over: no winner"),
                }
                self.replica.on_round_ended(winner);
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.client_id = None;
                self.shutdown = true;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    /// Sends one predicted move intent when we are in a running round.
    async fn send_movement(&mut self, dt: f32) {
        let client_id = match (self.connected, self.client_id) {
            (true, Some(id)) => id,
            _ => return,
        };

        let alive = self
            .replica
            .players
            .get(&client_id)
            .map(|p| p.is_alive)
            .unwrap_or(false);
        if !self.replica.round_active || !alive {
            return;
        }

        let input = self.bot.next_input(client_id);
        self.replica.predict(&input);
        self.replica.step(dt);

        if let Err(e) = self.send_packet(&Packet::Move { input }).await {
            error!("Failed to send move: {}", e);
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Receiver task feeding decoded packets into the main loop
        let (packet_tx, mut packet_rx) = mpsc::unbounded_channel::<Packet>();
        {
            let socket = Arc::clone(&self.socket);
            tokio::spawn(async move {
                let mut buffer = [0u8; 4096];
                loop {
                    match socket.recv_from(&mut buffer).await {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                if packet_tx.send(packet).is_err() {
                                    break;
                                }
                            } else {
                                warn!("Failed to deserialize server packet");
                            }
                        }
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                            sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            });
        }

        self.connect().await?;

        let send_dt = Duration::from_millis(33);
        let mut send_interval = interval(send_dt);
        let mut heartbeat_interval = interval(Duration::from_secs(1));
        let deadline = self.run_for.map(|d| Instant::now() + d);
        let mut start_at = self.start_after.map(|d| Instant::now() + d);

        loop {
            if self.shutdown {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("Session time up, disconnecting");
                    self.send_packet(&Packet::Disconnect).await.ok();
                    break;
                }
            }

            tokio::select! {
                packet = packet_rx.recv() => {
                    match packet {
                        Some(packet) => self.handle_packet(packet).await,
                        None => break,
                    }
                },

                _ = send_interval.tick() => {
                    if let Some(at) = start_at {
                        if self.connected && Instant::now() >= at {
                            info!("Requesting round start");
                            if let Err(e) = self.send_packet(&Packet::StartRound).await {
                                error!("Failed to request round start: {}", e);
                            }
                            start_at = None;
                        }
                    }
                    self.send_movement(send_dt.as_secs_f32()).await;
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        let timestamp = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or(Duration::from_secs(0))
                            .as_millis() as u64;
                        if let Err(e) = self.send_packet(&Packet::Heartbeat { timestamp }).await {
                            error!("Failed to send heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        Ok(())
    }

    pub fn ping_ms(&self) -> u64 {
        self.ping_ms
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
