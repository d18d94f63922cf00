//! Server network layer handling UDP communications and the party loop

use crate::client_manager::{ClientManager, ConnectRefusal, Session};
use crate::config::ServerConfig;
use crate::party::{Outbound, PartyRegistry};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{timestamp_ms, Packet, PlayerId, ServerEvent, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { player_id: PlayerId },
    Shutdown,
}

/// Messages sent from the party loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<PlayerId>,
    },
}

/// Main server coordinating networking and party state
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    registry: PartyRegistry,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            registry: PartyRegistry::new(config.queues.clone(), config.invite_ttl),
            config,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender for stopping [`Server::run`] from another task.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

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
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (player_id, addr) in client_addrs {
                            if Some(player_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to player {}: {}", player_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for player_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { player_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<PlayerId>) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn broadcast_directory(&self) {
        let players = self.clients.read().await.directory();
        self.broadcast_packet(Packet::Directory { players }, None);
    }

    /// Routes registry events to the addresses of their recipients.
    async fn dispatch(&self, outbound: Vec<Outbound>) {
        if outbound.is_empty() {
            return;
        }
        let clients = self.clients.read().await;
        for Outbound { to, event } in outbound {
            match clients.addr_of(to) {
                Some(addr) => {
                    debug!("{} -> player {}", event.name(), to);
                    self.send_packet(Packet::Event(event), addr);
                }
                None => debug!("Player {} offline, dropping {}", to, event.name()),
            }
        }
    }

    /// Takes a player out of every party structure after their session ended.
    async fn drop_player(&mut self, player_id: PlayerId) {
        let outbound = self.registry.disconnect(player_id);
        self.dispatch(outbound).await;
        self.broadcast_directory().await;
    }

    async fn handle_connect(&mut self, client_version: u32, player_name: String, addr: SocketAddr) {
        info!(
            "Player {} connecting from {} (version: {})",
            player_name, addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            let refusal = ConnectRefusal::VersionMismatch {
                client: client_version,
                server: PROTOCOL_VERSION,
            };
            self.send_packet(
                Packet::Disconnected {
                    reason: refusal.to_string(),
                },
                addr,
            );
            return;
        }

        let (previous, result) = {
            let mut clients = self.clients.write().await;
            let previous = clients.find_client_by_addr(addr);
            (previous, clients.connect(addr, &player_name))
        };

        let session = match result {
            Ok(session) => session,
            Err(refusal) => {
                warn!("Refused {} from {}: {}", player_name, addr, refusal);
                self.send_packet(
                    Packet::Disconnected {
                        reason: refusal.to_string(),
                    },
                    addr,
                );
                return;
            }
        };
        let player_id = session.player_id();

        // a different player was using this address before
        if let Some(previous) = previous.filter(|id| *id != player_id) {
            info!("Removing player {} replaced at {}", previous, addr);
            self.clients.write().await.remove_client(&previous);
            self.drop_player(previous).await;
        }

        self.send_packet(Packet::Connected { player_id }, addr);

        if let Session::New(_) = session {
            self.registry.connect(player_id);
            let snapshot = self.registry.snapshot(player_id, timestamp_ms());
            self.send_packet(Packet::Event(ServerEvent::Snapshot(snapshot)), addr);
            self.broadcast_directory().await;
        }
    }

    /// Processes incoming packets and updates party state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let sender = self.clients.write().await.touch(addr);

        match packet {
            Packet::Connect {
                client_version,
                player_name,
            } => {
                self.handle_connect(client_version, player_name, addr).await;
            }

            Packet::Disconnect => {
                if let Some(player_id) = sender {
                    self.clients.write().await.remove_client(&player_id);
                    self.drop_player(player_id).await;
                }
            }

            Packet::Ping { timestamp } => {
                if sender.is_some() {
                    self.send_packet(Packet::Pong { timestamp }, addr);
                }
            }

            Packet::Command {
                correlation_id,
                command,
            } => {
                let Some(player_id) = sender else {
                    debug!("Command from unknown address {}", addr);
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Not connected".to_string(),
                        },
                        addr,
                    );
                    return;
                };

                let name = command.name();
                match self.registry.handle(player_id, command, timestamp_ms()) {
                    Ok(outbound) => {
                        debug!("Player {} {} #{} accepted", player_id, name, correlation_id);
                        // events first so the ack never overtakes the state it confirms
                        self.dispatch(outbound).await;
                        self.send_packet(Packet::Ack { correlation_id }, addr);
                    }
                    Err(reason) => {
                        debug!(
                            "Player {} {} #{} rejected: {}",
                            player_id, name, correlation_id, reason
                        );
                        self.send_packet(
                            Packet::Rejected {
                                correlation_id,
                                reason,
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::RequestSnapshot => {
                if let Some(player_id) = sender {
                    let snapshot = self.registry.snapshot(player_id, timestamp_ms());
                    self.send_packet(Packet::Event(ServerEvent::Snapshot(snapshot)), addr);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.config.tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { player_id }) => {
                            info!("Player {} timed out", player_id);
                            self.drop_player(player_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            self.broadcast_packet(Packet::Disconnected {
                                reason: "Server shutting down".to_string(),
                            }, None);
                            break;
                        }
                    }
                },

                // Invite expiry and matchmaking
                _ = tick_interval.tick() => {
                    let outbound = self.registry.tick(timestamp_ms());
                    self.dispatch(outbound).await;

                    ticks += 1;
                    if ticks % 600 == 0 {
                        let online = self.clients.read().await.len();
                        if online > 0 {
                            debug!("Tick {}: {} players, {} parties",
                                   ticks, online, self.registry.party_count());
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Command, RejectReason};
    use tokio::time::timeout;

    async fn start_server() -> SocketAddr {
        let config = ServerConfig::new("127.0.0.1:0").with_max_clients(2);
        let mut server = Server::new(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });
        addr
    }

    async fn send(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) {
        socket
            .send_to(&serialize(packet).unwrap(), addr)
            .await
            .unwrap();
    }

    /// Next packet that is not a directory broadcast.
    async fn recv(socket: &UdpSocket) -> Packet {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
                .await
                .expect("timed out waiting for server")
                .unwrap();
            match deserialize::<Packet>(&buffer[..len]).unwrap() {
                Packet::Directory { .. } => continue,
                packet => return packet,
            }
        }
    }

    async fn login(name: &str, server: SocketAddr) -> (UdpSocket, PlayerId) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(
            &socket,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION,
                player_name: name.to_string(),
            },
            server,
        )
        .await;
        let player_id = match recv(&socket).await {
            Packet::Connected { player_id } => player_id,
            other => panic!("expected Connected, got {:?}", other),
        };
        match recv(&socket).await {
            Packet::Event(ServerEvent::Snapshot(snapshot)) => {
                assert!(snapshot.party.is_none());
                assert_eq!(snapshot.queues.len(), 3);
            }
            other => panic!("expected Snapshot, got {:?}", other),
        }
        (socket, player_id)
    }

    #[test]
    fn test_error_message_formatting() {
        let error = ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "address in use",
        ));
        assert_eq!(error.to_string(), "I/O error: address in use");
    }

    #[tokio::test]
    async fn test_connect_sends_id_and_snapshot() {
        let server = start_server().await;
        let (_alice, alice_id) = login("alice", server).await;
        let (_bob, bob_id) = login("bob", server).await;
        assert_ne!(alice_id, bob_id);
    }

    #[tokio::test]
    async fn test_version_mismatch_refused() {
        let server = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(
            &socket,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION + 1,
                player_name: "alice".to_string(),
            },
            server,
        )
        .await;
        match recv(&socket).await {
            Packet::Disconnected { reason } => assert!(reason.contains("version")),
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_full_refused() {
        let server = start_server().await;
        let _alice = login("alice", server).await;
        let _bob = login("bob", server).await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(
            &socket,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION,
                player_name: "carol".to_string(),
            },
            server,
        )
        .await;
        match recv(&socket).await {
            Packet::Disconnected { reason } => assert_eq!(reason, "Server full"),
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_events_precede_ack() {
        let server = start_server().await;
        let (alice, alice_id) = login("alice", server).await;

        send(
            &alice,
            &Packet::Command {
                correlation_id: 1,
                command: Command::SetReady {
                    player_id: alice_id,
                    ready: true,
                },
            },
            server,
        )
        .await;

        assert!(matches!(
            recv(&alice).await,
            Packet::Event(ServerEvent::PartyUpdated { .. })
        ));
        assert!(matches!(
            recv(&alice).await,
            Packet::Event(ServerEvent::ReadyChanged { .. })
        ));
        assert!(matches!(
            recv(&alice).await,
            Packet::Ack { correlation_id: 1 }
        ));
    }

    #[tokio::test]
    async fn test_invalid_command_rejected() {
        let server = start_server().await;
        let (alice, _) = login("alice", server).await;

        send(
            &alice,
            &Packet::Command {
                correlation_id: 7,
                command: Command::LeaveParty,
            },
            server,
        )
        .await;
        match recv(&alice).await {
            Packet::Rejected {
                correlation_id,
                reason,
            } => {
                assert_eq!(correlation_id, 7);
                assert_eq!(reason, RejectReason::NotInParty);
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_from_unknown_address() {
        let server = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(
            &socket,
            &Packet::Command {
                correlation_id: 1,
                command: Command::LeaveParty,
            },
            server,
        )
        .await;
        assert!(matches!(
            recv(&socket).await,
            Packet::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let server = start_server().await;
        let (alice, _) = login("alice", server).await;
        send(&alice, &Packet::Ping { timestamp: 42 }, server).await;
        assert!(matches!(
            recv(&alice).await,
            Packet::Pong { timestamp: 42 }
        ));
    }
}
