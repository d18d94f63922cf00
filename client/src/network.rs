use crate::config::ClientConfig;
use crate::directory::{invite_candidates, PlayerRoster};
use crate::engine::{EngineView, Notification, PartyEngine};
use crate::error::{ClientError, TransportError, ValidationError};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    timestamp_ms, Command, CorrelationId, FactionSet, Packet, PartyId, PlayerId, PlayerInfo,
    QueueId, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, MissedTickBehavior};

const CONNECT_RETRY: Duration = Duration::from_millis(250);

enum Request {
    Submit {
        command: Command,
        reply: oneshot::Sender<Result<CorrelationId, ValidationError>>,
    },
    Candidates {
        query: String,
        reply: oneshot::Sender<Vec<PlayerInfo>>,
    },
    Players {
        reply: oneshot::Sender<PlayerRoster>,
    },
    Refresh,
    Logout {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running party connection. Cheap to query: reads come from the
/// last published [`EngineView`], writes go through the connection task.
pub struct PartyClient {
    player_id: PlayerId,
    requests: mpsc::UnboundedSender<Request>,
    view: watch::Receiver<EngineView>,
    task: JoinHandle<()>,
}

impl PartyClient {
    /// Binds a socket, completes the Connect handshake and starts the
    /// connection task. Notifications arrive on the returned receiver.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), ClientError> {
        let server_addr: SocketAddr = config.server_addr.parse()?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        info!("Connecting to {} as {}...", server_addr, config.player_name);
        let player_id = handshake(&socket, server_addr, &config).await?;
        info!("Connected! Player ID: {}", player_id);

        let engine = PartyEngine::new(player_id, config.engine);
        let (view_tx, view_rx) = watch::channel(engine.view(Instant::now()));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let connection = Connection {
            socket,
            server_addr,
            config,
            engine,
            roster: PlayerRoster::new(),
            connected: true,
            ping_ms: 0,
            last_heard: Instant::now(),
            notifications: notify_tx,
            view: view_tx,
        };
        let task = tokio::spawn(connection.run(request_rx));

        let client = PartyClient {
            player_id,
            requests: request_tx,
            view: view_rx,
            task,
        };
        Ok((client, notify_rx))
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Validates and sends a command. Returns its correlation id; the outcome
    /// arrives later as events, or as a rejection/failure notification.
    pub async fn submit(&self, command: Command) -> Result<CorrelationId, ClientError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Submit { command, reply })?;
        let result = response.await.map_err(|_| ClientError::Closed)?;
        Ok(result?)
    }

    pub async fn invite(&self, player_id: PlayerId) -> Result<CorrelationId, ClientError> {
        self.submit(Command::InvitePlayer { player_id }).await
    }

    pub async fn accept_invite(&self, party_id: PartyId) -> Result<CorrelationId, ClientError> {
        self.submit(Command::AcceptInvite { party_id }).await
    }

    pub async fn set_ready(&self, ready: bool) -> Result<CorrelationId, ClientError> {
        self.submit(Command::SetReady {
            player_id: self.player_id,
            ready,
        })
        .await
    }

    pub async fn set_factions(&self, factions: FactionSet) -> Result<CorrelationId, ClientError> {
        self.submit(Command::SetFactions {
            player_id: self.player_id,
            factions,
        })
        .await
    }

    pub async fn join_queue(&self, queue_id: QueueId) -> Result<CorrelationId, ClientError> {
        self.submit(Command::JoinQueue { queue_id }).await
    }

    /// Latest published state.
    pub fn snapshot(&self) -> EngineView {
        self.view.borrow().clone()
    }

    /// Receiver that always holds the latest state. Intermediate states are
    /// coalesced for slow readers.
    pub fn watch(&self) -> watch::Receiver<EngineView> {
        self.view.clone()
    }

    pub async fn invite_candidates(&self, query: &str) -> Result<Vec<PlayerInfo>, ClientError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Candidates {
            query: query.to_string(),
            reply,
        })?;
        response.await.map_err(|_| ClientError::Closed)
    }

    /// Copy of the current player directory.
    pub async fn players(&self) -> Result<PlayerRoster, ClientError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Players { reply })?;
        response.await.map_err(|_| ClientError::Closed)
    }

    /// Asks the server for a full snapshot.
    pub fn request_refresh(&self) -> Result<(), ClientError> {
        self.send(Request::Refresh)
    }

    /// Cancels outgoing invites, disconnects and waits for the connection
    /// task to finish.
    pub async fn logout(self) -> Result<(), ClientError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Logout { reply })?;
        let _ = response.await;
        if let Err(e) = self.task.await {
            error!("Connection task failed: {}", e);
        }
        Ok(())
    }

    fn send(&self, request: Request) -> Result<(), ClientError> {
        self.requests.send(request).map_err(|_| ClientError::Closed)
    }
}

async fn handshake(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    config: &ClientConfig,
) -> Result<PlayerId, ClientError> {
    let connect = serialize(&Packet::Connect {
        client_version: PROTOCOL_VERSION,
        player_name: config.player_name.clone(),
    })?;
    let deadline = tokio::time::Instant::now() + config.connect_timeout;
    let mut retry = interval(CONNECT_RETRY);
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];

    loop {
        tokio::select! {
            _ = retry.tick() => {
                socket.send_to(&connect, server_addr).await?;
            }
            result = socket.recv_from(&mut buffer) => {
                let (len, from) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Error receiving packet: {}", e);
                        continue;
                    }
                };
                if from != server_addr {
                    continue;
                }
                match deserialize::<Packet>(&buffer[..len]) {
                    Ok(Packet::Connected { player_id }) => return Ok(player_id),
                    Ok(Packet::Disconnected { reason }) => return Err(ClientError::Refused(reason)),
                    Ok(other) => debug!("Ignoring {:?} before handshake", other),
                    Err(e) => warn!("Malformed packet from server: {}", e),
                }
            }
            _ = sleep_until(deadline) => {
                return Err(TransportError::Timeout.into());
            }
        }
    }
}

/// The connection task. Owns the engine; everything that touches party
/// state runs here, one input at a time.
struct Connection {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: ClientConfig,
    engine: PartyEngine,
    roster: PlayerRoster,

    connected: bool,
    ping_ms: u64,
    last_heard: Instant,

    notifications: mpsc::UnboundedSender<Notification>,
    view: watch::Sender<EngineView>,
}

impl Connection {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        let mut tick_interval = interval(self.config.tick_interval);
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        // the server pushes a snapshot on connect, ask anyway in case it was lost
        self.engine.reconnected();
        self.flush().await;

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, from)) => {
                            if from != self.server_addr {
                                debug!("Ignoring packet from {}", from);
                                continue;
                            }
                            if !self.config.simulated_latency.is_zero() {
                                sleep(self.config.simulated_latency / 2).await;
                            }
                            match deserialize::<Packet>(&buffer[..len]) {
                                Ok(packet) => self.handle_packet(packet),
                                Err(e) => warn!("Malformed packet from server: {}", e),
                            }
                        }
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                }

                request = requests.recv() => {
                    match request {
                        Some(Request::Logout { reply }) => {
                            info!("Logging out");
                            self.engine.logout(Instant::now());
                            self.flush().await;
                            let _ = reply.send(());
                            break;
                        }
                        Some(request) => self.handle_request(request),
                        None => {
                            debug!("Client handle dropped, disconnecting");
                            self.engine.logout(Instant::now());
                            self.flush().await;
                            break;
                        }
                    }
                }

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    self.engine.tick(now);
                    self.check_liveness(now);
                }

                _ = heartbeat_interval.tick() => {
                    let packet = if self.connected {
                        Packet::Ping { timestamp: timestamp_ms() }
                    } else {
                        Packet::Connect {
                            client_version: PROTOCOL_VERSION,
                            player_name: self.config.player_name.clone(),
                        }
                    };
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending heartbeat: {}", e);
                    }
                }
            }

            self.flush().await;
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        let now = Instant::now();
        self.last_heard = now;

        match packet {
            Packet::Connected { player_id } => {
                if player_id != self.engine.local_player() {
                    warn!(
                        "Server assigned player {} after reconnect, expected {}",
                        player_id,
                        self.engine.local_player()
                    );
                }
                if !self.connected {
                    info!("Reconnected to {}", self.server_addr);
                    self.connected = true;
                    self.engine.reconnected();
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.mark_lost(now);
            }

            Packet::Pong { timestamp } => {
                self.ping_ms = timestamp_ms().saturating_sub(timestamp);
            }

            Packet::Ack { correlation_id } => self.engine.on_ack(correlation_id),

            Packet::Rejected {
                correlation_id,
                reason,
            } => self.engine.on_rejected(correlation_id, reason, now),

            Packet::Event(event) => self.engine.apply(event, now),

            Packet::Directory { players } => {
                debug!("Directory update with {} players", players.len());
                self.roster.update(players);
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    fn handle_request(&mut self, request: Request) {
        let now = Instant::now();
        match request {
            Request::Submit { command, reply } => {
                let result = self.engine.submit(command, now);
                if let Err(e) = &result {
                    debug!("Command refused locally: {}", e);
                }
                let _ = reply.send(result);
            }
            Request::Candidates { query, reply } => {
                let party = self.engine.party().party;
                let candidates =
                    invite_candidates(&self.roster, &party, self.engine.local_player(), &query);
                let _ = reply.send(candidates);
            }
            Request::Players { reply } => {
                let _ = reply.send(self.roster.clone());
            }
            Request::Refresh => self.engine.request_snapshot(),
            Request::Logout { .. } => {}
        }
    }

    fn check_liveness(&mut self, now: Instant) {
        if self.connected && now.duration_since(self.last_heard) > self.config.connection_timeout {
            warn!(
                "No packets from server for {:?}, connection lost",
                self.config.connection_timeout
            );
            self.mark_lost(now);
        }
    }

    fn mark_lost(&mut self, now: Instant) {
        if self.connected {
            self.connected = false;
            self.engine.connection_lost(now);
        }
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        if !self.config.simulated_latency.is_zero() {
            sleep(self.config.simulated_latency / 2).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends queued packets, publishes notifications and the new view.
    async fn flush(&mut self) {
        let effects = self.engine.take_effects();

        for packet in &effects.outgoing {
            if let Err(e) = self.send_packet(packet).await {
                error!("Error sending packet: {}", e);
            }
        }
        for notification in effects.notifications {
            // nobody listening is fine
            let _ = self.notifications.send(notification);
        }

        let mut view = self.engine.view(Instant::now());
        view.connected = self.connected;
        view.ping_ms = self.ping_ms;
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
