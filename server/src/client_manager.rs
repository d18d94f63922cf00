//! Connected player sessions for the party server
//!
//! This module handles the server-side bookkeeping of who is connected:
//! - Session lifecycle (connect, reconnect, disconnect, timeout)
//! - Stable player ids per name, so a player keeps their id across sessions
//! - Address tracking for routing events to players
//! - The player directory broadcast to clients

use log::info;
use shared::{PlayerId, PlayerInfo};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MAX_NAME_LEN: usize = 32;

/// Why a Connect was refused. The message is sent back as the reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectRefusal {
    #[error("Server full")]
    ServerFull,
    #[error("Protocol version mismatch (client {client}, server {server})")]
    VersionMismatch { client: u32, server: u32 },
    #[error("Invalid player name")]
    InvalidName,
}

/// One live session.
#[derive(Debug)]
pub struct Client {
    pub id: PlayerId,
    pub name: String,
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: PlayerId, name: String, addr: SocketAddr) -> Self {
        Self {
            id,
            name,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Outcome of a successful Connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// A player that was offline came online.
    New(PlayerId),
    /// Connect from an already connected player (retry or reconnect).
    Resumed(PlayerId),
}

impl Session {
    pub fn player_id(&self) -> PlayerId {
        match self {
            Session::New(id) | Session::Resumed(id) => *id,
        }
    }
}

pub struct ClientManager {
    /// Online players indexed by id
    clients: HashMap<PlayerId, Client>,
    /// Every name ever seen, lowercased, with its id
    known: HashMap<String, PlayerId>,
    names: HashMap<PlayerId, String>,
    next_player_id: PlayerId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            known: HashMap::new(),
            names: HashMap::new(),
            next_player_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Registers a session for `name` at `addr`. A name that is already
    /// online moves to the new address.
    pub fn connect(&mut self, addr: SocketAddr, name: &str) -> Result<Session, ConnectRefusal> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(ConnectRefusal::InvalidName);
        }

        let key = name.to_lowercase();
        if let Some(&id) = self.known.get(&key) {
            if let Some(client) = self.clients.get_mut(&id) {
                if client.addr != addr {
                    info!("Player {} moved from {} to {}", id, client.addr, addr);
                    client.addr = addr;
                }
                client.last_seen = Instant::now();
                return Ok(Session::Resumed(id));
            }
        }

        if self.clients.len() >= self.max_clients {
            return Err(ConnectRefusal::ServerFull);
        }

        let id = match self.known.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.next_player_id;
                self.next_player_id += 1;
                self.known.insert(key, id);
                self.names.insert(id, name.to_string());
                id
            }
        };

        info!("Player {} ({}) connected from {}", id, name, addr);
        self.clients
            .insert(id, Client::new(id, name.to_string(), addr));
        Ok(Session::New(id))
    }

    pub fn remove_client(&mut self, player_id: &PlayerId) -> bool {
        if let Some(client) = self.clients.remove(player_id) {
            info!("Player {} ({}) disconnected", client.id, client.name);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, player_id: PlayerId) -> Option<SocketAddr> {
        self.clients.get(&player_id).map(|c| c.addr)
    }

    pub fn is_online(&self, player_id: PlayerId) -> bool {
        self.clients.contains_key(&player_id)
    }

    /// Marks the client at `addr` as alive. Returns its id if known.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        let client = self.clients.values_mut().find(|c| c.addr == addr)?;
        client.last_seen = Instant::now();
        Some(client.id)
    }

    /// Removes clients silent for longer than the timeout and returns them.
    pub fn check_timeouts(&mut self) -> Vec<PlayerId> {
        let timeout = self.timeout;
        let timed_out: Vec<PlayerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for player_id in &timed_out {
            self.remove_client(player_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(PlayerId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Every known player with their online status, ordered by id.
    pub fn directory(&self) -> Vec<PlayerInfo> {
        let mut players: Vec<PlayerInfo> = self
            .names
            .iter()
            .map(|(id, name)| PlayerInfo {
                id: *id,
                name: name.clone(),
                online: self.clients.contains_key(id),
            })
            .collect();
        players.sort_by_key(|p| p.id);
        players
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
