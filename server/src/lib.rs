//! # Party Server Library
//!
//! The authoritative side of the party and matchmaking protocol. It owns every
//! party, invite and queue entry, validates client commands against them and
//! pushes the resulting state to the players concerned.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! Clients only ever hold a mirror. Each accepted command advances the
//! affected party's revision by one, and every party event carries the
//! complete resulting party, so a client that keeps the newest revision it has
//! seen is always consistent no matter how packets were duplicated or
//! reordered.
//!
//! ### Client Management
//! Handles the lifecycle of player sessions:
//! - Connection establishment with stable per-name player ids
//! - Liveness tracking and timeout cleanup
//! - The player directory used for invite lookups
//!
//! ### Matchmaking
//! Once per tick pending invites past their deadline expire and parties
//! waiting in the same queue are paired in arrival order.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All party state lives in [`party::PartyRegistry`], owned by the main loop
//! in [`network::Server::run`]. Network receive, send and timeout checks run
//! as separate tasks that talk to the loop through channels.
//!
//! ### Events Before Acknowledgement
//! A command's resulting events are queued before its `Ack`, so a client
//! never sees a command confirmed ahead of the state it produced.
//!
//! ## Module Organization
//!
//! - `client_manager`: sessions, ids, timeouts and the directory
//! - `party`: parties, invites, queues and matching
//! - `network`: the UDP server and its main loop
//! - `config`: server settings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server::network::ServerError> {
//!     let mut server = Server::new(ServerConfig::new("127.0.0.1:8080")).await?;
//!     server.run().await
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod network;
pub mod party;
