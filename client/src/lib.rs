//! # Party Client Library
//!
//! Client-side coordination of parties and matchmaking queues. The server is
//! the only authority; this library keeps a consistent local mirror of it and
//! lets the user act on that mirror without waiting for round trips.
//!
//! ## Architecture Overview
//!
//! ### Single Writer
//! All party, queue and invite state lives in one [`engine::PartyEngine`].
//! The connection task in [`network`] owns it and feeds it one input at a
//! time: a server packet, a user request or a timer tick. Nothing else can
//! mutate it, so there are no locks and no interleavings to reason about.
//!
//! ### Optimistic Echo
//! Faction, ready and kick commands are applied to a provisional overlay as
//! soon as they pass local validation. The next confirmed revision of the
//! party replaces the overlay wholesale; a rejection or timeout discards it
//! and triggers a snapshot resync.
//!
//! ### Revision Ordering
//! Every party event carries the full resulting party and a revision.
//! Applying only strictly newer revisions makes duplicated and reordered
//! delivery harmless.
//!
//! ## Module Organization
//!
//! - `party`: confirmed party plus provisional overlay
//! - `queue`: queue catalog, queued flags and eligibility
//! - `invite`: outstanding invites and their deadlines
//! - `engine`, `reconcile`, `dispatcher`: the state owner, event application
//!   and command submission
//! - `directory`: player names and invite candidates
//! - `network`: UDP connection task and the [`network::PartyClient`] handle
//! - `input`, `rendering`: the console front end used by the binary
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::config::ClientConfig;
//! use client::network::PartyClient;
//!
//! # async fn run() -> Result<(), client::error::ClientError> {
//! let config = ClientConfig::new("127.0.0.1:8080", "alice");
//! let (party, mut notifications) = PartyClient::connect(config).await?;
//!
//! party.set_ready(true).await?;
//! while let Some(notification) = notifications.recv().await {
//!     println!("{:?}", notification);
//! }
//! party.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod input;
pub mod invite;
pub mod network;
pub mod party;
pub mod queue;
pub mod reconcile;
pub mod rendering;

pub use config::{ClientConfig, EngineConfig};
pub use engine::{EngineView, Notification, PartyEngine};
pub use error::{ClientError, ValidationError};
pub use network::PartyClient;
