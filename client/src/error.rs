//! Error types surfaced by the party client.

use shared::{PartyId, PlayerId, QueueId, Revision};
use thiserror::Error;

/// Local precondition failures. Reported synchronously from `submit`, the
/// command never reaches the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("only the party owner may do that")]
    NotOwner,
    #[error("player {0} already has a pending invite")]
    AlreadyInvited(PlayerId),
    #[error("not every party member is ready")]
    NotAllReady,
    #[error("at least one faction must be selected")]
    NoFactionSelected,
    #[error("members may only change their own settings")]
    NotSelf,
    #[error("player {0} is not in the party")]
    NotMember(PlayerId),
    #[error("player {0} is already in the party")]
    AlreadyMember(PlayerId),
    #[error("cannot target yourself")]
    CannotTargetSelf,
    #[error("no pending invite for that player or party")]
    NoSuchInvite,
    #[error("not in a party with other players")]
    NotInParty,
    #[error("unknown queue {0}")]
    UnknownQueue(QueueId),
    #[error("already queued for queue {0}")]
    AlreadyQueued(QueueId),
    #[error("not queued for queue {0}")]
    NotQueued(QueueId),
    #[error("party is not eligible for queue {0}")]
    QueueIneligible(QueueId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no acknowledgement before the deadline")]
    Timeout,
    #[error("connection to the server lost")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server refused the connection: {0}")]
    Refused(String),
    #[error("invalid server address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("party client has shut down")]
    Closed,
}

/// Why an incoming event was dropped. Never shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    OldRevision { received: Revision, current: Revision },
    AbandonedParty(PartyId),
    ForeignParty(PartyId),
    NotAMember(PartyId),
}
