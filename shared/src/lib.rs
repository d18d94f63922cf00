//! Wire protocol and party rules shared by the client engine and the server.
//!
//! Both sides run the same mutation code on [`Party`]: the server to produce
//! authoritative revisions, the client to render optimistic echoes that the
//! next confirmed revision overwrites.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PACKET_SIZE: usize = 8192;

/// Party id shown for a player the server has not put in a party yet.
pub const UNASSIGNED_PARTY: PartyId = 0;

pub type PlayerId = u32;
pub type PartyId = u32;
pub type QueueId = u32;
pub type MatchId = u32;
pub type CorrelationId = u32;
pub type Revision = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Faction {
    Aeon,
    Cybran,
    Uef,
    Seraphim,
}

impl Faction {
    pub const ALL: [Faction; 4] = [
        Faction::Aeon,
        Faction::Cybran,
        Faction::Uef,
        Faction::Seraphim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Faction::Aeon => "aeon",
            Faction::Cybran => "cybran",
            Faction::Uef => "uef",
            Faction::Seraphim => "seraphim",
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Faction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aeon" | "a" => Ok(Faction::Aeon),
            "cybran" | "c" => Ok(Faction::Cybran),
            "uef" | "u" => Ok(Faction::Uef),
            "seraphim" | "s" => Ok(Faction::Seraphim),
            other => Err(format!("unknown faction '{}'", other)),
        }
    }
}

pub type FactionSet = BTreeSet<Faction>;

pub fn all_factions() -> FactionSet {
    Faction::ALL.iter().copied().collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMember {
    pub player_id: PlayerId,
    pub factions: FactionSet,
    pub ready: bool,
}

impl PartyMember {
    /// New members start with every faction selected and not ready.
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            factions: all_factions(),
            ready: false,
        }
    }
}

/// Broken party invariant, reported by [`Party::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("party {0} has no members")]
    Empty(PartyId),
    #[error("owner {owner} of party {party} is not a member")]
    OwnerNotMember { party: PartyId, owner: PlayerId },
    #[error("player {player} appears twice in party {party}")]
    DuplicateMember { party: PartyId, player: PlayerId },
    #[error("player {player} in party {party} has no faction selected")]
    NoFaction { party: PartyId, player: PlayerId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub owner_id: PlayerId,
    /// Ordered by join sequence; the first entry after the owner inherits ownership.
    pub members: Vec<PartyMember>,
    pub revision: Revision,
}

impl Party {
    pub fn new(id: PartyId, owner_id: PlayerId, revision: Revision) -> Self {
        Self {
            id,
            owner_id,
            members: vec![PartyMember::new(owner_id)],
            revision,
        }
    }

    /// The party a client shows while the server holds the player partyless.
    pub fn solo(player_id: PlayerId) -> Self {
        Self::new(UNASSIGNED_PARTY, player_id, 0)
    }

    pub fn is_assigned(&self) -> bool {
        self.id != UNASSIGNED_PARTY
    }

    pub fn member(&self, player_id: PlayerId) -> Option<&PartyMember> {
        self.members.iter().find(|m| m.player_id == player_id)
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.member(player_id).is_some()
    }

    pub fn is_owner(&self, player_id: PlayerId) -> bool {
        self.owner_id == player_id
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn all_ready(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.ready)
    }

    pub fn member_ids(&self) -> Vec<PlayerId> {
        self.members.iter().map(|m| m.player_id).collect()
    }

    /// Appends a member. Returns false if the player is already in the party.
    pub fn add_member(&mut self, member: PartyMember) -> bool {
        if self.contains(member.player_id) {
            return false;
        }
        self.members.push(member);
        self.reset_ready();
        true
    }

    /// Removes a member, handing ownership to the next-joined member when the
    /// owner leaves. Returns false if the player was not a member.
    pub fn remove_member(&mut self, player_id: PlayerId) -> bool {
        let Some(index) = self.members.iter().position(|m| m.player_id == player_id) else {
            return false;
        };
        self.members.remove(index);
        if self.owner_id == player_id {
            if let Some(next) = self.members.first() {
                self.owner_id = next.player_id;
            }
        }
        self.reset_ready();
        true
    }

    /// Replaces a member's faction selection. An empty set is refused so the
    /// "at least one faction" invariant can never be broken through here.
    pub fn set_factions(&mut self, player_id: PlayerId, factions: &FactionSet) -> bool {
        if factions.is_empty() {
            return false;
        }
        let Some(member) = self.members.iter_mut().find(|m| m.player_id == player_id) else {
            return false;
        };
        if member.factions == *factions {
            return false;
        }
        member.factions = factions.clone();
        self.reset_ready();
        true
    }

    pub fn set_ready(&mut self, player_id: PlayerId, ready: bool) -> bool {
        match self.members.iter_mut().find(|m| m.player_id == player_id) {
            Some(member) if member.ready != ready => {
                member.ready = ready;
                true
            }
            _ => false,
        }
    }

    fn reset_ready(&mut self) {
        for member in &mut self.members {
            member.ready = false;
        }
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.members.is_empty() {
            return Err(InvariantViolation::Empty(self.id));
        }
        if !self.contains(self.owner_id) {
            return Err(InvariantViolation::OwnerNotMember {
                party: self.id,
                owner: self.owner_id,
            });
        }
        let mut seen = BTreeSet::new();
        for member in &self.members {
            if !seen.insert(member.player_id) {
                return Err(InvariantViolation::DuplicateMember {
                    party: self.id,
                    player: member.player_id,
                });
            }
            if member.factions.is_empty() {
                return Err(InvariantViolation::NoFaction {
                    party: self.id,
                    player: member.player_id,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub id: QueueId,
    pub name: String,
    pub team_size: u8,
}

impl QueueDefinition {
    pub fn new(id: QueueId, name: impl Into<String>, team_size: u8) -> Self {
        Self {
            id,
            name: name.into(),
            team_size,
        }
    }

    /// Whether a party of `party_size` members fits into one team.
    pub fn admits(&self, party_size: usize) -> bool {
        (1..=self.team_size as usize).contains(&party_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InviteState {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub from_player_id: PlayerId,
    pub to_player_id: PlayerId,
    pub party_id: PartyId,
    /// Server wall clock, milliseconds since the epoch.
    pub issued_at: u64,
    pub expires_at: u64,
    pub state: InviteState,
}

impl Invite {
    pub fn is_pending(&self) -> bool {
        self.state == InviteState::Pending
    }

    /// Lifetime as issued. Only the difference of the two server timestamps
    /// is used so client/server clock skew does not matter.
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(self.issued_at))
    }

    pub fn resolved(&self, state: InviteState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub online: bool,
}

/// User-initiated party and queue actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    InvitePlayer { player_id: PlayerId },
    CancelInvite { player_id: PlayerId },
    AcceptInvite { party_id: PartyId },
    DeclineInvite { party_id: PartyId },
    KickMember { player_id: PlayerId },
    LeaveParty,
    SetFactions { player_id: PlayerId, factions: FactionSet },
    SetReady { player_id: PlayerId, ready: bool },
    JoinQueue { queue_id: QueueId },
    LeaveQueue { queue_id: QueueId },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::InvitePlayer { .. } => "InvitePlayer",
            Command::CancelInvite { .. } => "CancelInvite",
            Command::AcceptInvite { .. } => "AcceptInvite",
            Command::DeclineInvite { .. } => "DeclineInvite",
            Command::KickMember { .. } => "KickMember",
            Command::LeaveParty => "LeaveParty",
            Command::SetFactions { .. } => "SetFactions",
            Command::SetReady { .. } => "SetReady",
            Command::JoinQueue { .. } => "JoinQueue",
            Command::LeaveQueue { .. } => "LeaveQueue",
        }
    }
}

/// Why the server refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum RejectReason {
    #[error("only the party owner may do that")]
    NotOwner,
    #[error("player is not in a party")]
    NotInParty,
    #[error("player is not a member of this party")]
    NotMember,
    #[error("members may only change their own settings")]
    NotSelf,
    #[error("player is already a member")]
    AlreadyMember,
    #[error("player already has a pending invite")]
    AlreadyInvited,
    #[error("no pending invite")]
    NoSuchInvite,
    #[error("player is offline")]
    PlayerOffline,
    #[error("invalid target")]
    InvalidTarget,
    #[error("at least one faction must be selected")]
    NoFactionSelected,
    #[error("not every member is ready")]
    NotAllReady,
    #[error("party is already queued")]
    AlreadyQueued,
    #[error("party is not queued")]
    NotQueued,
    #[error("unknown queue")]
    UnknownQueue,
    #[error("party is not eligible for this queue")]
    QueueIneligible,
}

/// Full authoritative state for one player, sent in answer to `RequestSnapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub party: Option<Party>,
    pub queues: Vec<QueueDefinition>,
    pub queued: Vec<QueueId>,
    pub queue_revision: Revision,
    pub invites: Vec<Invite>,
    pub server_time: u64,
}

/// Server-pushed state changes. Party-mutating events carry the whole
/// resulting party so applying the newest revision is always sufficient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    PartyUpdated {
        party: Party,
    },
    PartyDisbanded {
        party_id: PartyId,
        revision: Revision,
    },
    MemberJoined {
        party: Party,
        player_id: PlayerId,
    },
    MemberLeft {
        party: Party,
        player_id: PlayerId,
        kicked: bool,
    },
    FactionChanged {
        party: Party,
        player_id: PlayerId,
    },
    ReadyChanged {
        party: Party,
        player_id: PlayerId,
    },
    QueueListUpdated {
        queues: Vec<QueueDefinition>,
    },
    InviteReceived {
        invite: Invite,
    },
    InviteResolved {
        invite: Invite,
    },
    QueueEntered {
        party_id: PartyId,
        queue_id: QueueId,
        revision: Revision,
    },
    QueueLeft {
        party_id: PartyId,
        queue_id: QueueId,
        revision: Revision,
    },
    MatchFound {
        party_id: PartyId,
        queue_id: QueueId,
        match_id: MatchId,
    },
    Snapshot(Snapshot),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PartyUpdated { .. } => "PartyUpdated",
            ServerEvent::PartyDisbanded { .. } => "PartyDisbanded",
            ServerEvent::MemberJoined { .. } => "MemberJoined",
            ServerEvent::MemberLeft { .. } => "MemberLeft",
            ServerEvent::FactionChanged { .. } => "FactionChanged",
            ServerEvent::ReadyChanged { .. } => "ReadyChanged",
            ServerEvent::QueueListUpdated { .. } => "QueueListUpdated",
            ServerEvent::InviteReceived { .. } => "InviteReceived",
            ServerEvent::InviteResolved { .. } => "InviteResolved",
            ServerEvent::QueueEntered { .. } => "QueueEntered",
            ServerEvent::QueueLeft { .. } => "QueueLeft",
            ServerEvent::MatchFound { .. } => "MatchFound",
            ServerEvent::Snapshot(_) => "Snapshot",
        }
    }

    /// Party the event is tagged with, if any.
    pub fn party_id(&self) -> Option<PartyId> {
        match self {
            ServerEvent::PartyUpdated { party }
            | ServerEvent::MemberJoined { party, .. }
            | ServerEvent::MemberLeft { party, .. }
            | ServerEvent::FactionChanged { party, .. }
            | ServerEvent::ReadyChanged { party, .. } => Some(party.id),
            ServerEvent::PartyDisbanded { party_id, .. }
            | ServerEvent::QueueEntered { party_id, .. }
            | ServerEvent::QueueLeft { party_id, .. }
            | ServerEvent::MatchFound { party_id, .. } => Some(*party_id),
            ServerEvent::InviteReceived { invite } | ServerEvent::InviteResolved { invite } => {
                Some(invite.party_id)
            }
            ServerEvent::QueueListUpdated { .. } | ServerEvent::Snapshot(_) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        player_name: String,
    },
    Disconnect,
    Ping {
        timestamp: u64,
    },
    Command {
        correlation_id: CorrelationId,
        command: Command,
    },
    RequestSnapshot,

    Connected {
        player_id: PlayerId,
    },
    Disconnected {
        reason: String,
    },
    Pong {
        timestamp: u64,
    },
    Ack {
        correlation_id: CorrelationId,
    },
    Rejected {
        correlation_id: CorrelationId,
        reason: RejectReason,
    },
    Event(ServerEvent),
    Directory {
        players: Vec<PlayerInfo>,
    },
}

/// Wall clock in milliseconds since the epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{deserialize, serialize};

    fn party_of(ids: &[PlayerId]) -> Party {
        let mut party = Party::new(7, ids[0], 1);
        for id in &ids[1..] {
            party.add_member(PartyMember::new(*id));
        }
        party
    }

    #[test]
    fn test_solo_party() {
        let party = Party::solo(3);
        assert_eq!(party.id, UNASSIGNED_PARTY);
        assert!(!party.is_assigned());
        assert_eq!(party.owner_id, 3);
        assert_eq!(party.member_ids(), vec![3]);
        assert_eq!(party.revision, 0);
        assert!(party.check_invariants().is_ok());
    }

    #[test]
    fn test_new_member_defaults() {
        let member = PartyMember::new(9);
        assert_eq!(member.factions.len(), 4);
        assert!(!member.ready);
    }

    #[test]
    fn test_add_member_resets_ready_and_rejects_duplicates() {
        let mut party = Party::new(1, 1, 1);
        party.set_ready(1, true);
        assert!(party.add_member(PartyMember::new(2)));
        assert!(!party.member(1).unwrap().ready);
        assert!(!party.add_member(PartyMember::new(2)));
        assert_eq!(party.len(), 2);
    }

    #[test]
    fn test_owner_leaving_transfers_to_next_joined() {
        let mut party = party_of(&[1, 2, 3]);
        assert!(party.remove_member(1));
        assert_eq!(party.owner_id, 2);
        assert_eq!(party.member_ids(), vec![2, 3]);
        assert!(party.check_invariants().is_ok());
    }

    #[test]
    fn test_remove_unknown_member() {
        let mut party = party_of(&[1, 2]);
        assert!(!party.remove_member(5));
        assert_eq!(party.len(), 2);
    }

    #[test]
    fn test_set_factions_refuses_empty_set() {
        let mut party = party_of(&[1, 2]);
        assert!(!party.set_factions(2, &FactionSet::new()));
        assert_eq!(party.member(2).unwrap().factions, all_factions());
    }

    #[test]
    fn test_set_factions_resets_ready() {
        let mut party = party_of(&[1, 2]);
        party.set_ready(1, true);
        party.set_ready(2, true);
        let only_uef: FactionSet = [Faction::Uef].into_iter().collect();
        assert!(party.set_factions(2, &only_uef));
        assert!(!party.all_ready());
        assert!(!party.set_factions(2, &only_uef));
    }

    #[test]
    fn test_set_ready_reports_changes_only() {
        let mut party = party_of(&[1]);
        assert!(party.set_ready(1, true));
        assert!(!party.set_ready(1, true));
        assert!(party.all_ready());
        assert!(!party.set_ready(4, true));
    }

    #[test]
    fn test_invariant_violations() {
        let mut party = party_of(&[1, 2]);
        party.owner_id = 9;
        assert_eq!(
            party.check_invariants(),
            Err(InvariantViolation::OwnerNotMember { party: 7, owner: 9 })
        );

        let mut party = party_of(&[1, 2]);
        party.members.push(PartyMember::new(2));
        assert_eq!(
            party.check_invariants(),
            Err(InvariantViolation::DuplicateMember { party: 7, player: 2 })
        );

        let mut party = party_of(&[1]);
        party.members[0].factions.clear();
        assert!(matches!(
            party.check_invariants(),
            Err(InvariantViolation::NoFaction { .. })
        ));

        let mut party = party_of(&[1]);
        party.members.clear();
        assert_eq!(party.check_invariants(), Err(InvariantViolation::Empty(7)));
    }

    #[test]
    fn test_queue_admits_team_size() {
        let queue = QueueDefinition::new(2, "2v2", 2);
        assert!(!queue.admits(0));
        assert!(queue.admits(1));
        assert!(queue.admits(2));
        assert!(!queue.admits(3));
    }

    #[test]
    fn test_invite_lifetime_uses_server_difference() {
        let invite = Invite {
            from_player_id: 1,
            to_player_id: 2,
            party_id: 7,
            issued_at: 10_000,
            expires_at: 70_000,
            state: InviteState::Pending,
        };
        assert_eq!(invite.lifetime(), Duration::from_secs(60));
        assert!(invite.is_pending());
        assert_eq!(invite.resolved(InviteState::Declined).state, InviteState::Declined);
    }

    #[test]
    fn test_faction_parsing() {
        assert_eq!("Aeon".parse::<Faction>(), Ok(Faction::Aeon));
        assert_eq!("s".parse::<Faction>(), Ok(Faction::Seraphim));
        assert!("orcs".parse::<Faction>().is_err());
    }

    #[test]
    fn test_event_party_tag() {
        let event = ServerEvent::QueueEntered {
            party_id: 4,
            queue_id: 1,
            revision: 10,
        };
        assert_eq!(event.party_id(), Some(4));
        assert_eq!(
            ServerEvent::QueueListUpdated { queues: vec![] }.party_id(),
            None
        );
    }

    #[test]
    fn test_packet_serialization_command() {
        let packet = Packet::Command {
            correlation_id: 12,
            command: Command::SetFactions {
                player_id: 3,
                factions: [Faction::Cybran, Faction::Aeon].into_iter().collect(),
            },
        };
        let serialized = serialize(&packet).unwrap();
        let deserialized: Packet = deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Command {
                correlation_id,
                command: Command::SetFactions { player_id, factions },
            } => {
                assert_eq!(correlation_id, 12);
                assert_eq!(player_id, 3);
                assert_eq!(factions.len(), 2);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_malformed_packet_rejected() {
        let data = serialize(&Packet::RequestSnapshot).unwrap();
        let mut corrupted = data.clone();
        corrupted[0] = 0xFF;
        assert!(deserialize::<Packet>(&corrupted).is_err());
        assert!(deserialize::<Packet>(&[]).is_err());
    }
}
