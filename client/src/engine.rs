//! The single-writer state owner. [`PartyEngine`] is plain synchronous state:
//! the actor in `network` is the only thing that ever holds it, so every
//! mutation, whether it comes from the server or the user, is serialized.
//!
//! Reconciliation of server events lives in `reconcile`, command dispatch in
//! `dispatcher`; both are `impl PartyEngine` blocks over the state defined here.

use crate::config::EngineConfig;
use crate::dispatcher::PendingCommands;
use crate::error::{TransportError, ValidationError};
use crate::invite::InviteTracker;
use crate::party::{PartyModel, PartySnapshot};
use crate::queue::{QueueCatalog, QueueDiff};
use log::info;
use shared::{
    Command, CorrelationId, Invite, MatchId, Packet, Party, PartyId, PlayerId, QueueDefinition,
    QueueId, RejectReason,
};
use std::collections::VecDeque;
use std::time::Instant;

/// How many left parties are remembered for dropping late events.
const ABANDONED_LIMIT: usize = 16;

/// Coarse change notifications, one per entity change. Observers diff
/// themselves against the state they last rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PartyChanged(PartySnapshot),
    QueuesChanged(QueueSummary),
    InviteReceived(Invite),
    InviteResolved(Invite),
    CommandRejected {
        correlation_id: CorrelationId,
        command: Command,
        reason: RejectReason,
    },
    CommandFailed {
        correlation_id: CorrelationId,
        command: Command,
        error: TransportError,
    },
    /// Hand-off point to whatever runs the match itself.
    MatchFound {
        queue_id: QueueId,
        match_id: MatchId,
    },
    ConnectionChanged {
        connected: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSummary {
    pub queues: Vec<QueueDefinition>,
    pub added: Vec<QueueId>,
    pub removed: Vec<QueueId>,
    pub queued: Vec<QueueId>,
    pub eligible: Vec<QueueId>,
}

/// Everything the presentation layer needs to render the party screen.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineView {
    pub local_player: PlayerId,
    pub party: PartySnapshot,
    pub queues: Vec<QueueDefinition>,
    pub queued: Vec<QueueId>,
    pub eligible: Vec<QueueId>,
    pub outgoing_invites: Vec<Invite>,
    pub incoming_invites: Vec<Invite>,
    pub pending_commands: usize,
    pub connected: bool,
    pub ping_ms: u64,
}

impl EngineView {
    pub fn is_owner(&self) -> bool {
        self.party.party.is_owner(self.local_player)
    }

    /// Only the owner gets to invite.
    pub fn can_invite(&self) -> bool {
        self.is_owner()
    }

    /// A player alone has nothing to leave.
    pub fn can_leave(&self) -> bool {
        self.party.party.len() > 1
    }

    pub fn is_self_ready(&self) -> bool {
        self.party
            .party
            .member(self.local_player)
            .is_some_and(|m| m.ready)
    }

    pub fn is_queued(&self, queue_id: QueueId) -> bool {
        self.queued.contains(&queue_id)
    }
}

/// Packets to send and notifications to publish, accumulated while the
/// engine handles one input.
#[derive(Debug, Default)]
pub struct Effects {
    pub outgoing: Vec<Packet>,
    pub notifications: Vec<Notification>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.notifications.is_empty()
    }
}

pub struct PartyEngine {
    pub(crate) local_player: PlayerId,
    pub(crate) config: EngineConfig,
    pub(crate) model: PartyModel,
    pub(crate) catalog: QueueCatalog,
    pub(crate) invites: InviteTracker,
    pub(crate) pending: PendingCommands,
    /// Parties this client left, most recent last; anything still tagged with
    /// them is dropped.
    abandoned: VecDeque<PartyId>,
    eligible: Vec<QueueId>,
    effects: Effects,
}

impl PartyEngine {
    pub fn new(local_player: PlayerId, config: EngineConfig) -> Self {
        Self {
            local_player,
            config,
            model: PartyModel::new(local_player),
            catalog: QueueCatalog::new(),
            invites: InviteTracker::new(),
            pending: PendingCommands::new(),
            abandoned: VecDeque::new(),
            eligible: Vec::new(),
            effects: Effects::default(),
        }
    }

    pub fn local_player(&self) -> PlayerId {
        self.local_player
    }

    pub fn party(&self) -> PartySnapshot {
        self.model.snapshot()
    }

    pub fn catalog(&self) -> &QueueCatalog {
        &self.catalog
    }

    pub fn invites(&self) -> &InviteTracker {
        &self.invites
    }

    /// Eligible queues as of the last state change.
    pub fn eligible_queues(&self) -> &[QueueId] {
        &self.eligible
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    pub fn is_abandoned(&self, party_id: PartyId) -> bool {
        self.abandoned.contains(&party_id)
    }

    pub(crate) fn abandon(&mut self, party_id: PartyId) {
        if party_id == shared::UNASSIGNED_PARTY || self.abandoned.contains(&party_id) {
            return;
        }
        if self.abandoned.len() >= ABANDONED_LIMIT {
            self.abandoned.pop_front();
        }
        self.abandoned.push_back(party_id);
    }

    /// Lets events for `party_id` through again.
    pub(crate) fn forget_abandoned(&mut self, party_id: PartyId) {
        self.abandoned.retain(|id| *id != party_id);
    }

    pub fn view(&self, now: Instant) -> EngineView {
        EngineView {
            local_player: self.local_player,
            party: self.model.snapshot(),
            queues: self.catalog.queues().to_vec(),
            queued: self.catalog.queued(),
            eligible: self.eligible.clone(),
            outgoing_invites: self.invites.outgoing(now),
            incoming_invites: self.invites.incoming_all(now),
            pending_commands: self.pending.len(),
            connected: true,
            ping_ms: 0,
        }
    }

    /// Takes everything produced since the last call.
    pub fn take_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn send(&mut self, packet: Packet) {
        self.effects.outgoing.push(packet);
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        self.effects.notifications.push(notification);
    }

    /// Queues at most one snapshot request per batch of effects.
    pub(crate) fn request_snapshot(&mut self) {
        let already = self
            .effects
            .outgoing
            .iter()
            .any(|p| matches!(p, Packet::RequestSnapshot));
        if !already {
            self.send(Packet::RequestSnapshot);
        }
    }

    /// Publishes the visible party and recomputes eligibility.
    pub(crate) fn publish_party(&mut self, now: Instant) {
        let snapshot = self.model.snapshot();
        self.notify(Notification::PartyChanged(snapshot));
        self.publish_queues(QueueDiff::default(), false, now);
    }

    /// Emits one QueuesChanged when the catalog, the queued flags or the
    /// derived eligibility changed.
    pub(crate) fn publish_queues(&mut self, diff: QueueDiff, queued_changed: bool, now: Instant) {
        let party = self.model.visible();
        let blocking = self.invites.has_blocking(party.id, now);
        let eligible = self.catalog.eligible_queues(party, blocking);

        if diff.is_empty() && !queued_changed && eligible == self.eligible {
            return;
        }
        self.eligible = eligible.clone();
        let summary = QueueSummary {
            queues: self.catalog.queues().to_vec(),
            added: diff.added,
            removed: diff.removed,
            queued: self.catalog.queued(),
            eligible,
        };
        self.notify(Notification::QueuesChanged(summary));
    }

    /// Drops everything tied to `party_id`: its outgoing invites, pending
    /// commands and queued flags. Assigned parties are also abandoned so late
    /// events tagged with them are ignored. Returns whether queued flags changed.
    pub(crate) fn leave_scope(&mut self, party_id: PartyId) -> bool {
        self.abandon(party_id);
        for invite in self.invites.abandon_party(party_id) {
            self.notify(Notification::InviteResolved(invite));
        }
        self.pending.cancel_party(party_id);
        self.catalog.reset()
    }

    /// The MemberLeft path for the local player: a fresh solo party, never
    /// partyless.
    pub(crate) fn reset_to_solo(&mut self, now: Instant) {
        let old = self.model.confirmed().id;
        let queued_changed = self.leave_scope(old);
        self.model.replace(Party::solo(self.local_player));
        info!("Player {} left party {}", self.local_player, old);
        self.notify(Notification::PartyChanged(self.model.snapshot()));
        self.publish_queues(QueueDiff::default(), queued_changed, now);
    }

    /// Atomically moves the local player into `party`.
    pub(crate) fn switch_party(&mut self, party: Party, now: Instant) {
        let old = self.model.confirmed().id;
        let queued_changed = if old == shared::UNASSIGNED_PARTY && party.is_owner(self.local_player)
        {
            // the server just created a party for us; keep what we issued
            self.invites.adopt(old, party.id);
            self.catalog.reset()
        } else {
            self.leave_scope(old)
        };
        self.invites.remove_incoming(party.id);
        info!(
            "Player {} now in party {} (revision {}, {} members)",
            self.local_player,
            party.id,
            party.revision,
            party.len()
        );
        self.model.replace(party);
        self.notify(Notification::PartyChanged(self.model.snapshot()));
        self.publish_queues(QueueDiff::default(), queued_changed, now);
    }

    /// Validation-only check used by callers that want to grey out actions.
    pub fn check(&self, command: &Command, now: Instant) -> Result<(), ValidationError> {
        self.validate(command, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{PartyMember, ServerEvent};

    fn engine() -> PartyEngine {
        PartyEngine::new(1, EngineConfig::default())
    }

    #[test]
    fn test_new_engine_shows_solo_party() {
        let engine = engine();
        let view = engine.view(Instant::now());
        assert_eq!(view.local_player, 1);
        assert_eq!(view.party.party.member_ids(), vec![1]);
        assert!(view.is_owner());
        assert!(view.can_invite());
        assert!(!view.can_leave());
        assert!(!view.is_self_ready());
    }

    #[test]
    fn test_request_snapshot_is_deduplicated_per_batch() {
        let mut engine = engine();
        engine.request_snapshot();
        engine.request_snapshot();
        let effects = engine.take_effects();
        assert_eq!(effects.outgoing.len(), 1);
        assert!(engine.take_effects().is_empty());
        engine.request_snapshot();
        assert_eq!(engine.take_effects().outgoing.len(), 1);
    }

    #[test]
    fn test_view_reflects_joined_party() {
        let mut engine = engine();
        let now = Instant::now();
        let mut party = Party::new(8, 2, 4);
        party.add_member(PartyMember::new(1));
        engine.apply(ServerEvent::PartyUpdated { party }, now);

        let view = engine.view(now);
        assert_eq!(view.party.party.id, 8);
        assert!(!view.is_owner());
        assert!(!view.can_invite());
        assert!(view.can_leave());
    }

    #[test]
    fn test_abandoned_parties_are_bounded() {
        let mut engine = engine();
        for party_id in 1..=(ABANDONED_LIMIT as PartyId + 4) {
            engine.abandon(party_id);
        }
        engine.abandon(shared::UNASSIGNED_PARTY);
        assert!(!engine.is_abandoned(1));
        assert!(engine.is_abandoned(5));
        assert!(engine.is_abandoned(ABANDONED_LIMIT as PartyId + 4));
        assert!(!engine.is_abandoned(shared::UNASSIGNED_PARTY));

        engine.forget_abandoned(5);
        assert!(!engine.is_abandoned(5));
    }
}
