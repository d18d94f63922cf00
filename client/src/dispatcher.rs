//! Command submission: local validation, optimistic echo, correlation and
//! the bookkeeping that resolves each command exactly once (ack, reject,
//! timeout or disconnect).

use crate::engine::{Notification, PartyEngine};
use crate::error::{TransportError, ValidationError};
use crate::party::Mutation;
use crate::queue::QueueDiff;
use log::{debug, warn};
use shared::{Command, CorrelationId, InviteState, Packet, PartyId, RejectReason};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command: Command,
    /// Party the command was issued against.
    pub party_id: PartyId,
    pub deadline: Instant,
}

/// Commands sent but not yet acknowledged, keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingCommands {
    last_id: CorrelationId,
    entries: HashMap<CorrelationId, PendingCommand>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next correlation id. Wraps around and never yields 0.
    pub fn next_id(&mut self) -> CorrelationId {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == 0 {
            self.last_id = 1;
        }
        self.last_id
    }

    pub fn insert(&mut self, correlation_id: CorrelationId, command: PendingCommand) {
        self.entries.insert(correlation_id, command);
    }

    pub fn remove(&mut self, correlation_id: CorrelationId) -> Option<PendingCommand> {
        self.entries.remove(&correlation_id)
    }

    pub fn get(&self, correlation_id: CorrelationId) -> Option<&PendingCommand> {
        self.entries.get(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every command whose deadline has passed, oldest
    /// correlation id first.
    pub fn expire(&mut self, now: Instant) -> Vec<(CorrelationId, PendingCommand)> {
        let mut ids: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|p| (id, p)))
            .collect()
    }

    /// Forgets commands issued against a party we no longer belong to.
    pub fn cancel_party(&mut self, party_id: PartyId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| pending.party_id != party_id);
        before - self.entries.len()
    }

    /// Whether a LeaveParty for `party_id` is still unresolved.
    pub fn is_leaving(&self, party_id: PartyId) -> bool {
        self.entries
            .values()
            .any(|p| p.party_id == party_id && p.command == Command::LeaveParty)
    }

    pub fn drain(&mut self) -> Vec<(CorrelationId, PendingCommand)> {
        let mut drained: Vec<_> = self.entries.drain().collect();
        drained.sort_unstable_by_key(|(id, _)| *id);
        drained
    }
}

impl PartyEngine {
    /// Validates `command` against the visible state, applies its optimistic
    /// echo and queues it for sending. Validation failures never reach the
    /// server.
    pub fn submit(
        &mut self,
        command: Command,
        now: Instant,
    ) -> Result<CorrelationId, ValidationError> {
        self.validate(&command, now)?;

        let party_id = self.model.confirmed().id;
        self.apply_local(&command, now)?;

        let correlation_id = self.pending.next_id();
        debug!("Sending {} as #{}", command.name(), correlation_id);
        self.send(Packet::Command {
            correlation_id,
            command: command.clone(),
        });
        self.pending.insert(
            correlation_id,
            PendingCommand {
                command,
                party_id,
                deadline: now + self.config.command_timeout,
            },
        );
        Ok(correlation_id)
    }

    pub(crate) fn validate(&self, command: &Command, now: Instant) -> Result<(), ValidationError> {
        let party = self.model.visible();
        let local = self.local_player;

        match command {
            Command::InvitePlayer { player_id } => {
                if *player_id == local {
                    return Err(ValidationError::CannotTargetSelf);
                }
                if !party.is_owner(local) {
                    return Err(ValidationError::NotOwner);
                }
                if party.contains(*player_id) {
                    return Err(ValidationError::AlreadyMember(*player_id));
                }
                if self.invites.has_pending(party.id, *player_id, now) {
                    return Err(ValidationError::AlreadyInvited(*player_id));
                }
            }
            Command::CancelInvite { player_id } => {
                if !party.is_owner(local) {
                    return Err(ValidationError::NotOwner);
                }
                if !self.invites.has_pending(party.id, *player_id, now) {
                    return Err(ValidationError::NoSuchInvite);
                }
            }
            Command::AcceptInvite { party_id } | Command::DeclineInvite { party_id } => {
                if self.invites.incoming(*party_id, now).is_none() {
                    return Err(ValidationError::NoSuchInvite);
                }
            }
            Command::KickMember { player_id } => {
                if !party.is_owner(local) {
                    return Err(ValidationError::NotOwner);
                }
                if *player_id == local {
                    return Err(ValidationError::CannotTargetSelf);
                }
                if !party.contains(*player_id) {
                    return Err(ValidationError::NotMember(*player_id));
                }
            }
            Command::LeaveParty => {
                if party.len() <= 1 {
                    return Err(ValidationError::NotInParty);
                }
            }
            Command::SetFactions {
                player_id,
                factions,
            } => {
                if *player_id != local {
                    return Err(ValidationError::NotSelf);
                }
                if factions.is_empty() {
                    return Err(ValidationError::NoFactionSelected);
                }
            }
            Command::SetReady { player_id, .. } => {
                if *player_id != local {
                    return Err(ValidationError::NotSelf);
                }
            }
            Command::JoinQueue { queue_id } => {
                if !party.is_owner(local) {
                    return Err(ValidationError::NotOwner);
                }
                if self.catalog.get(*queue_id).is_none() {
                    return Err(ValidationError::UnknownQueue(*queue_id));
                }
                if self.catalog.is_queued(*queue_id) {
                    return Err(ValidationError::AlreadyQueued(*queue_id));
                }
                if !party.all_ready() {
                    return Err(ValidationError::NotAllReady);
                }
                let blocking = self.invites.has_blocking(party.id, now);
                if !self
                    .catalog
                    .eligible_queues(party, blocking)
                    .contains(queue_id)
                {
                    return Err(ValidationError::QueueIneligible(*queue_id));
                }
            }
            Command::LeaveQueue { queue_id } => {
                if !self.catalog.is_queued(*queue_id) {
                    return Err(ValidationError::NotQueued(*queue_id));
                }
            }
        }
        Ok(())
    }

    /// Local effects of a command that passed validation.
    fn apply_local(&mut self, command: &Command, now: Instant) -> Result<(), ValidationError> {
        let local = self.local_player;
        match command {
            Command::InvitePlayer { player_id } => {
                let party = self.model.visible().clone();
                let ttl = self.config.invite_ttl;
                self.invites.issue(&party, local, *player_id, ttl, now)?;
                self.publish_queues(QueueDiff::default(), false, now);
            }
            Command::CancelInvite { player_id } => {
                let party_id = self.model.visible().id;
                if let Some(invite) = self.invites.cancel(party_id, *player_id) {
                    self.notify(Notification::InviteResolved(invite));
                    self.publish_queues(QueueDiff::default(), false, now);
                }
            }
            Command::AcceptInvite { party_id } => {
                // rejoining a party we left earlier is allowed
                self.forget_abandoned(*party_id);
            }
            Command::DeclineInvite { party_id } => {
                if let Some(invite) = self.invites.remove_incoming(*party_id) {
                    self.notify(Notification::InviteResolved(
                        invite.resolved(InviteState::Declined),
                    ));
                }
            }
            Command::KickMember { player_id } => {
                self.optimistic(
                    &Mutation::RemoveMember {
                        player_id: *player_id,
                    },
                    now,
                );
            }
            Command::LeaveParty => self.reset_to_solo(now),
            Command::SetFactions {
                player_id,
                factions,
            } => {
                self.optimistic(
                    &Mutation::SetFactions {
                        player_id: *player_id,
                        factions: factions.clone(),
                    },
                    now,
                );
            }
            Command::SetReady { player_id, ready } => {
                self.optimistic(
                    &Mutation::SetReady {
                        player_id: *player_id,
                        ready: *ready,
                    },
                    now,
                );
            }
            Command::JoinQueue { .. } | Command::LeaveQueue { .. } => {}
        }
        Ok(())
    }

    fn optimistic(&mut self, mutation: &Mutation, now: Instant) {
        if self.model.apply_optimistic(mutation) {
            self.publish_party(now);
        }
    }

    pub fn on_ack(&mut self, correlation_id: CorrelationId) {
        let Some(pending) = self.pending.remove(correlation_id) else {
            debug!("Ack for unknown command #{}", correlation_id);
            return;
        };
        debug!("{} #{} acknowledged", pending.command.name(), correlation_id);
        // the confirming event should have arrived before the ack
        if self.pending.is_empty() && self.model.is_provisional() {
            debug!("Overlay still present after ack, resyncing");
            self.request_snapshot();
        }
    }

    pub fn on_rejected(&mut self, correlation_id: CorrelationId, reason: RejectReason, now: Instant) {
        let Some(pending) = self.pending.remove(correlation_id) else {
            debug!("Rejection for unknown command #{}", correlation_id);
            return;
        };
        warn!(
            "{} #{} rejected: {}",
            pending.command.name(),
            correlation_id,
            reason
        );
        if let Command::InvitePlayer { player_id } = &pending.command {
            let party_id = self.model.confirmed().id;
            self.invites.cancel(party_id, *player_id);
            self.publish_queues(QueueDiff::default(), false, now);
        }
        self.undo_leave(&pending);
        if self.model.discard_provisional() {
            self.publish_party(now);
        }
        self.notify(Notification::CommandRejected {
            correlation_id,
            command: pending.command,
            reason,
        });
        self.request_snapshot();
    }

    /// Expires overdue commands and invites.
    pub fn tick(&mut self, now: Instant) {
        let expired = self.pending.expire(now);
        if !expired.is_empty() {
            for (correlation_id, pending) in expired {
                warn!(
                    "{} #{} timed out",
                    pending.command.name(),
                    correlation_id
                );
                self.undo_leave(&pending);
                self.notify(Notification::CommandFailed {
                    correlation_id,
                    command: pending.command,
                    error: TransportError::Timeout,
                });
            }
            if self.model.discard_provisional() {
                self.publish_party(now);
            }
            self.request_snapshot();
        }

        let invites = self.invites.expire(now);
        if !invites.is_empty() {
            for invite in invites {
                debug!(
                    "Invite of player {} to party {} expired",
                    invite.to_player_id, invite.party_id
                );
                self.notify(Notification::InviteResolved(invite));
            }
            self.publish_queues(QueueDiff::default(), false, now);
        }
    }

    /// Fails every pending command and drops the overlay.
    pub fn connection_lost(&mut self, now: Instant) {
        for (correlation_id, pending) in self.pending.drain() {
            self.undo_leave(&pending);
            self.notify(Notification::CommandFailed {
                correlation_id,
                command: pending.command,
                error: TransportError::Disconnected,
            });
        }
        if self.model.discard_provisional() {
            self.publish_party(now);
        }
        self.notify(Notification::ConnectionChanged { connected: false });
    }

    pub fn reconnected(&mut self) {
        self.notify(Notification::ConnectionChanged { connected: true });
        self.request_snapshot();
    }

    /// A LeaveParty that did not go through leaves us in the old party as
    /// far as the server knows, so its events must be accepted again.
    fn undo_leave(&mut self, pending: &PendingCommand) {
        if pending.command == Command::LeaveParty {
            debug!("Leave of party {} failed", pending.party_id);
            self.forget_abandoned(pending.party_id);
        }
    }

    /// Cancels outgoing invites and pending commands, then says goodbye.
    pub fn logout(&mut self, now: Instant) {
        for invite in self.invites.clear() {
            self.notify(Notification::InviteResolved(invite));
        }
        self.pending.drain();
        self.reset_to_solo(now);
        self.send(Packet::Disconnect);
    }
}
