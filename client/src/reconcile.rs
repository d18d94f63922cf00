//! Applying server events to the engine. Every party event carries the full
//! resulting party, so reconciliation is "keep the newest revision of the
//! party we are in" plus the membership-switch rules.

use crate::engine::{Notification, PartyEngine};
use crate::error::Staleness;
use crate::queue::QueueDiff;
use log::{debug, info, trace};
use shared::{Party, PartyId, ServerEvent, Snapshot};
use std::time::Instant;

impl PartyEngine {
    /// Applies one server event. Stale, duplicated and foreign events are
    /// dropped without notification.
    pub fn apply(&mut self, event: ServerEvent, now: Instant) {
        let name = event.name();
        trace!("Applying {} for party {:?}", name, event.party_id());
        if let Err(staleness) = self.apply_event(event, now) {
            debug!("Dropped {}: {:?}", name, staleness);
        }
    }

    fn apply_event(&mut self, event: ServerEvent, now: Instant) -> Result<(), Staleness> {
        match event {
            ServerEvent::PartyUpdated { party }
            | ServerEvent::MemberJoined { party, .. }
            | ServerEvent::FactionChanged { party, .. }
            | ServerEvent::ReadyChanged { party, .. } => self.accept_party(party, now),

            ServerEvent::MemberLeft {
                party,
                player_id,
                kicked,
            } if player_id == self.local_player => {
                self.check_current(party.id)?;
                self.check_newer(party.revision)?;
                if kicked {
                    info!("Kicked from party {}", party.id);
                }
                self.reset_to_solo(now);
                Ok(())
            }
            ServerEvent::MemberLeft { party, .. } => self.accept_party(party, now),

            ServerEvent::PartyDisbanded { party_id, revision } => {
                self.check_current(party_id)?;
                self.check_newer(revision)?;
                info!("Party {} disbanded", party_id);
                self.reset_to_solo(now);
                Ok(())
            }

            ServerEvent::QueueListUpdated { queues } => {
                let diff = self.catalog.refresh(queues);
                self.publish_queues(diff, false, now);
                Ok(())
            }

            ServerEvent::InviteReceived { invite } => {
                if invite.to_player_id != self.local_player {
                    return Err(Staleness::ForeignParty(invite.party_id));
                }
                if self.invites.receive(invite.clone(), now) {
                    info!(
                        "Invite to party {} from player {}",
                        invite.party_id, invite.from_player_id
                    );
                    self.notify(Notification::InviteReceived(invite));
                }
                Ok(())
            }

            ServerEvent::InviteResolved { invite } => {
                if let Some(resolved) = self.invites.resolve(&invite, self.local_player) {
                    debug!(
                        "Invite of player {} to party {} is now {:?}",
                        resolved.to_player_id, resolved.party_id, resolved.state
                    );
                    self.notify(Notification::InviteResolved(resolved));
                    self.publish_queues(QueueDiff::default(), false, now);
                }
                Ok(())
            }

            ServerEvent::QueueEntered {
                party_id,
                queue_id,
                revision,
            } => {
                self.check_current(party_id)?;
                let changed = self.catalog.set_queued(queue_id, true, revision)?;
                self.publish_queues(QueueDiff::default(), changed, now);
                Ok(())
            }

            ServerEvent::QueueLeft {
                party_id,
                queue_id,
                revision,
            } => {
                self.check_current(party_id)?;
                let changed = self.catalog.set_queued(queue_id, false, revision)?;
                self.publish_queues(QueueDiff::default(), changed, now);
                Ok(())
            }

            ServerEvent::MatchFound {
                party_id,
                queue_id,
                match_id,
            } => {
                self.check_current(party_id)?;
                info!("Match {} found in queue {}", match_id, queue_id);
                let changed = self.catalog.clear_queued();
                self.publish_queues(QueueDiff::default(), changed, now);
                self.notify(Notification::MatchFound { queue_id, match_id });
                Ok(())
            }

            ServerEvent::Snapshot(snapshot) => {
                self.apply_snapshot(snapshot, now);
                Ok(())
            }
        }
    }

    /// Event must be tagged with the party we are in and have not left.
    fn check_current(&self, party_id: PartyId) -> Result<(), Staleness> {
        if self.is_abandoned(party_id) {
            return Err(Staleness::AbandonedParty(party_id));
        }
        if party_id != self.model.confirmed().id {
            return Err(Staleness::ForeignParty(party_id));
        }
        Ok(())
    }

    fn check_newer(&self, revision: shared::Revision) -> Result<(), Staleness> {
        let current = self.model.revision();
        if revision <= current {
            return Err(Staleness::OldRevision {
                received: revision,
                current,
            });
        }
        Ok(())
    }

    fn accept_party(&mut self, party: Party, now: Instant) -> Result<(), Staleness> {
        if self.is_abandoned(party.id) {
            return Err(Staleness::AbandonedParty(party.id));
        }
        let current = self.model.confirmed().id;

        if !party.contains(self.local_player) {
            if party.id != current {
                return Err(Staleness::NotAMember(party.id));
            }
            // our own party, newer, without us: we were removed
            self.check_newer(party.revision)?;
            self.reset_to_solo(now);
            return Ok(());
        }

        if party.id == current {
            self.model.apply_confirmed(party)?;
            self.publish_party(now);
        } else {
            self.switch_party(party, now);
        }
        Ok(())
    }

    /// Authoritative resync. Replaces party, queue flags and invites; a
    /// snapshot older than the confirmed party only clears the overlay.
    fn apply_snapshot(&mut self, snapshot: Snapshot, now: Instant) {
        let Snapshot {
            party,
            queues,
            queued,
            queue_revision,
            invites,
            server_time,
        } = snapshot;

        let current = self.model.confirmed().id;
        let before = self.model.snapshot();
        let mut in_party = false;

        // the server still has us in a party we left; unless that leave is
        // still in flight, the server is right
        if let Some(party) = &party {
            if party.contains(self.local_player)
                && self.is_abandoned(party.id)
                && !self.pending.is_leaving(party.id)
            {
                info!("Party {} still lists us, rejoining", party.id);
                self.forget_abandoned(party.id);
            }
        }

        match party {
            Some(party) if party.contains(self.local_player) && !self.is_abandoned(party.id) => {
                in_party = true;
                if party.id != current {
                    self.switch_party(party, now);
                } else {
                    if party.revision >= self.model.revision() {
                        self.model.replace(party);
                    } else {
                        self.model.discard_provisional();
                    }
                    if self.model.snapshot() != before {
                        self.notify(Notification::PartyChanged(self.model.snapshot()));
                    }
                }
            }
            _ => {
                if current != shared::UNASSIGNED_PARTY {
                    self.reset_to_solo(now);
                } else if self.model.discard_provisional() {
                    self.notify(Notification::PartyChanged(self.model.snapshot()));
                }
            }
        }

        let diff = self.catalog.refresh(queues);
        let restored = if in_party {
            queued
        } else {
            Vec::new()
        };
        let queued_changed = self.catalog.restore(&restored, queue_revision);
        self.invites
            .restore(&invites, self.local_player, server_time, now);
        debug!(
            "Resynced: party {} revision {}, {} queued, {} invites",
            self.model.confirmed().id,
            self.model.revision(),
            restored.len(),
            invites.len()
        );
        self.publish_queues(diff, queued_changed, now);
    }
}
