//! Outstanding invite bookkeeping: issued invites keyed by (party, invitee),
//! received invites keyed by the inviting party, each with a monotonic
//! deadline.

use crate::error::ValidationError;
use shared::{timestamp_ms, Invite, InviteState, Party, PartyId, PlayerId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InviteKey {
    pub party_id: PartyId,
    pub to_player_id: PlayerId,
}

#[derive(Debug, Clone)]
struct TrackedInvite {
    invite: Invite,
    deadline: Instant,
}

impl TrackedInvite {
    fn new(invite: Invite, now: Instant) -> Self {
        let deadline = now + invite.lifetime();
        Self { invite, deadline }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.invite.is_pending() && now < self.deadline
    }
}

#[derive(Debug, Default)]
pub struct InviteTracker {
    outgoing: HashMap<InviteKey, TrackedInvite>,
    incoming: HashMap<PartyId, TrackedInvite>,
}

impl InviteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a Pending invite from the party owner to `to`.
    pub fn issue(
        &mut self,
        party: &Party,
        from: PlayerId,
        to: PlayerId,
        ttl: Duration,
        now: Instant,
    ) -> Result<Invite, ValidationError> {
        if !party.is_owner(from) {
            return Err(ValidationError::NotOwner);
        }
        if self.has_pending(party.id, to, now) {
            return Err(ValidationError::AlreadyInvited(to));
        }

        let issued_at = timestamp_ms();
        let invite = Invite {
            from_player_id: from,
            to_player_id: to,
            party_id: party.id,
            issued_at,
            expires_at: issued_at + ttl.as_millis() as u64,
            state: InviteState::Pending,
        };
        let key = InviteKey {
            party_id: party.id,
            to_player_id: to,
        };
        self.outgoing.insert(
            key,
            TrackedInvite {
                invite: invite.clone(),
                deadline: now + ttl,
            },
        );
        Ok(invite)
    }

    pub fn has_pending(&self, party_id: PartyId, to: PlayerId, now: Instant) -> bool {
        let key = InviteKey {
            party_id,
            to_player_id: to,
        };
        self.outgoing.get(&key).is_some_and(|t| t.is_live(now))
    }

    /// Whether the party still waits on an answer to any invite.
    pub fn has_blocking(&self, party_id: PartyId, now: Instant) -> bool {
        self.outgoing
            .iter()
            .any(|(key, tracked)| key.party_id == party_id && tracked.is_live(now))
    }

    pub fn cancel(&mut self, party_id: PartyId, to: PlayerId) -> Option<Invite> {
        let key = InviteKey {
            party_id,
            to_player_id: to,
        };
        self.outgoing
            .remove(&key)
            .map(|t| t.invite.resolved(InviteState::Cancelled))
    }

    /// Registers an invite addressed to the local player. Returns false for a
    /// duplicate of an invite that is still live.
    pub fn receive(&mut self, invite: Invite, now: Instant) -> bool {
        if !invite.is_pending() {
            return false;
        }
        if let Some(existing) = self.incoming.get(&invite.party_id) {
            if existing.is_live(now) {
                return false;
            }
        }
        self.incoming
            .insert(invite.party_id, TrackedInvite::new(invite, now));
        true
    }

    /// Live invite from `party_id`, if any.
    pub fn incoming(&self, party_id: PartyId, now: Instant) -> Option<&Invite> {
        self.incoming
            .get(&party_id)
            .filter(|t| t.is_live(now))
            .map(|t| &t.invite)
    }

    pub fn remove_incoming(&mut self, party_id: PartyId) -> Option<Invite> {
        self.incoming.remove(&party_id).map(|t| t.invite)
    }

    /// Applies a server resolution to whichever side holds the invite.
    pub fn resolve(&mut self, invite: &Invite, local: PlayerId) -> Option<Invite> {
        if invite.to_player_id == local {
            let matches = self
                .incoming
                .get(&invite.party_id)
                .is_some_and(|t| t.invite.from_player_id == invite.from_player_id);
            if matches {
                self.incoming.remove(&invite.party_id);
                return Some(invite.clone());
            }
            return None;
        }
        let key = InviteKey {
            party_id: invite.party_id,
            to_player_id: invite.to_player_id,
        };
        self.outgoing.remove(&key).map(|_| invite.clone())
    }

    /// Moves every invite whose deadline passed to Expired and returns them.
    pub fn expire(&mut self, now: Instant) -> Vec<Invite> {
        let mut expired = Vec::new();
        self.outgoing.retain(|_, tracked| {
            if tracked.deadline <= now {
                expired.push(tracked.invite.resolved(InviteState::Expired));
                false
            } else {
                true
            }
        });
        self.incoming.retain(|_, tracked| {
            if tracked.deadline <= now {
                expired.push(tracked.invite.resolved(InviteState::Expired));
                false
            } else {
                true
            }
        });
        expired
    }

    /// Cancels every outgoing invite of a party the local player left.
    pub fn abandon_party(&mut self, party_id: PartyId) -> Vec<Invite> {
        let keys: Vec<InviteKey> = self
            .outgoing
            .keys()
            .filter(|key| key.party_id == party_id)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.cancel(key.party_id, key.to_player_id))
            .collect()
    }

    /// Re-tags outgoing invites of `from` (typically the unassigned party) as
    /// belonging to `to`, the party the server just created for them.
    pub fn adopt(&mut self, from: PartyId, to: PartyId) {
        let keys: Vec<InviteKey> = self
            .outgoing
            .keys()
            .filter(|key| key.party_id == from)
            .copied()
            .collect();
        for key in keys {
            if let Some(mut tracked) = self.outgoing.remove(&key) {
                tracked.invite.party_id = to;
                self.outgoing.insert(
                    InviteKey {
                        party_id: to,
                        to_player_id: key.to_player_id,
                    },
                    tracked,
                );
            }
        }
    }

    /// Rebuilds both tables from an authoritative snapshot.
    pub fn restore(&mut self, invites: &[Invite], local: PlayerId, server_time: u64, now: Instant) {
        self.outgoing.clear();
        self.incoming.clear();
        for invite in invites.iter().filter(|i| i.is_pending()) {
            let remaining = Duration::from_millis(invite.expires_at.saturating_sub(server_time));
            let tracked = TrackedInvite {
                invite: invite.clone(),
                deadline: now + remaining,
            };
            if invite.to_player_id == local {
                self.incoming.insert(invite.party_id, tracked);
            } else {
                let key = InviteKey {
                    party_id: invite.party_id,
                    to_player_id: invite.to_player_id,
                };
                self.outgoing.insert(key, tracked);
            }
        }
    }

    pub fn clear(&mut self) -> Vec<Invite> {
        let cancelled = self
            .outgoing
            .drain()
            .map(|(_, t)| t.invite.resolved(InviteState::Cancelled))
            .collect();
        self.incoming.clear();
        cancelled
    }

    pub fn outgoing(&self, now: Instant) -> Vec<Invite> {
        let mut invites: Vec<Invite> = self
            .outgoing
            .values()
            .filter(|t| t.is_live(now))
            .map(|t| t.invite.clone())
            .collect();
        invites.sort_by_key(|i| (i.issued_at, i.to_player_id));
        invites
    }

    pub fn incoming_all(&self, now: Instant) -> Vec<Invite> {
        let mut invites: Vec<Invite> = self
            .incoming
            .values()
            .filter(|t| t.is_live(now))
            .map(|t| t.invite.clone())
            .collect();
        invites.sort_by_key(|i| (i.issued_at, i.party_id));
        invites
    }
}
