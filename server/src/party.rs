//! Authoritative party, invite and matchmaking state.
//!
//! Every party counts its own revisions: each mutation advances the party by
//! exactly one and produces the events to fan out. Queue membership has a
//! separate per-party counter. Party events always carry the whole resulting
//! party so a client only ever needs the newest revision it has seen.

use log::{debug, info};
use rand::Rng;
use shared::{
    Command, Invite, InviteState, MatchId, Party, PartyId, PartyMember, PlayerId, QueueDefinition,
    QueueId, RejectReason, Revision, ServerEvent, Snapshot, UNASSIGNED_PARTY,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

/// An event addressed to one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PlayerId,
    pub event: ServerEvent,
}

pub fn default_queues() -> Vec<QueueDefinition> {
    vec![
        QueueDefinition::new(1, "1v1", 1),
        QueueDefinition::new(2, "2v2", 2),
        QueueDefinition::new(3, "4v4", 4),
    ]
}

pub struct PartyRegistry {
    parties: HashMap<PartyId, Party>,
    membership: HashMap<PlayerId, PartyId>,
    /// Pending invites keyed by (party, invitee)
    invites: BTreeMap<(PartyId, PlayerId), Invite>,
    queues: Vec<QueueDefinition>,
    /// Parties waiting in each queue, oldest first
    waiting: BTreeMap<QueueId, VecDeque<PartyId>>,
    queued: HashMap<PartyId, BTreeSet<QueueId>>,
    online: HashSet<PlayerId>,
    /// Last QueueEntered/QueueLeft revision per party
    queue_revisions: HashMap<PartyId, Revision>,
    invite_ttl: Duration,
    next_match_id: MatchId,
}

impl PartyRegistry {
    pub fn new(queues: Vec<QueueDefinition>, invite_ttl: Duration) -> Self {
        let waiting = queues.iter().map(|q| (q.id, VecDeque::new())).collect();
        Self {
            parties: HashMap::new(),
            membership: HashMap::new(),
            invites: BTreeMap::new(),
            queues,
            waiting,
            queued: HashMap::new(),
            online: HashSet::new(),
            queue_revisions: HashMap::new(),
            invite_ttl,
            next_match_id: 1,
        }
    }

    pub fn queues(&self) -> &[QueueDefinition] {
        &self.queues
    }

    pub fn queue_revision(&self, party_id: PartyId) -> Revision {
        self.queue_revisions.get(&party_id).copied().unwrap_or(0)
    }

    pub fn party(&self, party_id: PartyId) -> Option<&Party> {
        self.parties.get(&party_id)
    }

    pub fn party_of(&self, player_id: PlayerId) -> Option<&Party> {
        self.membership
            .get(&player_id)
            .and_then(|id| self.parties.get(id))
    }

    pub fn queued_in(&self, party_id: PartyId) -> Vec<QueueId> {
        self.queued
            .get(&party_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn waiting_len(&self, queue_id: QueueId) -> usize {
        self.waiting.get(&queue_id).map_or(0, |w| w.len())
    }

    pub fn party_count(&self) -> usize {
        self.parties.len()
    }

    pub fn connect(&mut self, player_id: PlayerId) {
        self.online.insert(player_id);
    }

    /// Takes a player offline: invites addressed to them are cancelled and
    /// they leave their party.
    pub fn disconnect(&mut self, player_id: PlayerId) -> Vec<Outbound> {
        let mut out = Vec::new();
        if !self.online.remove(&player_id) {
            return out;
        }

        let addressed: Vec<(PartyId, PlayerId)> = self
            .invites
            .keys()
            .filter(|(_, to)| *to == player_id)
            .copied()
            .collect();
        for key in addressed {
            self.resolve_invite(key, InviteState::Cancelled, &mut out);
        }

        self.leave_current(player_id, true, &mut out);
        out
    }

    /// Applies one command from `player`. On success returns the events to
    /// deliver; on failure nothing has changed.
    pub fn handle(
        &mut self,
        player: PlayerId,
        command: Command,
        now_ms: u64,
    ) -> Result<Vec<Outbound>, RejectReason> {
        let mut out = Vec::new();
        match command {
            Command::InvitePlayer { player_id } => self.invite(player, player_id, now_ms, &mut out)?,
            Command::CancelInvite { player_id } => {
                let party_id = self.owned_party(player)?;
                let key = (party_id, player_id);
                if !self.invites.contains_key(&key) {
                    return Err(RejectReason::NoSuchInvite);
                }
                self.resolve_invite(key, InviteState::Cancelled, &mut out);
            }
            Command::AcceptInvite { party_id } => self.accept(player, party_id, now_ms, &mut out)?,
            Command::DeclineInvite { party_id } => {
                let key = (party_id, player);
                match self.invites.get(&key) {
                    Some(invite) if invite.expires_at > now_ms => {}
                    _ => return Err(RejectReason::NoSuchInvite),
                }
                self.resolve_invite(key, InviteState::Declined, &mut out);
            }
            Command::KickMember { player_id } => {
                let party_id = self.owned_party(player)?;
                if player_id == player {
                    return Err(RejectReason::InvalidTarget);
                }
                if !self.party(party_id).is_some_and(|p| p.contains(player_id)) {
                    return Err(RejectReason::NotMember);
                }
                self.remove_member(party_id, player_id, true, true, &mut out);
            }
            Command::LeaveParty => {
                if !self.membership.contains_key(&player) {
                    return Err(RejectReason::NotInParty);
                }
                self.leave_current(player, true, &mut out);
            }
            Command::SetFactions { player_id, factions } => {
                if player_id != player {
                    return Err(RejectReason::NotSelf);
                }
                if factions.is_empty() {
                    return Err(RejectReason::NoFactionSelected);
                }
                let party_id = self.ensure_party(player, &mut out);
                let changed = self
                    .parties
                    .get_mut(&party_id)
                    .is_some_and(|p| p.set_factions(player, &factions));
                if changed {
                    self.dequeue_all(party_id, &mut out);
                    let party = self.bump_party(party_id);
                    self.to_members(
                        &party,
                        ServerEvent::FactionChanged {
                            party: party.clone(),
                            player_id: player,
                        },
                        &mut out,
                    );
                }
            }
            Command::SetReady { player_id, ready } => {
                if player_id != player {
                    return Err(RejectReason::NotSelf);
                }
                let party_id = self.ensure_party(player, &mut out);
                let changed = self
                    .parties
                    .get_mut(&party_id)
                    .is_some_and(|p| p.set_ready(player, ready));
                if changed {
                    if !ready {
                        self.dequeue_all(party_id, &mut out);
                    }
                    let party = self.bump_party(party_id);
                    self.to_members(
                        &party,
                        ServerEvent::ReadyChanged {
                            party: party.clone(),
                            player_id: player,
                        },
                        &mut out,
                    );
                }
            }
            Command::JoinQueue { queue_id } => self.join_queue(player, queue_id, now_ms, &mut out)?,
            Command::LeaveQueue { queue_id } => {
                let party_id = *self
                    .membership
                    .get(&player)
                    .ok_or(RejectReason::NotInParty)?;
                if !self
                    .queued
                    .get(&party_id)
                    .is_some_and(|set| set.contains(&queue_id))
                {
                    return Err(RejectReason::NotQueued);
                }
                self.dequeue(party_id, queue_id, &mut out);
            }
        }
        Ok(out)
    }

    /// Full state for one player.
    pub fn snapshot(&self, player_id: PlayerId, now_ms: u64) -> Snapshot {
        let party = self.party_of(player_id).cloned();
        let party_id = party.as_ref().map(|p| p.id);
        let queued = party_id.map(|id| self.queued_in(id)).unwrap_or_default();
        let invites = self
            .invites
            .values()
            .filter(|i| {
                i.expires_at > now_ms
                    && (i.to_player_id == player_id || Some(i.party_id) == party_id)
            })
            .cloned()
            .collect();

        Snapshot {
            party,
            queues: self.queues.clone(),
            queued,
            queue_revision: party_id.map_or(0, |id| self.queue_revision(id)),
            invites,
            server_time: now_ms,
        }
    }

    /// Expires invites and pairs up waiting parties.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Outbound> {
        let mut out = Vec::new();

        let expired: Vec<(PartyId, PlayerId)> = self
            .invites
            .iter()
            .filter(|(_, invite)| invite.expires_at <= now_ms)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            self.resolve_invite(key, InviteState::Expired, &mut out);
        }

        let queue_ids: Vec<QueueId> = self.waiting.keys().copied().collect();
        for queue_id in queue_ids {
            loop {
                let Some(waiting) = self.waiting.get_mut(&queue_id) else {
                    break;
                };
                if waiting.len() < 2 {
                    break;
                }
                let (Some(first), Some(second)) = (waiting.pop_front(), waiting.pop_front()) else {
                    break;
                };
                let match_id = self.next_match_id;
                self.next_match_id = self.next_match_id.wrapping_add(1).max(1);
                info!(
                    "Match {} in queue {}: party {} vs party {}",
                    match_id, queue_id, first, second
                );
                for party_id in [first, second] {
                    self.matched(party_id, queue_id, match_id, &mut out);
                }
            }
        }
        out
    }

    fn invite(
        &mut self,
        player: PlayerId,
        target: PlayerId,
        now_ms: u64,
        out: &mut Vec<Outbound>,
    ) -> Result<(), RejectReason> {
        if target == player {
            return Err(RejectReason::InvalidTarget);
        }
        if !self.online.contains(&target) {
            return Err(RejectReason::PlayerOffline);
        }
        if let Some(party) = self.party_of(player) {
            if !party.is_owner(player) {
                return Err(RejectReason::NotOwner);
            }
            if party.contains(target) {
                return Err(RejectReason::AlreadyMember);
            }
            if self
                .invites
                .get(&(party.id, target))
                .is_some_and(|i| i.expires_at > now_ms)
            {
                return Err(RejectReason::AlreadyInvited);
            }
        }

        let party_id = self.ensure_party(player, out);
        let invite = Invite {
            from_player_id: player,
            to_player_id: target,
            party_id,
            issued_at: now_ms,
            expires_at: now_ms + self.invite_ttl.as_millis() as u64,
            state: InviteState::Pending,
        };
        debug!("Player {} invited {} to party {}", player, target, party_id);
        self.invites.insert((party_id, target), invite.clone());
        out.push(Outbound {
            to: target,
            event: ServerEvent::InviteReceived { invite },
        });
        Ok(())
    }

    fn accept(
        &mut self,
        player: PlayerId,
        party_id: PartyId,
        now_ms: u64,
        out: &mut Vec<Outbound>,
    ) -> Result<(), RejectReason> {
        let key = (party_id, player);
        match self.invites.get(&key) {
            Some(invite) if invite.expires_at > now_ms => {}
            _ => return Err(RejectReason::NoSuchInvite),
        }
        if !self.parties.contains_key(&party_id) {
            self.invites.remove(&key);
            return Err(RejectReason::NoSuchInvite);
        }

        // the joiner learns about the move from MemberJoined alone
        self.leave_current(player, false, out);
        self.resolve_invite(key, InviteState::Accepted, out);
        self.dequeue_all(party_id, out);

        if let Some(party) = self.parties.get_mut(&party_id) {
            party.add_member(PartyMember::new(player));
        }
        self.membership.insert(player, party_id);
        let party = self.bump_party(party_id);
        info!("Player {} joined party {}", player, party_id);
        self.to_members(
            &party,
            ServerEvent::MemberJoined {
                party: party.clone(),
                player_id: player,
            },
            out,
        );
        Ok(())
    }

    fn join_queue(
        &mut self,
        player: PlayerId,
        queue_id: QueueId,
        now_ms: u64,
        out: &mut Vec<Outbound>,
    ) -> Result<(), RejectReason> {
        let queue = self
            .queues
            .iter()
            .find(|q| q.id == queue_id)
            .ok_or(RejectReason::UnknownQueue)?;
        // a fresh party is never ready
        let party = self.party_of(player).ok_or(RejectReason::NotAllReady)?;
        if !party.is_owner(player) {
            return Err(RejectReason::NotOwner);
        }
        let party_id = party.id;
        if self
            .queued
            .get(&party_id)
            .is_some_and(|set| set.contains(&queue_id))
        {
            return Err(RejectReason::AlreadyQueued);
        }
        if !party.all_ready() {
            return Err(RejectReason::NotAllReady);
        }
        let inviting = self
            .invites
            .values()
            .any(|i| i.party_id == party_id && i.expires_at > now_ms);
        if inviting || !queue.admits(party.len()) {
            return Err(RejectReason::QueueIneligible);
        }

        self.waiting.entry(queue_id).or_default().push_back(party_id);
        self.queued.entry(party_id).or_default().insert(queue_id);
        let revision = self.bump_queue(party_id);
        info!("Party {} entered queue {}", party_id, queue_id);
        self.to_party(
            party_id,
            ServerEvent::QueueEntered {
                party_id,
                queue_id,
                revision,
            },
            out,
        );
        Ok(())
    }

    fn owned_party(&self, player: PlayerId) -> Result<PartyId, RejectReason> {
        let party = self.party_of(player).ok_or(RejectReason::NotInParty)?;
        if !party.is_owner(player) {
            return Err(RejectReason::NotOwner);
        }
        Ok(party.id)
    }

    /// The player's party, creating a single-member one if needed.
    fn ensure_party(&mut self, player: PlayerId, out: &mut Vec<Outbound>) -> PartyId {
        if let Some(&party_id) = self.membership.get(&player) {
            return party_id;
        }
        let party_id = self.fresh_party_id();
        let party = Party::new(party_id, player, 1);
        info!("Player {} formed party {}", player, party_id);
        self.parties.insert(party_id, party.clone());
        self.membership.insert(player, party_id);
        out.push(Outbound {
            to: player,
            event: ServerEvent::PartyUpdated { party },
        });
        party_id
    }

    fn fresh_party_id(&self) -> PartyId {
        let mut rng = rand::thread_rng();
        loop {
            let id: PartyId = rng.gen();
            if id != UNASSIGNED_PARTY && !self.parties.contains_key(&id) {
                return id;
            }
        }
    }

    fn leave_current(&mut self, player: PlayerId, notify_leaver: bool, out: &mut Vec<Outbound>) {
        if let Some(&party_id) = self.membership.get(&player) {
            self.remove_member(party_id, player, false, notify_leaver, out);
        }
    }

    /// Removes a member, leaving the queue first. The last member leaving
    /// dissolves the party. Invites the leaver issued are cancelled.
    fn remove_member(
        &mut self,
        party_id: PartyId,
        player: PlayerId,
        kicked: bool,
        notify_leaver: bool,
        out: &mut Vec<Outbound>,
    ) {
        self.dequeue_all(party_id, out);

        let issued: Vec<(PartyId, PlayerId)> = self
            .invites
            .iter()
            .filter(|(key, invite)| key.0 == party_id && invite.from_player_id == player)
            .map(|(key, _)| *key)
            .collect();
        for key in issued {
            self.resolve_invite(key, InviteState::Cancelled, out);
        }

        self.membership.remove(&player);
        let now_empty = match self.parties.get_mut(&party_id) {
            Some(party) => {
                party.remove_member(player);
                party.is_empty()
            }
            None => return,
        };

        if now_empty {
            self.dissolve(party_id, player, notify_leaver, out);
            return;
        }

        let party = self.bump_party(party_id);
        info!(
            "Player {} {} party {}",
            player,
            if kicked { "was kicked from" } else { "left" },
            party_id
        );
        let event = ServerEvent::MemberLeft {
            party: party.clone(),
            player_id: player,
            kicked,
        };
        self.to_members(&party, event.clone(), out);
        if notify_leaver {
            out.push(Outbound { to: player, event });
        }
    }

    fn dissolve(
        &mut self,
        party_id: PartyId,
        last: PlayerId,
        notify: bool,
        out: &mut Vec<Outbound>,
    ) {
        let remaining: Vec<(PartyId, PlayerId)> = self
            .invites
            .keys()
            .filter(|key| key.0 == party_id)
            .copied()
            .collect();
        for key in remaining {
            self.resolve_invite(key, InviteState::Cancelled, out);
        }
        let revision = self
            .parties
            .remove(&party_id)
            .map_or(1, |party| party.revision + 1);
        self.queued.remove(&party_id);
        self.queue_revisions.remove(&party_id);
        info!("Party {} dissolved", party_id);
        if notify {
            out.push(Outbound {
                to: last,
                event: ServerEvent::PartyDisbanded { party_id, revision },
            });
        }
    }

    /// Drops the invite and tells both sides how it ended.
    fn resolve_invite(
        &mut self,
        key: (PartyId, PlayerId),
        state: InviteState,
        out: &mut Vec<Outbound>,
    ) {
        let Some(invite) = self.invites.remove(&key) else {
            return;
        };
        let resolved = invite.resolved(state);
        debug!(
            "Invite of {} to party {} {:?}",
            resolved.to_player_id, resolved.party_id, state
        );
        for to in [resolved.from_player_id, resolved.to_player_id] {
            out.push(Outbound {
                to,
                event: ServerEvent::InviteResolved {
                    invite: resolved.clone(),
                },
            });
        }
    }

    fn dequeue(&mut self, party_id: PartyId, queue_id: QueueId, out: &mut Vec<Outbound>) {
        if let Some(waiting) = self.waiting.get_mut(&queue_id) {
            waiting.retain(|id| *id != party_id);
        }
        let removed = self
            .queued
            .get_mut(&party_id)
            .is_some_and(|set| set.remove(&queue_id));
        if !removed {
            return;
        }
        let revision = self.bump_queue(party_id);
        debug!("Party {} left queue {}", party_id, queue_id);
        self.to_party(
            party_id,
            ServerEvent::QueueLeft {
                party_id,
                queue_id,
                revision,
            },
            out,
        );
    }

    fn dequeue_all(&mut self, party_id: PartyId, out: &mut Vec<Outbound>) {
        for queue_id in self.queued_in(party_id) {
            self.dequeue(party_id, queue_id, out);
        }
    }

    /// A matched party leaves every queue it was waiting in.
    fn matched(
        &mut self,
        party_id: PartyId,
        queue_id: QueueId,
        match_id: MatchId,
        out: &mut Vec<Outbound>,
    ) {
        for other in self.queued_in(party_id) {
            if let Some(waiting) = self.waiting.get_mut(&other) {
                waiting.retain(|id| *id != party_id);
            }
        }
        self.queued.remove(&party_id);
        self.to_party(
            party_id,
            ServerEvent::MatchFound {
                party_id,
                queue_id,
                match_id,
            },
            out,
        );
    }

    fn bump_queue(&mut self, party_id: PartyId) -> Revision {
        let revision = self.queue_revisions.entry(party_id).or_insert(0);
        *revision += 1;
        *revision
    }

    /// Advances the party by one revision and returns a copy of it.
    fn bump_party(&mut self, party_id: PartyId) -> Party {
        match self.parties.get_mut(&party_id) {
            Some(party) => {
                party.revision += 1;
                party.clone()
            }
            None => Party::new(party_id, UNASSIGNED_PARTY, 1),
        }
    }

    fn to_members(&self, party: &Party, event: ServerEvent, out: &mut Vec<Outbound>) {
        for member in &party.members {
            out.push(Outbound {
                to: member.player_id,
                event: event.clone(),
            });
        }
    }

    fn to_party(&self, party_id: PartyId, event: ServerEvent, out: &mut Vec<Outbound>) {
        if let Some(party) = self.parties.get(&party_id) {
            self.to_members(party, event, out);
        }
    }
}
