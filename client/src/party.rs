//! Per-client mirror of the party: the last confirmed revision plus an
//! optional optimistic overlay that the next confirmed revision replaces.

use crate::error::Staleness;
use shared::{FactionSet, Party, PlayerId, Revision};

/// Whether a snapshot reflects server-confirmed state or a local echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Confirmed,
    Provisional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartySnapshot {
    pub party: Party,
    pub provenance: Provenance,
}

impl PartySnapshot {
    pub fn is_provisional(&self) -> bool {
        self.provenance == Provenance::Provisional
    }
}

/// Locally predicted change, applied with the same rules the server uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetFactions {
        player_id: PlayerId,
        factions: FactionSet,
    },
    SetReady {
        player_id: PlayerId,
        ready: bool,
    },
    RemoveMember {
        player_id: PlayerId,
    },
}

impl Mutation {
    fn apply(&self, party: &mut Party) -> bool {
        match self {
            Mutation::SetFactions {
                player_id,
                factions,
            } => party.set_factions(*player_id, factions),
            Mutation::SetReady { player_id, ready } => party.set_ready(*player_id, *ready),
            Mutation::RemoveMember { player_id } => {
                // the owner can never be removed optimistically
                *player_id != party.owner_id && party.remove_member(*player_id)
            }
        }
    }
}

pub struct PartyModel {
    confirmed: Party,
    provisional: Option<Party>,
}

impl PartyModel {
    pub fn new(local_player: PlayerId) -> Self {
        Self {
            confirmed: Party::solo(local_player),
            provisional: None,
        }
    }

    /// Immutable copy of what the user should see right now.
    pub fn snapshot(&self) -> PartySnapshot {
        match &self.provisional {
            Some(party) => PartySnapshot {
                party: party.clone(),
                provenance: Provenance::Provisional,
            },
            None => PartySnapshot {
                party: self.confirmed.clone(),
                provenance: Provenance::Confirmed,
            },
        }
    }

    /// Current visible party without cloning.
    pub fn visible(&self) -> &Party {
        self.provisional.as_ref().unwrap_or(&self.confirmed)
    }

    pub fn confirmed(&self) -> &Party {
        &self.confirmed
    }

    pub fn revision(&self) -> Revision {
        self.confirmed.revision
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional.is_some()
    }

    /// Replaces the confirmed party iff `party` is a newer revision of the
    /// same party. Older or equal revisions are no-ops, which makes duplicate
    /// and reordered delivery harmless.
    pub fn apply_confirmed(&mut self, party: Party) -> Result<(), Staleness> {
        if party.id != self.confirmed.id {
            return Err(Staleness::ForeignParty(party.id));
        }
        if party.revision <= self.confirmed.revision {
            return Err(Staleness::OldRevision {
                received: party.revision,
                current: self.confirmed.revision,
            });
        }
        self.confirmed = party;
        self.provisional = None;
        Ok(())
    }

    /// Switches to a different party scope (joined elsewhere, reset to solo,
    /// authoritative snapshot). Revision ordering does not apply across parties.
    pub fn replace(&mut self, party: Party) {
        self.confirmed = party;
        self.provisional = None;
    }

    /// Applies a predicted change on top of the visible state. Returns false
    /// when the mutation changes nothing, in which case no overlay is created.
    pub fn apply_optimistic(&mut self, mutation: &Mutation) -> bool {
        let mut party = self.visible().clone();
        if !mutation.apply(&mut party) {
            return false;
        }
        self.provisional = Some(party);
        true
    }

    /// Drops the overlay. Returns true if the visible state changed.
    pub fn discard_provisional(&mut self) -> bool {
        match self.provisional.take() {
            Some(party) => party != self.confirmed,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Faction, PartyMember};

    fn party(id: u32, revision: Revision, members: &[PlayerId]) -> Party {
        let mut party = Party::new(id, members[0], revision);
        for member in &members[1..] {
            party.add_member(PartyMember::new(*member));
        }
        party
    }

    fn model_in(p: Party) -> PartyModel {
        let mut model = PartyModel::new(p.owner_id);
        model.replace(p);
        model
    }

    #[test]
    fn test_new_model_is_confirmed_solo() {
        let model = PartyModel::new(4);
        let snapshot = model.snapshot();
        assert_eq!(snapshot.provenance, Provenance::Confirmed);
        assert_eq!(snapshot.party.member_ids(), vec![4]);
        assert!(!snapshot.party.is_assigned());
    }

    #[test]
    fn test_apply_confirmed_newer_revision() {
        let mut model = model_in(party(5, 3, &[1]));
        assert!(model.apply_confirmed(party(5, 4, &[1, 2])).is_ok());
        assert_eq!(model.revision(), 4);
        assert_eq!(model.snapshot().party.member_ids(), vec![1, 2]);
    }

    #[test]
    fn test_apply_confirmed_is_idempotent() {
        let mut model = model_in(party(5, 3, &[1]));
        let update = party(5, 4, &[1, 2]);
        assert!(model.apply_confirmed(update.clone()).is_ok());
        let before = model.snapshot();
        assert_eq!(
            model.apply_confirmed(update),
            Err(Staleness::OldRevision {
                received: 4,
                current: 4
            })
        );
        assert_eq!(model.snapshot(), before);
    }

    #[test]
    fn test_apply_confirmed_drops_older_revision() {
        let mut model = model_in(party(5, 5, &[1, 2]));
        assert!(model.apply_confirmed(party(5, 3, &[1])).is_err());
        assert_eq!(model.revision(), 5);
        assert_eq!(model.snapshot().party.member_ids(), vec![1, 2]);
    }

    #[test]
    fn test_apply_confirmed_rejects_other_party() {
        let mut model = model_in(party(5, 5, &[1]));
        assert_eq!(
            model.apply_confirmed(party(6, 9, &[1])),
            Err(Staleness::ForeignParty(6))
        );
    }

    #[test]
    fn test_optimistic_overlay_is_visible_then_superseded() {
        let mut model = model_in(party(5, 1, &[1, 2]));
        let uef: FactionSet = [Faction::Uef].into_iter().collect();
        assert!(model.apply_optimistic(&Mutation::SetFactions {
            player_id: 1,
            factions: uef.clone(),
        }));

        let snapshot = model.snapshot();
        assert!(snapshot.is_provisional());
        assert_eq!(snapshot.party.member(1).unwrap().factions, uef);
        assert_eq!(model.confirmed().member(1).unwrap().factions.len(), 4);

        // the confirmed revision wins even if it disagrees with the echo
        assert!(model.apply_confirmed(party(5, 2, &[1, 2])).is_ok());
        let snapshot = model.snapshot();
        assert!(!snapshot.is_provisional());
        assert_eq!(snapshot.party.member(1).unwrap().factions.len(), 4);
    }

    #[test]
    fn test_optimistic_noop_creates_no_overlay() {
        let mut model = model_in(party(5, 1, &[1]));
        assert!(!model.apply_optimistic(&Mutation::SetReady {
            player_id: 1,
            ready: false,
        }));
        assert!(!model.is_provisional());
    }

    #[test]
    fn test_optimistic_cannot_remove_owner() {
        let mut model = model_in(party(5, 1, &[1, 2]));
        assert!(!model.apply_optimistic(&Mutation::RemoveMember { player_id: 1 }));
        assert!(model.apply_optimistic(&Mutation::RemoveMember { player_id: 2 }));
        assert_eq!(model.visible().member_ids(), vec![1]);
    }

    #[test]
    fn test_optimistic_mutations_stack() {
        let mut model = model_in(party(5, 1, &[1, 2]));
        model.apply_optimistic(&Mutation::SetReady {
            player_id: 1,
            ready: true,
        });
        model.apply_optimistic(&Mutation::RemoveMember { player_id: 2 });
        let visible = model.visible();
        assert_eq!(visible.member_ids(), vec![1]);
        // composition change resets ready
        assert!(!visible.member(1).unwrap().ready);
    }

    #[test]
    fn test_discard_provisional_reports_visible_change() {
        let mut model = model_in(party(5, 1, &[1]));
        assert!(!model.discard_provisional());
        model.apply_optimistic(&Mutation::SetReady {
            player_id: 1,
            ready: true,
        });
        assert!(model.discard_provisional());
        assert!(!model.snapshot().party.member(1).unwrap().ready);
    }
}
