//! Player identity lookup. The engine only deals in player ids; names and
//! online status come from whatever implements [`PlayerDirectory`].

use shared::{Party, PlayerId, PlayerInfo};
use std::collections::HashMap;

pub trait PlayerDirectory {
    fn lookup(&self, player_id: PlayerId) -> Option<&PlayerInfo>;

    /// Exact, case-insensitive name match.
    fn find_by_name(&self, name: &str) -> Option<&PlayerInfo>;

    fn players(&self) -> Vec<&PlayerInfo>;

    fn display_name(&self, player_id: PlayerId) -> String {
        self.lookup(player_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("player#{}", player_id))
    }
}

/// Directory kept up to date from the server's `Directory` packets.
#[derive(Debug, Default, Clone)]
pub struct PlayerRoster {
    players: HashMap<PlayerId, PlayerInfo>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster wholesale.
    pub fn update(&mut self, players: Vec<PlayerInfo>) {
        self.players = players.into_iter().map(|p| (p.id, p)).collect();
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl PlayerDirectory for PlayerRoster {
    fn lookup(&self, player_id: PlayerId) -> Option<&PlayerInfo> {
        self.players.get(&player_id)
    }

    fn find_by_name(&self, name: &str) -> Option<&PlayerInfo> {
        self.players
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    fn players(&self) -> Vec<&PlayerInfo> {
        let mut players: Vec<&PlayerInfo> = self.players.values().collect();
        players.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        players
    }
}

/// Players the local player could invite: online, not already in the party,
/// and whose name contains `query` (case-insensitive). An empty query lists
/// everyone.
pub fn invite_candidates(
    directory: &dyn PlayerDirectory,
    party: &Party,
    local_player: PlayerId,
    query: &str,
) -> Vec<PlayerInfo> {
    let query = query.trim().to_lowercase();
    directory
        .players()
        .into_iter()
        .filter(|p| p.id != local_player && p.online && !party.contains(p.id))
        .filter(|p| query.is_empty() || p.name.to_lowercase().contains(&query))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PartyMember;

    fn roster() -> PlayerRoster {
        let mut roster = PlayerRoster::new();
        roster.update(vec![
            PlayerInfo {
                id: 1,
                name: "Alice".to_string(),
                online: true,
            },
            PlayerInfo {
                id: 2,
                name: "bob".to_string(),
                online: true,
            },
            PlayerInfo {
                id: 3,
                name: "Carol".to_string(),
                online: false,
            },
            PlayerInfo {
                id: 4,
                name: "Bobby".to_string(),
                online: true,
            },
        ]);
        roster
    }

    #[test]
    fn test_lookup_and_find_by_name() {
        let roster = roster();
        assert_eq!(roster.len(), 4);
        assert_eq!(roster.lookup(2).unwrap().name, "bob");
        assert_eq!(roster.find_by_name("ALICE").unwrap().id, 1);
        assert!(roster.find_by_name("dave").is_none());
        assert_eq!(roster.display_name(9), "player#9");
    }

    #[test]
    fn test_players_sorted_by_name() {
        let roster = roster();
        let names: Vec<&str> = roster.players().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "bob", "Bobby", "Carol"]);
    }

    #[test]
    fn test_invite_candidates_filter() {
        let roster = roster();
        let party = Party::solo(1);

        let all: Vec<PlayerId> = invite_candidates(&roster, &party, 1, "")
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(all, vec![2, 4]);

        let bobs: Vec<PlayerId> = invite_candidates(&roster, &party, 1, "BO")
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(bobs, vec![2, 4]);

        let mut party = Party::new(5, 1, 1);
        party.add_member(PartyMember::new(4));
        let rest: Vec<PlayerId> = invite_candidates(&roster, &party, 1, "b")
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(rest, vec![2]);
    }
}
