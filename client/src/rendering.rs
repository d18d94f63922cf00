//! Plain-text rendering of the party screen and of notifications.

use crate::directory::PlayerDirectory;
use crate::engine::{EngineView, Notification};
use shared::{Faction, FactionSet, InviteState, QueueDefinition};
use std::fmt::Write;

pub struct Renderer<'a> {
    directory: &'a dyn PlayerDirectory,
}

impl<'a> Renderer<'a> {
    pub fn new(directory: &'a dyn PlayerDirectory) -> Self {
        Self { directory }
    }

    pub fn render(&self, view: &EngineView) -> String {
        let mut out = String::new();
        let party = &view.party.party;

        let header = if party.is_assigned() {
            format!("Party {} (revision {})", party.id, party.revision)
        } else {
            "Solo".to_string()
        };
        let _ = write!(out, "{}", header);
        if view.party.is_provisional() {
            out.push_str(" [pending]");
        }
        if !view.connected {
            out.push_str(" [offline]");
        } else {
            let _ = write!(out, "  ping {}ms", view.ping_ms);
        }
        out.push('\n');

        for member in &party.members {
            let marker = if party.is_owner(member.player_id) {
                '*'
            } else {
                ' '
            };
            let you = if member.player_id == view.local_player {
                " (you)"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                " {} {:<16} {:<5} {}{}",
                marker,
                self.directory.display_name(member.player_id),
                if member.ready { "ready" } else { "-" },
                factions(&member.factions),
                you
            );
        }

        out.push_str("Queues:\n");
        for queue in &view.queues {
            let _ = writeln!(out, "  {}", queue_line(queue, view));
        }

        for invite in &view.outgoing_invites {
            let _ = writeln!(
                out,
                "Invited {}",
                self.directory.display_name(invite.to_player_id)
            );
        }
        for invite in &view.incoming_invites {
            let _ = writeln!(
                out,
                "Invite from {} to party {} (accept {1} / decline {1})",
                self.directory.display_name(invite.from_player_id),
                invite.party_id
            );
        }
        out
    }

    /// One line for the console, or None for notifications not worth a line.
    pub fn describe(&self, notification: &Notification) -> Option<String> {
        let line = match notification {
            Notification::PartyChanged(_) | Notification::QueuesChanged(_) => return None,
            Notification::InviteReceived(invite) => format!(
                "{} invited you to party {}",
                self.directory.display_name(invite.from_player_id),
                invite.party_id
            ),
            Notification::InviteResolved(invite) => {
                let state = match invite.state {
                    InviteState::Pending => return None,
                    InviteState::Accepted => "accepted",
                    InviteState::Declined => "declined",
                    InviteState::Expired => "expired",
                    InviteState::Cancelled => "cancelled",
                };
                format!(
                    "Invite of {} to party {} {}",
                    self.directory.display_name(invite.to_player_id),
                    invite.party_id,
                    state
                )
            }
            Notification::CommandRejected {
                command, reason, ..
            } => format!("{} rejected: {}", command.name(), reason),
            Notification::CommandFailed { command, error, .. } => {
                format!("{} failed: {}", command.name(), error)
            }
            Notification::MatchFound { queue_id, match_id } => {
                format!("Match {} found in queue {}!", match_id, queue_id)
            }
            Notification::ConnectionChanged { connected } => {
                let text = if *connected {
                    "Connected"
                } else {
                    "Connection lost, reconnecting..."
                };
                text.to_string()
            }
        };
        Some(line)
    }
}

fn factions(set: &FactionSet) -> String {
    Faction::ALL
        .iter()
        .map(|f| {
            if set.contains(f) {
                f.as_str()[..1].to_ascii_uppercase()
            } else {
                ".".to_string()
            }
        })
        .collect()
}

fn queue_line(queue: &QueueDefinition, view: &EngineView) -> String {
    let state = if view.is_queued(queue.id) {
        "queued"
    } else if view.eligible.contains(&queue.id) {
        "open"
    } else {
        "-"
    };
    format!("[{}] {:<8} {}", queue.id, queue.name, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::directory::PlayerRoster;
    use crate::engine::PartyEngine;
    use shared::{PartyMember, PlayerInfo, ServerEvent};
    use std::time::Instant;

    fn roster() -> PlayerRoster {
        let mut roster = PlayerRoster::new();
        roster.update(vec![
            PlayerInfo {
                id: 1,
                name: "alice".to_string(),
                online: true,
            },
            PlayerInfo {
                id: 2,
                name: "bob".to_string(),
                online: true,
            },
        ]);
        roster
    }

    #[test]
    fn test_faction_column() {
        let set: FactionSet = [Faction::Aeon, Faction::Uef].into_iter().collect();
        assert_eq!(factions(&set), "A.U.");
    }

    #[test]
    fn test_render_party_and_queues() {
        let now = Instant::now();
        let mut engine = PartyEngine::new(2, EngineConfig::default());
        engine.apply(
            ServerEvent::QueueListUpdated {
                queues: vec![
                    QueueDefinition::new(1, "1v1", 1),
                    QueueDefinition::new(2, "2v2", 2),
                ],
            },
            now,
        );
        let mut party = shared::Party::new(5, 1, 3);
        party.add_member(PartyMember::new(2));
        engine.apply(ServerEvent::PartyUpdated { party }, now);

        let roster = roster();
        let text = Renderer::new(&roster).render(&engine.view(now));
        assert!(text.starts_with("Party 5 (revision 3)"));
        assert!(text.contains("* alice"));
        assert!(text.contains("bob"));
        assert!(text.contains("(you)"));
        assert!(text.contains("[1] 1v1      -"));
        assert!(text.contains("[2] 2v2      open"));
    }

    #[test]
    fn test_describe_skips_state_changes() {
        let roster = roster();
        let renderer = Renderer::new(&roster);
        let engine = PartyEngine::new(1, EngineConfig::default());
        let view = engine.view(Instant::now());
        assert!(renderer
            .describe(&Notification::PartyChanged(view.party))
            .is_none());
        assert_eq!(
            renderer.describe(&Notification::MatchFound {
                queue_id: 2,
                match_id: 9
            }),
            Some("Match 9 found in queue 2!".to_string())
        );
    }
}
