//! Console input parsing for the interactive client.

use shared::{all_factions, Command, Faction, FactionSet, PartyId, PlayerId, QueueId};
use thiserror::Error;

/// A player named on the command line, by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(PlayerId),
    Name(String),
}

impl Target {
    fn parse(arg: &str) -> Self {
        match arg.parse::<PlayerId>() {
            Ok(id) => Target::Id(id),
            Err(_) => Target::Name(arg.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Invite(Target),
    CancelInvite(Target),
    Kick(Target),
    Status,
    Who(String),
    Refresh,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty input")]
    Empty,
    #[error("unknown command '{0}', try 'help'")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("{0}")]
    InvalidFaction(String),
}

pub const HELP: &str = "\
commands:
  invite <player>        invite a player by name or id
  cancel <player>        cancel an outgoing invite
  accept <party>         accept the invite from a party
  decline <party>        decline the invite from a party
  kick <player>          remove a member (owner only)
  leave                  leave the party
  factions <f>...|all    pick factions: aeon cybran uef seraphim
  ready / unready        toggle your ready flag
  queue <id>             join a matchmaking queue (owner only)
  unqueue <id>           leave a matchmaking queue
  status                 show party, queues and invites
  who [filter]           list players you could invite
  refresh                resync with the server
  quit                   log out";

/// Turns console lines into inputs for the local player.
pub struct InputParser {
    local_player: PlayerId,
}

impl InputParser {
    pub fn new(local_player: PlayerId) -> Self {
        Self { local_player }
    }

    pub fn parse(&self, line: &str) -> Result<Input, ParseError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseError::Empty);
        };
        let rest: Vec<&str> = words.collect();

        let input = match verb.to_ascii_lowercase().as_str() {
            "invite" => Input::Invite(Target::parse(first(&rest, "player")?)),
            "cancel" => Input::CancelInvite(Target::parse(first(&rest, "player")?)),
            "kick" => Input::Kick(Target::parse(first(&rest, "player")?)),
            "accept" => Input::Command(Command::AcceptInvite {
                party_id: number::<PartyId>(first(&rest, "party")?)?,
            }),
            "decline" => Input::Command(Command::DeclineInvite {
                party_id: number::<PartyId>(first(&rest, "party")?)?,
            }),
            "leave" => Input::Command(Command::LeaveParty),
            "factions" | "faction" => Input::Command(Command::SetFactions {
                player_id: self.local_player,
                factions: factions(&rest)?,
            }),
            "ready" => self.ready(true),
            "unready" => self.ready(false),
            "queue" => Input::Command(Command::JoinQueue {
                queue_id: number::<QueueId>(first(&rest, "queue")?)?,
            }),
            "unqueue" => Input::Command(Command::LeaveQueue {
                queue_id: number::<QueueId>(first(&rest, "queue")?)?,
            }),
            "status" | "s" => Input::Status,
            "who" => Input::Who(rest.join(" ")),
            "refresh" => Input::Refresh,
            "help" | "?" => Input::Help,
            "quit" | "exit" => Input::Quit,
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        Ok(input)
    }

    fn ready(&self, ready: bool) -> Input {
        Input::Command(Command::SetReady {
            player_id: self.local_player,
            ready,
        })
    }
}

fn first<'a>(args: &[&'a str], name: &'static str) -> Result<&'a str, ParseError> {
    args.first().copied().ok_or(ParseError::MissingArgument(name))
}

fn number<T: std::str::FromStr>(arg: &str) -> Result<T, ParseError> {
    arg.parse::<T>()
        .map_err(|_| ParseError::InvalidNumber(arg.to_string()))
}

fn factions(args: &[&str]) -> Result<FactionSet, ParseError> {
    if args.is_empty() {
        return Err(ParseError::MissingArgument("factions"));
    }
    if args.len() == 1 && args[0].eq_ignore_ascii_case("all") {
        return Ok(all_factions());
    }
    args.iter()
        .flat_map(|arg| arg.split(','))
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Faction>().map_err(ParseError::InvalidFaction))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> InputParser {
        InputParser::new(7)
    }

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            parser().parse("invite bob"),
            Ok(Input::Invite(Target::Name("bob".to_string())))
        );
        assert_eq!(parser().parse("kick 3"), Ok(Input::Kick(Target::Id(3))));
        assert_eq!(
            parser().parse("invite"),
            Err(ParseError::MissingArgument("player"))
        );
    }

    #[test]
    fn test_parse_self_commands_use_local_player() {
        assert_eq!(
            parser().parse("ready"),
            Ok(Input::Command(Command::SetReady {
                player_id: 7,
                ready: true
            }))
        );
        match parser().parse("factions uef,aeon") {
            Ok(Input::Command(Command::SetFactions {
                player_id,
                factions,
            })) => {
                assert_eq!(player_id, 7);
                assert_eq!(factions.len(), 2);
                assert!(factions.contains(&Faction::Uef));
            }
            other => panic!("unexpected {:?}", other),
        }
        match parser().parse("factions all") {
            Ok(Input::Command(Command::SetFactions { factions, .. })) => {
                assert_eq!(factions.len(), 4)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parser().parse("   "), Err(ParseError::Empty));
        assert_eq!(
            parser().parse("dance"),
            Err(ParseError::UnknownCommand("dance".to_string()))
        );
        assert_eq!(
            parser().parse("queue two"),
            Err(ParseError::InvalidNumber("two".to_string()))
        );
        assert!(matches!(
            parser().parse("factions orcs"),
            Err(ParseError::InvalidFaction(_))
        ));
    }

    #[test]
    fn test_parse_queue_and_misc() {
        assert_eq!(
            parser().parse("QUEUE 2"),
            Ok(Input::Command(Command::JoinQueue { queue_id: 2 }))
        );
        assert_eq!(
            parser().parse("accept 12"),
            Ok(Input::Command(Command::AcceptInvite { party_id: 12 }))
        );
        assert_eq!(parser().parse("who bo b"), Ok(Input::Who("bo b".to_string())));
        assert_eq!(parser().parse("quit"), Ok(Input::Quit));
    }
}
