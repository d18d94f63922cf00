//! Integration tests for the party client against a real server
//!
//! Every test starts its own server on an ephemeral port and drives it through
//! `PartyClient` handles, the same way the console client does.

use client::directory::PlayerDirectory;
use client::{ClientConfig, ClientError, EngineView, Notification, PartyClient, ValidationError};
use server::config::ServerConfig;
use server::network::Server;
use shared::{Command, Faction, FactionSet, PartyId};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> SocketAddr {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ServerConfig::new("127.0.0.1:0").with_tick_interval(Duration::from_millis(20));
    let mut server = Server::new(config).await.expect("Failed to bind server");
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

async fn login(server: SocketAddr, name: &str) -> (PartyClient, UnboundedReceiver<Notification>) {
    let config = ClientConfig::new(server.to_string(), name);
    PartyClient::connect(config)
        .await
        .expect("Failed to connect")
}

/// Waits until the published view satisfies `predicate`.
async fn wait_for<F>(client: &PartyClient, predicate: F) -> EngineView
where
    F: Fn(&EngineView) -> bool,
{
    let mut views = client.watch();
    timeout(WAIT, async {
        loop {
            {
                let view = views.borrow_and_update();
                if predicate(&view) {
                    return view.clone();
                }
            }
            views.changed().await.expect("Connection task ended");
        }
    })
    .await
    .expect("Condition not reached in time")
}

/// Waits for the first notification matching `predicate`.
async fn wait_notification<F>(notifications: &mut UnboundedReceiver<Notification>, predicate: F) -> Notification
where
    F: Fn(&Notification) -> bool,
{
    timeout(WAIT, async {
        loop {
            let notification = notifications.recv().await.expect("Notifications closed");
            if predicate(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("Notification not received in time")
}

/// Forms a party of `owner` and `member`. Returns its id.
async fn form_party(owner: &PartyClient, member: &PartyClient) -> PartyId {
    // the invite target needs to know the queue list and its own id first
    wait_for(member, |v| !v.queues.is_empty()).await;
    owner.invite(member.player_id()).await.expect("Invite refused");

    let invited = wait_for(member, |v| !v.incoming_invites.is_empty()).await;
    let party_id = invited.incoming_invites[0].party_id;
    member
        .accept_invite(party_id)
        .await
        .expect("Accept refused");

    let member_id = member.player_id();
    wait_for(owner, |v| v.party.party.contains(member_id)).await;
    wait_for(member, |v| v.party.party.id == party_id).await;
    party_id
}

/// PARTY FORMATION TESTS
mod party_tests {
    use super::*;

    /// Tests the full invite and accept flow between two clients
    #[tokio::test]
    async fn invite_and_accept_forms_party() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, mut bob_events) = login(server, "bob").await;

        let party_id = form_party(&alice, &bob).await;

        let view = wait_for(&alice, |v| v.party.party.len() == 2 && !v.party.is_provisional()).await;
        assert_eq!(view.party.party.id, party_id);
        assert!(view.is_owner());
        assert!(view.outgoing_invites.is_empty());

        let bob_view = bob.snapshot();
        assert!(!bob_view.is_owner());
        assert!(bob_view.incoming_invites.is_empty());
        assert!(bob_view.can_leave());

        wait_notification(&mut bob_events, |n| matches!(n, Notification::InviteReceived(_))).await;
    }

    /// Tests that a faction change is echoed and then confirmed by the server
    #[tokio::test]
    async fn faction_change_confirmed_for_everyone() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, _) = login(server, "bob").await;
        form_party(&alice, &bob).await;

        let only_uef: FactionSet = [Faction::Uef].into_iter().collect();
        bob.set_factions(only_uef.clone()).await.unwrap();

        let bob_id = bob.player_id();
        let seen = wait_for(&alice, |v| {
            v.party
                .party
                .member(bob_id)
                .is_some_and(|m| m.factions == only_uef)
        })
        .await;
        assert!(!seen.party.is_provisional());
        wait_for(&bob, |v| !v.party.is_provisional() && v.pending_commands == 0).await;
    }

    /// Tests that a kicked member falls back to a solo party
    #[tokio::test]
    async fn kicked_member_returns_to_solo() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, _) = login(server, "bob").await;
        form_party(&alice, &bob).await;

        alice
            .submit(Command::KickMember {
                player_id: bob.player_id(),
            })
            .await
            .unwrap();

        let bob_view = wait_for(&bob, |v| !v.party.party.is_assigned()).await;
        assert_eq!(bob_view.party.party.len(), 1);
        wait_for(&alice, |v| v.party.party.len() == 1 && !v.party.is_provisional()).await;
    }

    /// Tests that leaving hands the party to the remaining member
    #[tokio::test]
    async fn owner_leaving_transfers_ownership() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, _) = login(server, "bob").await;
        let party_id = form_party(&alice, &bob).await;

        tokio_test::assert_ok!(alice.submit(Command::LeaveParty).await);

        wait_for(&alice, |v| !v.party.party.is_assigned()).await;
        let bob_view = wait_for(&bob, |v| v.is_owner()).await;
        assert_eq!(bob_view.party.party.id, party_id);
        assert_eq!(bob_view.party.party.len(), 1);
    }

    /// Tests that locally invalid commands never leave the client
    #[tokio::test]
    async fn local_validation_refuses_commands() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, _) = login(server, "bob").await;
        form_party(&alice, &bob).await;

        let result = bob
            .submit(Command::KickMember {
                player_id: alice.player_id(),
            })
            .await;
        assert!(matches!(
            result,
            Err(ClientError::Validation(ValidationError::NotOwner))
        ));

        let result = alice.join_queue(2).await;
        assert!(matches!(
            result,
            Err(ClientError::Validation(ValidationError::NotAllReady))
        ));
        assert_eq!(alice.snapshot().pending_commands, 0);
    }
}

/// MATCHMAKING TESTS
mod queue_tests {
    use super::*;

    async fn ready_and_queue(client: &PartyClient, queue_id: u32) {
        wait_for(client, |v| !v.queues.is_empty()).await;
        client.set_ready(true).await.unwrap();
        wait_for(client, |v| {
            v.party.party.is_assigned() && v.is_self_ready() && !v.party.is_provisional()
        })
        .await;
        client.join_queue(queue_id).await.unwrap();
    }

    /// Tests that two solo players in the 1v1 queue get matched
    #[tokio::test]
    async fn solo_players_get_matched() {
        let server = start_server().await;
        let (alice, mut alice_events) = login(server, "alice").await;
        let (bob, mut bob_events) = login(server, "bob").await;

        ready_and_queue(&alice, 1).await;
        ready_and_queue(&bob, 1).await;

        let found = wait_notification(&mut alice_events, |n| {
            matches!(n, Notification::MatchFound { .. })
        })
        .await;
        let Notification::MatchFound { queue_id, match_id } = found else {
            unreachable!()
        };
        assert_eq!(queue_id, 1);

        match wait_notification(&mut bob_events, |n| matches!(n, Notification::MatchFound { .. })).await {
            Notification::MatchFound {
                match_id: bob_match,
                ..
            } => assert_eq!(bob_match, match_id),
            other => panic!("unexpected {:?}", other),
        }

        wait_for(&alice, |v| v.queued.is_empty()).await;
    }

    /// Tests that an empty faction selection is refused while queued
    #[tokio::test]
    async fn empty_factions_refused_while_queued() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, _) = login(server, "bob").await;
        form_party(&alice, &bob).await;

        bob.set_ready(true).await.unwrap();
        alice.set_ready(true).await.unwrap();
        wait_for(&alice, |v| v.party.party.all_ready() && !v.party.is_provisional()).await;
        alice.join_queue(2).await.unwrap();
        wait_for(&bob, |v| v.is_queued(2)).await;

        let result = bob.set_factions(FactionSet::new()).await;
        assert!(matches!(
            result,
            Err(ClientError::Validation(ValidationError::NoFactionSelected))
        ));

        let view = bob.snapshot();
        assert!(view.is_queued(2));
        assert!(view.party.party.all_ready());
        wait_for(&alice, |v| v.is_queued(2)).await;
    }

    /// Tests that a member unreadying pulls the party out of the queue
    #[tokio::test]
    async fn unready_leaves_queue() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, _) = login(server, "bob").await;
        form_party(&alice, &bob).await;

        bob.set_ready(true).await.unwrap();
        alice.set_ready(true).await.unwrap();
        wait_for(&alice, |v| v.party.party.all_ready() && !v.party.is_provisional()).await;
        alice.join_queue(2).await.unwrap();
        wait_for(&bob, |v| v.is_queued(2)).await;

        bob.set_ready(false).await.unwrap();
        let view = wait_for(&alice, |v| v.queued.is_empty()).await;
        assert!(!view.party.party.all_ready());
    }
}

/// SESSION TESTS
mod session_tests {
    use super::*;

    /// Tests that the directory tracks players going offline
    #[tokio::test]
    async fn logout_updates_directory() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let (bob, _) = login(server, "bob").await;
        let bob_id = bob.player_id();

        let candidates = timeout(WAIT, async {
            loop {
                let candidates = alice.invite_candidates("bo").await.unwrap();
                if !candidates.is_empty() {
                    return candidates;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("Bob never showed up");
        assert_eq!(candidates[0].id, bob_id);

        bob.logout().await.unwrap();

        timeout(WAIT, async {
            loop {
                let roster = alice.players().await.unwrap();
                if roster.lookup(bob_id).is_some_and(|p| !p.online) {
                    break;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("Bob never went offline");
    }

    /// Tests that a player logging back in keeps their id
    #[tokio::test]
    async fn relogin_keeps_player_id() {
        let server = start_server().await;
        let (alice, _) = login(server, "alice").await;
        let first_id = alice.player_id();
        alice.logout().await.unwrap();

        let (alice, _) = login(server, "alice").await;
        assert_eq!(alice.player_id(), first_id);
    }

    /// Tests that connecting to a silent address fails
    #[tokio::test]
    async fn connect_to_nothing_times_out() {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let config =
            ClientConfig::new(addr.to_string(), "alice").with_connect_timeout(Duration::from_millis(300));
        let result = PartyClient::connect(config).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
