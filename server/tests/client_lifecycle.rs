mod common;

use common::{standing_player, RecordingPacketSender, TestEnv};
use voxelsync_server::{ClientEvent, ClientRegistry, ClientState, ClientStateError};
use voxelsync_shared::{BlockPos, SendTarget};

#[test]
fn create_is_idempotent() {
    let registry = ClientRegistry::new();
    registry.create_client(2);
    registry.set_player_name(2, "alice".into());

    // A second create for a taken id changes nothing.
    registry.create_client(2);
    assert_eq!(
        registry.with_client(2, |client| client.name().to_string()),
        Some("alice".to_string())
    );
    assert_eq!(registry.get_client_state(2), ClientState::Created);
}

#[test]
fn delete_releases_known_objects() {
    let registry = ClientRegistry::new();
    let env = TestEnv::default();
    registry.create_client(2);
    registry.with_client_mut(2, |client| {
        client.known_objects.insert(5);
        client.known_objects.insert(9);
    });

    registry.delete_client(2, &env);

    let mut released = env.released.lock().unwrap().clone();
    released.sort_unstable();
    assert_eq!(released, vec![5, 9]);
    assert_eq!(registry.get_client_state(2), ClientState::Invalid);

    // Deleting again is a no-op.
    registry.delete_client(2, &env);
    assert_eq!(env.released.lock().unwrap().len(), 2);
}

#[test]
fn events_for_unknown_peers_are_ignored() {
    let registry = ClientRegistry::new();
    let env = TestEnv::default();
    // Clients are removed immediately when access is denied; events arriving
    // later must not fail.
    assert!(registry.event(42, ClientEvent::Disconnect, &env).is_ok());
}

#[test]
fn invalid_transition_is_reported_to_the_caller() {
    let registry = ClientRegistry::new();
    let env = TestEnv::default();
    registry.create_client(2);

    let err = registry
        .event(2, ClientEvent::SetClientReady, &env)
        .unwrap_err();
    assert_eq!(
        err,
        ClientStateError::InvalidTransition {
            state: ClientState::Created,
            event: ClientEvent::SetClientReady,
        }
    );
    // The client is left as it was; tearing it down is the caller's call.
    assert_eq!(registry.get_client_state(2), ClientState::Created);
}

#[test]
fn ready_event_refreshes_the_player_list() {
    let registry = ClientRegistry::new();
    let env = TestEnv::default();
    env.add_player(2, "alice", standing_player());

    registry.create_client(2);
    for event in [
        ClientEvent::Hello,
        ClientEvent::AuthAccept,
        ClientEvent::GotInit2,
        ClientEvent::SetDefinitionsSent,
        ClientEvent::SetClientReady,
    ] {
        registry.event(2, event, &env).unwrap();
    }

    assert_eq!(registry.get_client_state(2), ClientState::Active);
    assert_eq!(registry.player_names(), vec!["alice".to_string()]);

    registry.event(2, ClientEvent::Disconnect, &env).unwrap();
    assert!(registry.player_names().is_empty());
}

#[test]
fn min_state_filter_orders_states() {
    let registry = ClientRegistry::new();
    let env = TestEnv::default();

    registry.create_client(1);
    registry.create_client(2);
    for event in [
        ClientEvent::Hello,
        ClientEvent::AuthAccept,
        ClientEvent::GotInit2,
        ClientEvent::SetDefinitionsSent,
        ClientEvent::SetClientReady,
    ] {
        registry.event(2, event, &env).unwrap();
    }

    let mut all = registry.get_client_ids(ClientState::Created);
    all.sort_unstable();
    assert_eq!(all, vec![1, 2]);
    assert_eq!(registry.get_client_ids(ClientState::Active), vec![2]);

    // Sudo mode still counts as active.
    registry.event(2, ClientEvent::SudoSuccess, &env).unwrap();
    assert_eq!(registry.get_client_ids(ClientState::Active), vec![2]);
}

#[test]
fn broadcast_skips_clients_without_a_protocol_version() {
    let registry = ClientRegistry::new();
    registry.create_client(1);
    registry.create_client(2);
    registry.with_client_mut(2, |client| client.net_proto_version = 30);

    let mut sender = RecordingPacketSender::default();
    registry.broadcast(&mut sender, b"hello");
    assert_eq!(sender.recipients, vec![2]);
    assert_eq!(registry.get_protocol_version(2), 30);
    assert_eq!(registry.get_protocol_version(1), 0);
}

#[test]
fn stale_acknowledgements_count_against_the_peer() {
    let registry = ClientRegistry::new();
    registry.create_client(2);

    let target = SendTarget::Near(BlockPos::new(1, 2, 3));
    registry.got_block(2, target);

    assert_eq!(
        registry.with_client(2, |client| client.excess_got_blocks()),
        Some(1)
    );
}

#[test]
fn version_info_round_trips() {
    let registry = ClientRegistry::new();
    registry.create_client(2);
    registry.set_client_version(2, 1, 4, 2, "1.4.2-dev".into());

    let info = registry
        .with_client(2, |client| {
            let (major, minor, patch, full) = client.version_info();
            (major, minor, patch, full.to_string())
        })
        .unwrap();
    assert_eq!(info, (1, 4, 2, "1.4.2-dev".to_string()));
}
