use std::collections::HashMap;
use std::sync::Mutex;

use log::info;

use voxelsync_shared::{BlockPos, PeerId, SendTarget};

use crate::client::{ClientEvent, ClientState, RemoteClient};
use crate::config::DispatchConfig;
use crate::emerge::EmergeDispatcher;
use crate::env::Environment;
use crate::error::ClientStateError;
use crate::map::WorldHandle;

/// Seconds between operator player-list reports.
const PRINT_INTERVAL_S: f32 = 30.0;

/// Receives selected targets for wire framing. Implementations must not
/// call back into the registry.
pub trait BlockSender {
    fn send_block(&mut self, peer_id: PeerId, target: SendTarget);
}

/// Receives pre-framed payloads for transport.
pub trait PacketSender {
    fn send(&mut self, peer_id: PeerId, payload: &[u8]);
}

/// Owns every [`RemoteClient`] and dispatches lifecycle events, broadcasts
/// and the per-tick send loop to them.
pub struct ClientRegistry {
    clients: Mutex<HashMap<PeerId, RemoteClient>>,
    player_names: Mutex<Vec<String>>,
    print_info_timer: f32,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            player_names: Mutex::new(Vec::new()),
            print_info_timer: 0.0,
        }
    }

    /// Creates a client for `peer_id`. A taken id is left untouched; the
    /// call is idempotent.
    pub fn create_client(&self, peer_id: PeerId) {
        let mut clients = self.clients.lock().unwrap();
        clients
            .entry(peer_id)
            .or_insert_with(|| RemoteClient::new(peer_id));
    }

    /// Removes a client, dropping the known-by count of every object it
    /// knew. Missing ids are ignored; clients are removed immediately when
    /// access is denied and later events are normal.
    pub fn delete_client(&self, peer_id: PeerId, env: &dyn Environment) {
        let removed = self.clients.lock().unwrap().remove(&peer_id);
        if let Some(client) = removed {
            for object_id in &client.known_objects {
                env.release_known_object(*object_id);
            }
        }
    }

    /// Dispatches a lifecycle event to a client's state machine. An
    /// `InvalidTransition` instructs the caller to tear the connection
    /// down. Ready/disconnect/denied events refresh the player list outside
    /// the clients lock.
    pub fn event(
        &self,
        peer_id: PeerId,
        event: ClientEvent,
        env: &dyn Environment,
    ) -> Result<(), ClientStateError> {
        {
            let mut clients = self.clients.lock().unwrap();
            let Some(client) = clients.get_mut(&peer_id) else {
                return Ok(());
            };
            client.notify_event(event)?;
        }

        if matches!(
            event,
            ClientEvent::SetClientReady | ClientEvent::Disconnect | ClientEvent::SetDenied
        ) {
            self.update_player_list(env);
        }
        Ok(())
    }

    /// Ids of all clients at or above `min_state`.
    pub fn get_client_ids(&self, min_state: ClientState) -> Vec<PeerId> {
        let clients = self.clients.lock().unwrap();
        clients
            .values()
            .filter(|client| client.state() >= min_state)
            .map(|client| client.peer_id)
            .collect()
    }

    pub fn get_client_state(&self, peer_id: PeerId) -> ClientState {
        let clients = self.clients.lock().unwrap();
        clients
            .get(&peer_id)
            .map(|client| client.state())
            .unwrap_or(ClientState::Invalid)
    }

    pub fn get_protocol_version(&self, peer_id: PeerId) -> u16 {
        self.with_client(peer_id, |client| client.net_proto_version)
            .unwrap_or(0)
    }

    pub fn set_client_version(
        &self,
        peer_id: PeerId,
        major: u8,
        minor: u8,
        patch: u8,
        full: String,
    ) {
        self.with_client_mut(peer_id, |client| {
            client.set_version_info(major, minor, patch, full)
        });
    }

    pub fn set_player_name(&self, peer_id: PeerId, name: String) {
        self.with_client_mut(peer_id, |client| client.set_name(name));
    }

    /// Runs `f` against the client for `peer_id`, under the clients lock.
    pub fn with_client<R>(&self, peer_id: PeerId, f: impl FnOnce(&RemoteClient) -> R) -> Option<R> {
        let clients = self.clients.lock().unwrap();
        clients.get(&peer_id).map(f)
    }

    /// Mutable variant of [`with_client`](Self::with_client).
    pub fn with_client_mut<R>(
        &self,
        peer_id: PeerId,
        f: impl FnOnce(&mut RemoteClient) -> R,
    ) -> Option<R> {
        let mut clients = self.clients.lock().unwrap();
        clients.get_mut(&peer_id).map(f)
    }

    /// Acknowledgement from a peer for one target.
    pub fn got_block(&self, peer_id: PeerId, target: SendTarget) {
        self.with_client_mut(peer_id, |client| client.got_block(target));
    }

    /// Marks modified blocks dirty for every client, so changed regions are
    /// re-sent.
    pub fn set_blocks_updated(&self, positions: &[BlockPos]) {
        let mut clients = self.clients.lock().unwrap();
        for client in clients.values_mut() {
            for pos in positions {
                client.set_map_block_updated(*pos);
            }
        }
    }

    /// Variant for modifications with a known commit time; clients whose
    /// copies postdate the commit are left alone.
    pub fn set_blocks_updated_since(&self, positions: &[BlockPos], modified_at: std::time::Instant) {
        let mut clients = self.clients.lock().unwrap();
        for client in clients.values_mut() {
            for pos in positions {
                client.set_map_block_updated_since(*pos, modified_at);
            }
        }
    }

    /// Hands `payload` to every connection whose protocol version is known.
    pub fn broadcast(&self, sender: &mut dyn PacketSender, payload: &[u8]) {
        let clients = self.clients.lock().unwrap();
        for client in clients.values() {
            if client.net_proto_version != 0 {
                sender.send(client.peer_id, payload);
            }
        }
    }

    pub fn player_names(&self) -> Vec<String> {
        self.player_names.lock().unwrap().clone()
    }

    /// Periodic upkeep: reports the player list every 30 seconds.
    pub fn step(&mut self, dt: f32, env: &dyn Environment) {
        self.print_info_timer += dt;
        if self.print_info_timer >= PRINT_INTERVAL_S {
            self.print_info_timer = 0.0;
            self.update_player_list(env);
        }
    }

    fn update_player_list(&self, env: &dyn Environment) {
        let ids = self.get_client_ids(ClientState::Active);
        let mut names = Vec::new();

        if !ids.is_empty() {
            info!("Players:");
        }
        for peer_id in ids {
            let Some(name) = env.player_name(peer_id) else {
                continue;
            };
            self.with_client(peer_id, |client| {
                info!("* {} {}", name, client.print_info());
            });
            names.push(name);
        }

        *self.player_names.lock().unwrap() = names;
    }

    /// One server tick: routes completed emerges into dirty marking, then
    /// for each active client advances the autosend cycle and drains its
    /// proposals into the framing sink, marking each in flight first.
    pub fn tick(
        &self,
        dt: f32,
        env: &dyn Environment,
        world: &WorldHandle,
        emerge: &EmergeDispatcher,
        config: &DispatchConfig,
        sink: &mut dyn BlockSender,
    ) {
        for update in emerge.drain_updates() {
            if !update.modified.is_empty() {
                self.set_blocks_updated_since(&update.modified, update.completed_at);
            }
        }

        for peer_id in self.get_client_ids(ClientState::Active) {
            // The clients lock is released between per-client cycles.
            let selected = {
                let mut clients = self.clients.lock().unwrap();
                let Some(client) = clients.get_mut(&peer_id) else {
                    continue;
                };

                let view = env.player_view(peer_id);
                client.cycle_autosend(dt, view, config);

                let mut selected = Vec::new();
                while let Some(target) = client.get_next_block(world, emerge, config) {
                    client.sending(target);
                    selected.push(target);
                }
                selected
            };

            for target in selected {
                sink.send_block(peer_id, target);
            }
        }
    }
}
