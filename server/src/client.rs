use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::warn;

use voxelsync_shared::{BlockPos, ObjectId, PeerId, SendTarget, FAR_SCALE};

use crate::autosend::{Autosend, AutosendParams, FAR_RESEND_INTERVAL};
use crate::config::DispatchConfig;
use crate::emerge::{EmergeDispatcher, EmergeFlags};
use crate::env::PlayerView;
use crate::error::ClientStateError;
use crate::map::WorldHandle;

/// Lifecycle state of one connected client.
///
/// Declaration order matters: registry queries filter with comparisons like
/// `state >= ClientState::Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientState {
    Invalid,
    Disconnecting,
    Denied,
    Created,
    AwaitingInit2,
    HelloSent,
    InitDone,
    DefinitionsSent,
    Active,
    SudoMode,
}

/// Events delivered to the client lifecycle state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    Hello,
    InitLegacy,
    AuthAccept,
    GotInit2,
    SetDefinitionsSent,
    SetClientReady,
    SudoSuccess,
    SudoLeave,
    Disconnect,
    SetDenied,
}

/// Authentication mechanism currently holding the credential verifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMechanism {
    #[default]
    None,
    LegacyPassword,
    Srp,
    FirstSrp,
}

/// Per-client send bookkeeping.
///
/// A target never appears in `in_flight` while also being proposed for
/// sending; `dirty` clears the already-sent veto for targets that were
/// modified on the server since their last send.
#[derive(Default)]
pub struct SendBook {
    /// Handed to the framing layer, not yet acknowledged.
    pub in_flight: HashMap<SendTarget, Instant>,
    /// Last successful delivery time per target.
    pub sent: HashMap<SendTarget, Instant>,
    /// Modified on the server since the last send.
    pub dirty: HashSet<SendTarget>,
}

/// One connected peer: lifecycle state, send bookkeeping, the custom send
/// queue and the autosend instance.
pub struct RemoteClient {
    pub peer_id: PeerId,
    pub net_proto_version: u16,
    state: ClientState,
    chosen_mech: AuthMechanism,
    auth_data: Option<Box<dyn Any + Send>>,
    pub book: SendBook,
    send_queue: Vec<SendTarget>,
    autosend: Autosend,
    autosend_configured: bool,
    /// Objects this client knows about; their known-by counts are dropped
    /// on teardown.
    pub known_objects: HashSet<ObjectId>,
    excess_got_blocks: u32,
    time_from_building: f32,
    connection_time: Instant,
    name: String,
    version_major: u8,
    version_minor: u8,
    version_patch: u8,
    version_full: String,
}

impl RemoteClient {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            net_proto_version: 0,
            state: ClientState::Created,
            chosen_mech: AuthMechanism::None,
            auth_data: None,
            book: SendBook::default(),
            send_queue: Vec::new(),
            autosend: Autosend::new(),
            autosend_configured: false,
            known_objects: HashSet::new(),
            excess_got_blocks: 0,
            time_from_building: 9999.0,
            connection_time: Instant::now(),
            name: String::new(),
            version_major: 0,
            version_minor: 0,
            version_patch: 0,
            version_full: String::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Applies one lifecycle event. Unknown `(state, event)` pairs are
    /// programming errors on the caller's side and fail without changing
    /// state; terminal states absorb everything silently.
    pub fn notify_event(&mut self, event: ClientEvent) -> Result<(), ClientStateError> {
        use ClientEvent::*;
        use ClientState::*;

        match self.state {
            // Intentionally do nothing.
            Invalid => Ok(()),
            // Already torn down or denied; absorb.
            Denied | Disconnecting => Ok(()),
            Created => match event {
                Hello => {
                    self.state = HelloSent;
                    Ok(())
                }
                InitLegacy => {
                    self.state = AwaitingInit2;
                    Ok(())
                }
                Disconnect => {
                    self.state = Disconnecting;
                    Ok(())
                }
                SetDenied => {
                    self.state = Denied;
                    Ok(())
                }
                _ => self.reject(event),
            },
            HelloSent => match event {
                AuthAccept => {
                    self.state = AwaitingInit2;
                    self.release_auth();
                    Ok(())
                }
                Disconnect => {
                    self.state = Disconnecting;
                    self.release_auth();
                    Ok(())
                }
                SetDenied => {
                    self.state = Denied;
                    self.release_auth();
                    Ok(())
                }
                _ => self.reject(event),
            },
            AwaitingInit2 => match event {
                GotInit2 => {
                    self.state = InitDone;
                    Ok(())
                }
                Disconnect => {
                    self.state = Disconnecting;
                    Ok(())
                }
                SetDenied => {
                    self.state = Denied;
                    Ok(())
                }
                _ => self.reject(event),
            },
            InitDone => match event {
                SetDefinitionsSent => {
                    self.state = DefinitionsSent;
                    Ok(())
                }
                Disconnect => {
                    self.state = Disconnecting;
                    Ok(())
                }
                SetDenied => {
                    self.state = Denied;
                    Ok(())
                }
                _ => self.reject(event),
            },
            DefinitionsSent => match event {
                SetClientReady => {
                    self.state = Active;
                    Ok(())
                }
                Disconnect => {
                    self.state = Disconnecting;
                    Ok(())
                }
                SetDenied => {
                    self.state = Denied;
                    Ok(())
                }
                _ => self.reject(event),
            },
            Active => match event {
                SudoSuccess => {
                    self.state = SudoMode;
                    self.release_auth();
                    Ok(())
                }
                Disconnect => {
                    self.state = Disconnecting;
                    Ok(())
                }
                SetDenied => {
                    self.state = Denied;
                    Ok(())
                }
                _ => self.reject(event),
            },
            SudoMode => match event {
                SudoLeave => {
                    self.state = Active;
                    Ok(())
                }
                Disconnect => {
                    self.state = Disconnecting;
                    Ok(())
                }
                SetDenied => {
                    self.state = Denied;
                    Ok(())
                }
                _ => self.reject(event),
            },
        }
    }

    fn reject(&self, event: ClientEvent) -> Result<(), ClientStateError> {
        Err(ClientStateError::InvalidTransition {
            state: self.state,
            event,
        })
    }

    /// Stores the credential verifier for an authentication round.
    pub fn set_auth(&mut self, mech: AuthMechanism, data: Box<dyn Any + Send>) {
        self.chosen_mech = mech;
        self.auth_data = Some(data);
    }

    pub fn has_auth_data(&self) -> bool {
        self.auth_data.is_some()
    }

    pub fn chosen_mech(&self) -> AuthMechanism {
        self.chosen_mech
    }

    fn release_auth(&mut self) {
        if self.chosen_mech != AuthMechanism::None {
            self.auth_data = None;
            self.chosen_mech = AuthMechanism::None;
        }
    }

    // Send bookkeeping

    /// Marks a target as handed to the framing layer. Clears the dirty mark:
    /// from this moment the target reflects the current server state.
    pub fn sending(&mut self, target: SendTarget) {
        if self.book.in_flight.contains_key(&target) {
            warn!(
                "client {}: block already in flight: {:?}",
                self.peer_id, target
            );
        }
        self.book.in_flight.insert(target, Instant::now());
        self.book.dirty.remove(&target);
    }

    /// Acknowledgement from the peer. A target not in flight is stale
    /// (diagnostic only).
    pub fn got_block(&mut self, target: SendTarget) {
        if self.book.in_flight.remove(&target).is_some() {
            self.book.sent.insert(target, Instant::now());
        } else {
            self.excess_got_blocks += 1;
        }
    }

    /// Marks a target as modified on the server since its last send. Never
    /// invalidates in-flight state; a target dirtied while on the wire is
    /// simply re-sent later.
    pub fn set_block_updated(&mut self, target: SendTarget) {
        if !target.is_far() {
            self.autosend.reset_search_radius();
        }
        self.book.dirty.insert(target);
    }

    /// Marks a map block and the far block covering it as modified.
    pub fn set_map_block_updated(&mut self, pos: BlockPos) {
        self.set_block_updated(SendTarget::Near(pos));
        self.set_block_updated(SendTarget::Far(pos.container_pos(FAR_SCALE)));
    }

    /// Like [`set_map_block_updated`](Self::set_map_block_updated), for
    /// modifications with a known commit time: copies handed to the wire
    /// after the commit already reflect it and keep their sent status.
    pub fn set_map_block_updated_since(&mut self, pos: BlockPos, modified_at: Instant) {
        let near = SendTarget::Near(pos);
        let far = SendTarget::Far(pos.container_pos(FAR_SCALE));
        if !self.is_current(near, modified_at) {
            self.set_block_updated(near);
        }
        if !self.is_current(far, modified_at) {
            self.set_block_updated(far);
        }
    }

    /// Whether the client's copy of `target` was sent at or after
    /// `modified_at`. A target that was never sent has no copy to be stale.
    fn is_current(&self, target: SendTarget, modified_at: Instant) -> bool {
        let sent_after = |at: &Instant| *at >= modified_at;
        match (
            self.book.sent.get(&target),
            self.book.in_flight.get(&target),
        ) {
            (None, None) => true,
            (sent, in_flight) => {
                sent.map_or(false, sent_after) || in_flight.map_or(false, sent_after)
            }
        }
    }

    pub fn excess_got_blocks(&self) -> u32 {
        self.excess_got_blocks
    }

    // Building throttle

    /// The peer placed or removed a node; send rate drops for a moment.
    pub fn report_building(&mut self) {
        self.time_from_building = 0.0;
    }

    pub fn time_from_building(&self) -> f32 {
        self.time_from_building
    }

    // Autosend and the custom queue

    pub fn set_autosend_parameters(&mut self, params: AutosendParams) {
        self.autosend.set_parameters(params);
        self.autosend_configured = true;
    }

    pub fn autosend(&self) -> &Autosend {
        &self.autosend
    }

    /// Replaces the client-directed send queue.
    pub fn set_send_queue(&mut self, queue: Vec<SendTarget>) {
        self.send_queue = queue;
    }

    /// Advances the autosend cycle with the elapsed tick time.
    pub fn cycle_autosend(
        &mut self,
        dt: f32,
        view: Option<PlayerView>,
        config: &DispatchConfig,
    ) {
        self.time_from_building += dt;
        let in_flight = self.book.in_flight.len();
        self.autosend.cycle(dt, view, in_flight, config);
    }

    /// Proposes the next target to transmit: autosend first, then the
    /// custom queue. Emerges missing data as a side effect. The caller must
    /// mark a returned target as sending before asking again.
    pub fn get_next_block(
        &mut self,
        world: &WorldHandle,
        emerge: &EmergeDispatcher,
        config: &DispatchConfig,
    ) -> Option<SendTarget> {
        // Clients that never configured autosend get settings-driven
        // defaults; such clients do not understand far blocks.
        if !self.autosend_configured {
            self.autosend.set_parameters(AutosendParams {
                radius_map: config.max_block_send_distance,
                radius_far: 0,
                far_weight: 8.0,
                fov: 72.0,
            });
        }

        // Everything autosend proposes outranks custom transfers; a client
        // that wants custom blocks quickly has to disable autosend.
        if let Some(target) = self.autosend.next_target(
            &self.book,
            world,
            emerge,
            self.peer_id,
            self.time_from_building,
        ) {
            return Some(target);
        }

        for index in 0..self.send_queue.len() {
            let target = self.send_queue[index];
            let map_pos = target.map_pos();

            if map_pos.over_limit() {
                continue;
            }
            if self.book.in_flight.contains_key(&target) {
                continue;
            }
            if let Some(sent_at) = self.book.sent.get(&target) {
                if !self.book.dirty.contains(&target) {
                    continue;
                }
                if target.is_far() && sent_at.elapsed() < FAR_RESEND_INTERVAL {
                    continue;
                }
            }

            // Custom requests may generate regardless of distance.
            let status = world.lock().get_block(map_pos);
            let not_on_disk = status.is_some_and(|s| s.not_on_disk);
            let needs_emerge = status.is_some_and(|s| !s.valid || !s.generated);
            if status.is_none() || not_on_disk || needs_emerge {
                // The queue may be full; maybe it is not on the next walk.
                let _ = emerge.enqueue(
                    self.peer_id,
                    map_pos,
                    EmergeFlags {
                        allow_generate: true,
                        force_queue: false,
                    },
                );
                continue;
            }

            return Some(target);
        }

        None
    }

    // Metadata

    pub fn uptime(&self) -> Duration {
        self.connection_time.elapsed()
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_version_info(&mut self, major: u8, minor: u8, patch: u8, full: String) {
        self.version_major = major;
        self.version_minor = minor;
        self.version_patch = patch;
        self.version_full = full;
    }

    pub fn version_info(&self) -> (u8, u8, u8, &str) {
        (
            self.version_major,
            self.version_minor,
            self.version_patch,
            &self.version_full,
        )
    }

    /// One-line status summary for the operator player list.
    pub fn print_info(&self) -> String {
        format!(
            "in_flight={} sent={} dirty={} excess_got_blocks={} autosend={}",
            self.book.in_flight.len(),
            self.book.sent.len(),
            self.book.dirty.len(),
            self.excess_got_blocks,
            self.autosend.describe_status()
        )
    }
}
