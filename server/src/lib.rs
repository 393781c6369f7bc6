//! # Voxelsync Server
//! The server-side block dispatch core of a voxel-world multiplayer server:
//! decides, for each connected client on each server tick, which map regions
//! to transmit next, when to request their generation, and how to bound
//! per-client bandwidth and CPU.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod shared {
    pub use voxelsync_shared::{
        face_positions, BlockPos, PeerId, SendTarget, Vec3, BS, CLOSE_LIMIT_RADIUS, FAR_SCALE,
        LIMITED_SIMUL, MAP_BLOCKSIZE, PEER_ID_INEXISTENT,
    };
}

mod autosend;
mod client;
mod config;
mod emerge;
mod env;
mod error;
mod map;
mod registry;

pub use autosend::{Autosend, AutosendParams};
pub use client::{AuthMechanism, ClientEvent, ClientState, RemoteClient, SendBook};
pub use config::DispatchConfig;
pub use emerge::{BlockUpdate, EmergeCallback, EmergeDispatcher, EmergeFlags};
pub use env::{Environment, PlayerView};
pub use error::{AsyncFatal, ClientStateError, GenerationError, HookError};
pub use map::{
    BlockGenerator, BlockMakeData, BlockStatus, EmergeAction, FarLoadState, FarMapSink,
    FinishedMake, GeneratedHook, ServerMap, WorldHandle,
};
pub use registry::{BlockSender, ClientRegistry, PacketSender};
