//! # Voxelsync Shared
//! Types shared between the voxelsync server and any client implementation:
//! block coordinates, wire-significant constants, the face-shell cache used
//! by the spatial search, and the send-target type describing one unit of
//! map transmission.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

mod face_shell;
mod math;
mod send_target;
mod types;

pub use face_shell::face_positions;
pub use math::{block_bounding_radius, block_center, block_center_scaled, sphere_in_sight, Vec3};
pub use send_target::SendTarget;
pub use types::{
    BlockPos, ObjectId, PeerId, BLOCK_MAX_RADIUS_FACTOR, BS, CLOSE_LIMIT_RADIUS, FAR_SCALE,
    LIMITED_SIMUL, MAP_BLOCKSIZE, MAP_GENERATION_LIMIT, PEER_ID_INEXISTENT,
};
