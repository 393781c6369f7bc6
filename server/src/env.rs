use voxelsync_shared::{ObjectId, PeerId, Vec3};

/// Snapshot of a player's viewpoint, used to aim the autosend search.
#[derive(Clone, Copy, Debug)]
pub struct PlayerView {
    /// Eye position in world units.
    pub eye_position: Vec3,
    /// Velocity in world units per second.
    pub speed: Vec3,
    /// Camera pitch in degrees.
    pub pitch: f32,
    /// Camera yaw in degrees.
    pub yaw: f32,
}

/// The server environment as seen by the dispatch core.
///
/// Clients and players are not in perfect sync; a missing player is normal
/// and simply disables that client's autosend for the tick.
pub trait Environment {
    fn player_view(&self, peer_id: PeerId) -> Option<PlayerView>;

    fn player_name(&self, peer_id: PeerId) -> Option<String>;

    /// Drops one reference from an active object's known-by count. Called
    /// for every object a client knew when the client is deleted.
    fn release_known_object(&self, id: ObjectId);
}
