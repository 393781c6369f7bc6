use std::ops::{Add, Mul, Sub};

use crate::types::{BlockPos, BLOCK_MAX_RADIUS_FACTOR, BS, MAP_BLOCKSIZE};

/// World-space float vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Unit vector in this direction, or zero when the length is zero.
    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len == 0.0 {
            Vec3::default()
        } else {
            self * (1.0 / len)
        }
    }

    /// Rotates around the X axis by `degrees` (pitch).
    pub fn rotate_yz_by(self, degrees: f32) -> Vec3 {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Vec3 {
            x: self.x,
            y: self.y * cos - self.z * sin,
            z: self.y * sin + self.z * cos,
        }
    }

    /// Rotates around the Y axis by `degrees` (yaw).
    pub fn rotate_xz_by(self, degrees: f32) -> Vec3 {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Vec3 {
            x: self.x * cos - self.z * sin,
            y: self.y,
            z: self.x * sin + self.z * cos,
        }
    }

    /// View direction for a camera with the given pitch and yaw, in degrees.
    /// Zero pitch and yaw looks along +Z.
    pub fn from_angles(pitch: f32, yaw: f32) -> Vec3 {
        Vec3::new(0.0, 0.0, 1.0)
            .rotate_yz_by(pitch)
            .rotate_xz_by(yaw)
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, scalar: f32) -> Vec3 {
        Vec3::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

/// World-space center of the block at `pos` on a lattice `scale` map blocks
/// coarse (`scale = 1` for map blocks, `FAR_SCALE` for far blocks).
pub fn block_center_scaled(pos: BlockPos, scale: i16) -> Vec3 {
    let edge = f32::from(scale) * f32::from(MAP_BLOCKSIZE) * BS;
    Vec3 {
        x: f32::from(pos.x) * edge + edge / 2.0,
        y: f32::from(pos.y) * edge + edge / 2.0,
        z: f32::from(pos.z) * edge + edge / 2.0,
    }
}

/// World-space center of the map block at `pos`.
pub fn block_center(pos: BlockPos) -> Vec3 {
    block_center_scaled(pos, 1)
}

/// Bounding-sphere radius of a block on a lattice `scale` map blocks coarse.
pub fn block_bounding_radius(scale: i16) -> f32 {
    BLOCK_MAX_RADIUS_FACTOR * f32::from(scale) * f32::from(MAP_BLOCKSIZE) * BS
}

/// Whether a sphere is inside the camera's view cone.
///
/// The cone has a half-angle of `fov / 2` radians around `camera_dir`,
/// widened by the angle the sphere subtends so that partially-visible blocks
/// pass. A sphere touching the camera is always visible, a sphere beyond
/// `range` never is. `fov = 0` disables culling entirely.
pub fn sphere_in_sight(
    center: Vec3,
    sphere_radius: f32,
    camera_pos: Vec3,
    camera_dir: Vec3,
    fov: f32,
    range: f32,
) -> bool {
    let relative = center - camera_pos;
    let distance = relative.length();

    if distance > range {
        return false;
    }
    if fov == 0.0 || distance <= sphere_radius {
        return true;
    }

    let cos_angle = (relative.dot(camera_dir) / distance).clamp(-1.0, 1.0);
    let angle = cos_angle.acos();
    let subtended = (sphere_radius / distance).clamp(-1.0, 1.0).asin();

    angle <= fov / 2.0 + subtended
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    #[test]
    fn from_angles_axes() {
        let forward = Vec3::from_angles(0.0, 0.0);
        assert_close(forward.z, 1.0);

        let yawed = Vec3::from_angles(0.0, 90.0);
        assert_close(yawed.x, -1.0);
        assert_close(yawed.z, 0.0);

        let pitched = Vec3::from_angles(90.0, 0.0);
        assert_close(pitched.y, -1.0);
        assert_close(pitched.z, 0.0);
    }

    #[test]
    fn block_center_scales() {
        let near = block_center(BlockPos::new(0, 0, 0));
        assert_close(near.x, 8.0 * BS);

        let far = block_center_scaled(BlockPos::new(0, 0, 0), 8);
        assert_close(far.x, 64.0 * BS);
    }

    #[test]
    fn sight_cone_accepts_forward_rejects_behind() {
        let camera = Vec3::default();
        let dir = Vec3::new(0.0, 0.0, 1.0);
        let fov = 72.0_f32.to_radians();
        let radius = block_bounding_radius(1);

        let ahead = Vec3::new(0.0, 0.0, 1000.0);
        assert!(sphere_in_sight(ahead, radius, camera, dir, fov, 1.0e5));

        let behind = Vec3::new(0.0, 0.0, -1000.0);
        assert!(!sphere_in_sight(behind, radius, camera, dir, fov, 1.0e5));

        let out_of_range = Vec3::new(0.0, 0.0, 1000.0);
        assert!(!sphere_in_sight(out_of_range, radius, camera, dir, fov, 500.0));
    }

    #[test]
    fn zero_fov_never_culls() {
        let camera = Vec3::default();
        let dir = Vec3::new(0.0, 0.0, 1.0);
        let behind = Vec3::new(0.0, 0.0, -1000.0);
        assert!(sphere_in_sight(behind, 1.0, camera, dir, 0.0, 1.0e5));
    }
}
