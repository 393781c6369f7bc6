use std::time::Duration;

use voxelsync_shared::{
    block_bounding_radius, block_center_scaled, face_positions, sphere_in_sight, BlockPos, PeerId,
    SendTarget, Vec3, BS, CLOSE_LIMIT_RADIUS, FAR_SCALE, LIMITED_SIMUL, MAP_BLOCKSIZE,
};

use crate::client::SendBook;
use crate::config::DispatchConfig;
use crate::emerge::{EmergeDispatcher, EmergeFlags};
use crate::env::PlayerView;
use crate::map::WorldHandle;

/// Sight range of the FOV gate, in world units.
const SIGHT_RANGE: f32 = 10_000.0 * BS;

/// Seconds without a send after which the disk has likely been exhausted at
/// short range and a sweep without the FOV limit is started.
const NOTHING_SENT_FOV_DROP_S: f32 = 3.0;

/// Idle pause after a fruitless full sweep.
const NOTHING_TO_SEND_PAUSE_S: f32 = 2.0;

/// Self-heal interval: the resume radius is forced back to zero this often
/// to recover from any bookkeeping drift.
const NEAREST_UNSENT_RESET_S: f32 = 20.0;

/// The far ladder starts from radius zero every this many cycles, to catch
/// far blocks missed due to movement.
const FAR_SWEEP_INTERVAL: u32 = 10;

/// Minimum interval between re-sends of one far block.
pub(crate) const FAR_RESEND_INTERVAL: Duration = Duration::from_secs(5);

/// Parameters a client configures for its own autosend stream.
#[derive(Clone, Copy, Debug)]
pub struct AutosendParams {
    /// Near-ladder radius, in map blocks. Zero disables the near ladder.
    pub radius_map: i16,
    /// Far-ladder radius, in far blocks. Zero disables the far ladder.
    pub radius_far: i16,
    /// How many map blocks of distance one far block is worth; scales the
    /// far ladder's FOV activation distance.
    pub far_weight: f32,
    /// Field of view in degrees. Zero disables FOV limiting.
    pub fov: f32,
}

impl Default for AutosendParams {
    fn default() -> Self {
        Self {
            radius_map: 0,
            radius_far: 0,
            far_weight: 8.0,
            fov: 72.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LadderKind {
    Near,
    Far,
}

/// Per-cycle scan cursor and recheck bookkeeping for one ladder.
#[derive(Clone, Debug)]
struct LadderScan {
    kind: LadderKind,
    enabled: bool,
    /// Lattice coarseness in map blocks.
    scale: i16,
    /// Focus point on this ladder's lattice.
    focus: BlockPos,
    /// Full send radius in lattice units.
    radius: i16,
    /// Radius inside which generation is permitted.
    generate_radius: i16,
    /// Shell radius from which the FOV gate applies.
    fov_activation_d: i16,
    d: i16,
    i: usize,
    /// Last shell scanned this tick; closer shells are cheap and may step
    /// three radii per tick, far shells step one.
    d_max: i16,
    nearest_emergequeued_d: i32,
    nearest_emergefull_d: i32,
    nearest_sendqueued_d: i32,
}

impl LadderScan {
    fn disabled(kind: LadderKind) -> Self {
        Self {
            kind,
            enabled: false,
            scale: 1,
            focus: BlockPos::default(),
            radius: 0,
            generate_radius: 0,
            fov_activation_d: 0,
            d: 0,
            i: 0,
            d_max: -1,
            nearest_emergequeued_d: i32::MAX,
            nearest_emergefull_d: i32::MAX,
            nearest_sendqueued_d: i32::MAX,
        }
    }
}

/// How many shells one tick may advance from `d_start`.
fn bite_end(d_start: i16) -> i16 {
    if d_start < 5 {
        d_start + 2
    } else if d_start < 8 {
        d_start + 1
    } else {
        d_start
    }
}

/// Copy-only context shared by both ladder scans within one call.
#[derive(Clone, Copy)]
struct ScanCtx {
    camera_pos: Vec3,
    camera_dir: Vec3,
    /// Radians; zero disables FOV limiting.
    fov: f32,
    base_simul_sends: u16,
    time_from_building_limit: f32,
    time_from_building: f32,
    peer_id: PeerId,
}

struct Cycle {
    camera_pos: Vec3,
    camera_dir: Vec3,
    fov: f32,
    base_simul_sends: u16,
    time_from_building_limit: f32,
    near: LadderScan,
    far: LadderScan,
}

struct CycleResult {
    nearest_unsent_d: i16,
    searched_full_range: bool,
    recheck_pending: bool,
}

/// The per-client shell-expanding spatial search.
///
/// Runs in two ladders, near (map blocks) and far (far blocks), both
/// expanding L-infinity shells around a focus point ahead of the player's
/// motion. Each server tick advances one cycle: the previous cycle's search
/// is finished (resume points written back, FOV limiting possibly toggled),
/// timers advance, and the next cycle is initialized.
pub struct Autosend {
    params: AutosendParams,
    near_nearest_unsent_d: i16,
    far_nearest_unsent_d: i16,
    last_focus_point: BlockPos,
    fov_limit_enabled: bool,
    nothing_sent_timer: f32,
    nearest_unsent_reset_timer: f32,
    nothing_to_send_pause_timer: f32,
    far_sweep_counter: u32,
    cycle: Option<Cycle>,
}

impl Default for Autosend {
    fn default() -> Self {
        Self::new()
    }
}

impl Autosend {
    pub fn new() -> Self {
        Self {
            params: AutosendParams::default(),
            near_nearest_unsent_d: 0,
            far_nearest_unsent_d: 0,
            last_focus_point: BlockPos::default(),
            fov_limit_enabled: true,
            nothing_sent_timer: 0.0,
            nearest_unsent_reset_timer: 0.0,
            nothing_to_send_pause_timer: 0.0,
            far_sweep_counter: 0,
            cycle: None,
        }
    }

    pub fn set_parameters(&mut self, params: AutosendParams) {
        self.params = params;
    }

    pub fn parameters(&self) -> AutosendParams {
        self.params
    }

    /// Restarts the near search from radius zero. Called when a block is
    /// modified so the change is picked up quickly.
    pub fn reset_search_radius(&mut self) {
        self.near_nearest_unsent_d = 0;
    }

    pub fn fov_limit_enabled(&self) -> bool {
        self.fov_limit_enabled
    }

    /// Whether the idle pause after a fruitless full sweep is active.
    pub fn is_paused(&self) -> bool {
        self.nothing_to_send_pause_timer > 0.0
    }

    pub fn nearest_unsent_d(&self) -> i16 {
        self.near_nearest_unsent_d
    }

    pub fn describe_status(&self) -> String {
        format!(
            "(nearest_unsent_d={} far={} fov_limit={})",
            self.near_nearest_unsent_d, self.far_nearest_unsent_d, self.fov_limit_enabled
        )
    }

    /// Advances one cycle: finishes the previous search, advances timers and
    /// initializes the next search.
    pub fn cycle(
        &mut self,
        dt: f32,
        view: Option<PlayerView>,
        in_flight: usize,
        config: &DispatchConfig,
    ) {
        self.finish_cycle();

        self.nothing_sent_timer += dt;
        self.nearest_unsent_reset_timer += dt;
        self.nothing_to_send_pause_timer -= dt;

        self.init_cycle(view, in_flight, config);
    }

    fn init_cycle(&mut self, view: Option<PlayerView>, in_flight: usize, config: &DispatchConfig) {
        self.cycle = None;

        if self.params.radius_map == 0 && self.params.radius_far == 0 {
            return;
        }
        if self.nothing_to_send_pause_timer > 0.0 {
            return;
        }
        // Clients and players are not in perfect sync; a missing player
        // just disables the cycle.
        let Some(view) = view else {
            return;
        };
        // Won't send anything if already sending.
        if in_flight >= usize::from(config.max_simultaneous_block_sends_per_client) {
            return;
        }

        let camera_pos = view.eye_position;

        // Focus one block ahead along the player's motion.
        let mut speed_dir = Vec3::default();
        if view.speed.length() > 1.0 * BS {
            speed_dir = view.speed.normalized();
        }
        let predicted = camera_pos + speed_dir * (f32::from(MAP_BLOCKSIZE) * BS);
        let focus_point = containing_block(predicted);

        if focus_point != self.last_focus_point {
            self.near_nearest_unsent_d = 0;
            self.far_nearest_unsent_d = 0;
            self.last_focus_point = focus_point;
        }

        let camera_dir = Vec3::from_angles(view.pitch, view.yaw);

        if self.nearest_unsent_reset_timer > NEAREST_UNSENT_RESET_S {
            self.nearest_unsent_reset_timer = 0.0;
            self.near_nearest_unsent_d = 0;
            self.far_nearest_unsent_d = 0;
        }

        let max_send_distance = self.params.radius_map.min(config.max_block_send_distance);
        let fov_activation = if self.fov_limit_enabled {
            max_send_distance / 2
        } else {
            max_send_distance
        };

        let near = if self.params.radius_map > 0 {
            let d_start = self.near_nearest_unsent_d.max(0);
            LadderScan {
                kind: LadderKind::Near,
                enabled: true,
                scale: 1,
                focus: focus_point,
                radius: max_send_distance,
                generate_radius: config.max_block_generate_distance,
                fov_activation_d: fov_activation,
                d: d_start,
                i: 0,
                d_max: bite_end(d_start).min(max_send_distance),
                nearest_emergequeued_d: i32::MAX,
                nearest_emergefull_d: i32::MAX,
                nearest_sendqueued_d: i32::MAX,
            }
        } else {
            LadderScan::disabled(LadderKind::Near)
        };

        let far = if self.params.radius_far > 0 {
            self.far_sweep_counter += 1;
            let mut d_start = self.far_nearest_unsent_d.max(0);
            if self.far_sweep_counter >= FAR_SWEEP_INTERVAL {
                self.far_sweep_counter = 0;
                d_start = 0;
            }
            let far_activation =
                (f32::from(fov_activation) * self.params.far_weight / f32::from(FAR_SCALE)) as i16;
            LadderScan {
                kind: LadderKind::Far,
                enabled: true,
                scale: FAR_SCALE,
                focus: focus_point.container_pos(FAR_SCALE),
                radius: self.params.radius_far,
                generate_radius: config.max_block_generate_distance,
                fov_activation_d: far_activation,
                d: d_start,
                i: 0,
                d_max: bite_end(d_start).min(self.params.radius_far),
                nearest_emergequeued_d: i32::MAX,
                nearest_emergefull_d: i32::MAX,
                nearest_sendqueued_d: i32::MAX,
            }
        } else {
            LadderScan::disabled(LadderKind::Far)
        };

        self.cycle = Some(Cycle {
            camera_pos,
            camera_dir,
            fov: self.params.fov.to_radians(),
            base_simul_sends: config.max_simultaneous_block_sends_per_client,
            time_from_building_limit: config.full_block_send_enable_min_time_from_building,
            near,
            far,
        });
    }

    fn finish_cycle(&mut self) {
        let Some(cycle) = self.cycle.take() else {
            return;
        };

        // The near ladder drives the FOV and idle-pause heuristics.
        if cycle.near.enabled {
            let result = finish_ladder(&cycle.near);
            self.near_nearest_unsent_d = result.nearest_unsent_d;

            if result.recheck_pending {
                // Something was queued whose outcome must be re-checked at
                // this radius. If nothing has been sent in a while, the
                // emerge threads are not finding anything on disk anymore;
                // sweep without the FOV limit.
                if self.fov_limit_enabled
                    && cycle.fov != 0.0
                    && self.nothing_sent_timer >= NOTHING_SENT_FOV_DROP_S
                {
                    self.fov_limit_enabled = false;
                    self.nothing_sent_timer = 0.0;
                }
            } else if result.searched_full_range {
                if cycle.fov != 0.0 && self.fov_limit_enabled {
                    // Do a second pass with FOV limiting disabled.
                    self.fov_limit_enabled = false;
                } else {
                    // Start from the beginning after a short idle delay,
                    // with FOV limiting enabled because nobody knows what
                    // the future holds.
                    self.fov_limit_enabled = true;
                    self.nothing_to_send_pause_timer = NOTHING_TO_SEND_PAUSE_S;
                }
            }
        }

        if cycle.far.enabled {
            self.far_nearest_unsent_d = finish_ladder(&cycle.far).nearest_unsent_d;
        }
    }

    /// Proposes the next target to transmit, or `None` when this cycle has
    /// nothing more to offer. The caller is expected to move a returned
    /// target into the in-flight map before asking again.
    pub fn next_target(
        &mut self,
        book: &SendBook,
        world: &WorldHandle,
        emerge: &EmergeDispatcher,
        peer_id: PeerId,
        time_from_building: f32,
    ) -> Option<SendTarget> {
        let cycle = self.cycle.as_mut()?;

        let ctx = ScanCtx {
            camera_pos: cycle.camera_pos,
            camera_dir: cycle.camera_dir,
            fov: cycle.fov,
            base_simul_sends: cycle.base_simul_sends,
            time_from_building_limit: cycle.time_from_building_limit,
            time_from_building,
            peer_id,
        };

        let selected = scan_ladder(&mut cycle.near, &ctx, book, world, emerge)
            .or_else(|| scan_ladder(&mut cycle.far, &ctx, book, world, emerge));

        if selected.is_some() {
            self.nothing_sent_timer = 0.0;
        }
        selected
    }
}

/// Block containing a world-space position.
fn containing_block(p: Vec3) -> BlockPos {
    let edge = f32::from(MAP_BLOCKSIZE) * BS;
    BlockPos::new(
        (p.x / edge).floor() as i16,
        (p.y / edge).floor() as i16,
        (p.z / edge).floor() as i16,
    )
}

fn finish_ladder(scan: &LadderScan) -> CycleResult {
    // Nothing queued for sending or emerging will necessarily go through,
    // so next time iteration must continue from the closest radius where
    // anything was attempted, to check whether it worked out.
    let closest_recheck = scan
        .nearest_emergequeued_d
        .min(scan.nearest_emergefull_d)
        .min(scan.nearest_sendqueued_d);

    if closest_recheck != i32::MAX {
        CycleResult {
            nearest_unsent_d: closest_recheck as i16,
            searched_full_range: false,
            recheck_pending: true,
        }
    } else if scan.d > scan.radius {
        CycleResult {
            nearest_unsent_d: 0,
            searched_full_range: true,
            recheck_pending: false,
        }
    } else {
        // Absolutely nothing interesting happened; continue from the next
        // radius next time.
        CycleResult {
            nearest_unsent_d: scan.d,
            searched_full_range: false,
            recheck_pending: false,
        }
    }
}

fn scan_ladder(
    scan: &mut LadderScan,
    ctx: &ScanCtx,
    book: &SendBook,
    world: &WorldHandle,
    emerge: &EmergeDispatcher,
) -> Option<SendTarget> {
    if !scan.enabled {
        return None;
    }

    while scan.d <= scan.d_max {
        let face = face_positions(scan.d);
        // Continue from the last index unless it was reset.
        while scan.i < face.len() {
            let p = scan.focus + face[scan.i];
            let target = match scan.kind {
                LadderKind::Near => SendTarget::Near(p),
                LadderKind::Far => SendTarget::Far(p),
            };

            // Limit to a ball radius instead of a cube, because that is how
            // the client limits drawing too.
            let center = block_center_scaled(p, scan.scale);
            let distance = (center - ctx.camera_pos).length();
            let range = f32::from(scan.radius) * f32::from(scan.scale) * f32::from(MAP_BLOCKSIZE) * BS;
            if distance > range {
                scan.i += 1;
                continue;
            }

            // Right after building activity only a couple of blocks may be
            // on the wire at once, except right next to the player.
            let simul_limit = if scan.d <= CLOSE_LIMIT_RADIUS
                || ctx.time_from_building >= ctx.time_from_building_limit
            {
                usize::from(ctx.base_simul_sends)
            } else {
                LIMITED_SIMUL
            };
            if book.in_flight.len() >= simul_limit {
                return None;
            }

            if book.in_flight.contains_key(&target) {
                scan.i += 1;
                continue;
            }

            let map_pos = target.map_pos();
            if map_pos.over_limit() {
                scan.i += 1;
                continue;
            }

            if scan.d >= scan.fov_activation_d
                && !sphere_in_sight(
                    center,
                    block_bounding_radius(scan.scale),
                    ctx.camera_pos,
                    ctx.camera_dir,
                    ctx.fov,
                    SIGHT_RANGE,
                )
            {
                scan.i += 1;
                continue;
            }

            if let Some(sent_at) = book.sent.get(&target) {
                if !book.dirty.contains(&target) {
                    scan.i += 1;
                    continue;
                }
                if target.is_far() && sent_at.elapsed() < FAR_RESEND_INTERVAL {
                    scan.i += 1;
                    continue;
                }
            }

            let allow_generate = scan.d <= scan.generate_radius;
            let status = world.lock().get_block(map_pos);
            let not_on_disk = status.is_some_and(|s| s.not_on_disk);
            let needs_emerge =
                status.is_some_and(|s| !s.valid || (!s.generated && allow_generate));

            // Not on disk and generating not wanted: nothing to do here.
            if !allow_generate && not_on_disk {
                scan.i += 1;
                continue;
            }

            if status.is_none() || not_on_disk || needs_emerge {
                let flags = EmergeFlags {
                    allow_generate,
                    force_queue: false,
                };
                if emerge.enqueue(ctx.peer_id, map_pos, flags) {
                    scan.nearest_emergequeued_d =
                        scan.nearest_emergequeued_d.min(i32::from(scan.d));
                } else {
                    scan.nearest_emergefull_d = scan.nearest_emergefull_d.min(i32::from(scan.d));
                    return None;
                }
                scan.i += 1;
                continue;
            }

            scan.nearest_sendqueued_d = scan.nearest_sendqueued_d.min(i32::from(scan.d));
            return Some(target);
        }

        scan.i = 0;
        scan.d += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bite_is_wider_close_by() {
        assert_eq!(bite_end(0), 2);
        assert_eq!(bite_end(4), 6);
        assert_eq!(bite_end(5), 6);
        assert_eq!(bite_end(7), 8);
        assert_eq!(bite_end(8), 8);
        assert_eq!(bite_end(12), 12);
    }

    #[test]
    fn containing_block_floors() {
        let edge = f32::from(MAP_BLOCKSIZE) * BS;
        assert_eq!(
            containing_block(Vec3::new(0.5 * edge, 1.5 * edge, -0.5 * edge)),
            BlockPos::new(0, 1, -1)
        );
    }

    #[test]
    fn finish_prefers_closest_recheck() {
        let mut scan = LadderScan::disabled(LadderKind::Near);
        scan.enabled = true;
        scan.radius = 10;
        scan.d = 6;
        scan.nearest_emergequeued_d = 4;
        scan.nearest_sendqueued_d = 3;

        let result = finish_ladder(&scan);
        assert_eq!(result.nearest_unsent_d, 3);
        assert!(result.recheck_pending);
        assert!(!result.searched_full_range);
    }

    #[test]
    fn finish_detects_full_pass() {
        let mut scan = LadderScan::disabled(LadderKind::Near);
        scan.enabled = true;
        scan.radius = 5;
        scan.d = 6;

        let result = finish_ladder(&scan);
        assert_eq!(result.nearest_unsent_d, 0);
        assert!(result.searched_full_range);
    }

    #[test]
    fn finish_continues_from_the_stopping_point() {
        let mut scan = LadderScan::disabled(LadderKind::Near);
        scan.enabled = true;
        scan.radius = 10;
        scan.d = 3;

        let result = finish_ladder(&scan);
        assert_eq!(result.nearest_unsent_d, 3);
        assert!(!result.recheck_pending);
        assert!(!result.searched_full_range);
    }
}
