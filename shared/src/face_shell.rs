use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use log::trace;

use crate::types::BlockPos;

static CACHE: OnceLock<Mutex<HashMap<i16, Arc<Vec<BlockPos>>>>> = OnceLock::new();

/// Returns the integer lattice points on the surface of the L-infinity ball
/// of radius `d`, i.e. all `p` with `max(|x|,|y|,|z|) = d`.
///
/// `d = 0` yields exactly the origin. The ordering of the points is
/// unspecified but stable across calls: shells are computed once, cached
/// process-wide and shared between all clients, so callers may resume
/// iteration by index.
pub fn face_positions(d: i16) -> Arc<Vec<BlockPos>> {
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap();

    if let Some(shell) = cache.get(&d) {
        return Arc::clone(shell);
    }

    let shell = Arc::new(compute_shell(d));
    trace!("face shell d={} computed, {} positions", d, shell.len());
    cache.insert(d, Arc::clone(&shell));
    shell
}

fn compute_shell(d: i16) -> Vec<BlockPos> {
    if d <= 0 {
        return vec![BlockPos::new(0, 0, 0)];
    }

    let mut positions = Vec::with_capacity(shell_size(d));
    for x in -d..=d {
        for y in -d..=d {
            for z in -d..=d {
                if x.abs().max(y.abs()).max(z.abs()) == d {
                    positions.push(BlockPos::new(x, y, z));
                }
            }
        }
    }
    positions
}

fn shell_size(d: i16) -> usize {
    let outer = 2 * i32::from(d) + 1;
    let inner = 2 * i32::from(d) - 1;
    (outer.pow(3) - inner.pow(3)) as usize
}
