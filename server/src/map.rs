use std::sync::{Mutex, MutexGuard};

use voxelsync_shared::BlockPos;

use crate::error::{GenerationError, HookError};

/// Load state of one resident block, as visible to the dispatch core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStatus {
    /// Data was not found on disk and has not been generated.
    pub not_on_disk: bool,
    /// Data exists and lighting is up to date.
    pub valid: bool,
    /// The block has passed through a generator.
    pub generated: bool,
}

/// Exchange record for one generation run, filled in by
/// [`ServerMap::init_block_make`] and consumed by the generator and
/// [`ServerMap::finish_block_make`].
#[derive(Clone, Debug)]
pub struct BlockMakeData {
    pub blockpos: BlockPos,
    pub blockpos_min: BlockPos,
    pub blockpos_max: BlockPos,
    pub seed: u64,
}

/// Blocks touched while finishing a generation run.
#[derive(Debug, Default)]
pub struct FinishedMake {
    pub modified: Vec<BlockPos>,
}

/// Outcome of one emerge request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EmergeAction {
    FromMemory,
    FromDisk,
    Generated,
    Cancelled,
}

/// Load state summary published to the far map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FarLoadState {
    Generated,
    NotGenerated,
}

/// The voxel map store, content-addressed by block position.
pub trait ServerMap: Send {
    /// Looks a block up without creating it, refreshing its usage timer.
    fn get_block(&mut self, pos: BlockPos) -> Option<BlockStatus>;

    /// Attempts to load a block from disk.
    fn load_block(&mut self, pos: BlockPos) -> Result<Option<BlockStatus>, GenerationError>;

    /// Begins generation for `pos`. Returns `None` when the map cannot start
    /// a generation run there (already in progress, out of bounds).
    fn init_block_make(&mut self, pos: BlockPos) -> Option<BlockMakeData>;

    /// Post-processes a generated chunk (lighting, liquid transforms) and
    /// commits it to the map.
    fn finish_block_make(&mut self, data: BlockMakeData)
        -> Result<FinishedMake, GenerationError>;

    /// Activates a block after generation.
    fn activate_block(&mut self, pos: BlockPos);
}

/// One procedural generator instance. Each emerge worker owns its own.
pub trait BlockGenerator: Send {
    fn make_chunk(&mut self, data: &mut BlockMakeData) -> Result<(), GenerationError>;
}

/// The scripting-layer callback invoked once per generated chunk. Errors are
/// escalated to the async-fatal latch and never unwind into the worker loop.
pub trait GeneratedHook: Send + Sync {
    fn on_generated(&self, min: BlockPos, max: BlockPos, seed: u64) -> Result<(), HookError>;
}

/// Server-side far map. Receives a summary for every emerge outcome, so
/// that even positions that failed to load are reported.
pub trait FarMapSink: Send + Sync {
    fn publish(&self, pos: BlockPos, state: FarLoadState);
}

/// The world mutex.
///
/// Emerge workers and the server thread take it for short critical sections
/// around map access. Holders must never call back into the emerge
/// dispatcher.
pub struct WorldHandle {
    map: Mutex<Box<dyn ServerMap>>,
}

impl WorldHandle {
    pub fn new(map: Box<dyn ServerMap>) -> Self {
        Self {
            map: Mutex::new(map),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn ServerMap>> {
        self.map.lock().unwrap()
    }
}
