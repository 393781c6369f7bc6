#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};

use voxelsync_server::{
    AsyncFatal, BlockGenerator, BlockMakeData, BlockSender, BlockStatus, DispatchConfig,
    EmergeAction, EmergeCallback, EmergeDispatcher, Environment, FarLoadState, FarMapSink,
    FinishedMake, GeneratedHook, HookError, PlayerView, ServerMap, WorldHandle,
};
use voxelsync_server::{GenerationError, PacketSender};
use voxelsync_shared::{BlockPos, ObjectId, PeerId, SendTarget, Vec3};

/// Status of a block that is present, lit and generated.
pub fn ready_status() -> BlockStatus {
    BlockStatus {
        not_on_disk: false,
        valid: true,
        generated: true,
    }
}

#[derive(Default)]
struct MapInner {
    blocks: HashMap<BlockPos, BlockStatus>,
    disk: HashMap<BlockPos, BlockStatus>,
    fail_load: Vec<BlockPos>,
    deny_generate: bool,
    activated: Vec<BlockPos>,
}

/// Handle to the test map's state, shared with the `ServerMap` given to the
/// world handle so tests can seed and inspect it.
#[derive(Clone, Default)]
pub struct MapState(Arc<Mutex<MapInner>>);

impl MapState {
    pub fn put_block(&self, pos: BlockPos, status: BlockStatus) {
        self.0.lock().unwrap().blocks.insert(pos, status);
    }

    pub fn put_on_disk(&self, pos: BlockPos, status: BlockStatus) {
        self.0.lock().unwrap().disk.insert(pos, status);
    }

    pub fn fail_load_at(&self, pos: BlockPos) {
        self.0.lock().unwrap().fail_load.push(pos);
    }

    pub fn deny_generate(&self) {
        self.0.lock().unwrap().deny_generate = true;
    }

    pub fn block(&self, pos: BlockPos) -> Option<BlockStatus> {
        self.0.lock().unwrap().blocks.get(&pos).copied()
    }

    pub fn is_generated(&self, pos: BlockPos) -> bool {
        self.block(pos).map(|s| s.generated).unwrap_or(false)
    }

    pub fn activated(&self) -> Vec<BlockPos> {
        self.0.lock().unwrap().activated.clone()
    }
}

/// In-memory `ServerMap`: generation succeeds instantly unless denied.
pub struct TestMap {
    state: MapState,
}

impl ServerMap for TestMap {
    fn get_block(&mut self, pos: BlockPos) -> Option<BlockStatus> {
        self.state.0.lock().unwrap().blocks.get(&pos).copied()
    }

    fn load_block(&mut self, pos: BlockPos) -> Result<Option<BlockStatus>, GenerationError> {
        let mut inner = self.state.0.lock().unwrap();
        if inner.fail_load.contains(&pos) {
            return Err(GenerationError::InvalidData(format!(
                "corrupt block at {}",
                pos
            )));
        }
        if let Some(status) = inner.disk.get(&pos).copied() {
            inner.blocks.insert(pos, status);
            return Ok(Some(status));
        }
        Ok(None)
    }

    fn init_block_make(&mut self, pos: BlockPos) -> Option<BlockMakeData> {
        if self.state.0.lock().unwrap().deny_generate {
            return None;
        }
        Some(BlockMakeData {
            blockpos: pos,
            blockpos_min: pos,
            blockpos_max: pos,
            seed: 42,
        })
    }

    fn finish_block_make(
        &mut self,
        data: BlockMakeData,
    ) -> Result<FinishedMake, GenerationError> {
        let mut inner = self.state.0.lock().unwrap();
        inner.blocks.insert(data.blockpos, ready_status());
        Ok(FinishedMake {
            modified: vec![data.blockpos],
        })
    }

    fn activate_block(&mut self, pos: BlockPos) {
        self.state.0.lock().unwrap().activated.push(pos);
    }
}

/// Generator that always succeeds (or always fails when poisoned).
#[derive(Clone, Default)]
pub struct TestGenerator {
    pub fail: bool,
}

impl BlockGenerator for TestGenerator {
    fn make_chunk(&mut self, _data: &mut BlockMakeData) -> Result<(), GenerationError> {
        if self.fail {
            Err(GenerationError::Failed("test generator poisoned".into()))
        } else {
            Ok(())
        }
    }
}

/// Hook recording every invocation; optionally failing.
#[derive(Clone, Default)]
pub struct RecordingHook {
    pub calls: Arc<Mutex<Vec<(BlockPos, BlockPos, u64)>>>,
    pub fail: bool,
}

impl GeneratedHook for RecordingHook {
    fn on_generated(&self, min: BlockPos, max: BlockPos, seed: u64) -> Result<(), HookError> {
        self.calls.lock().unwrap().push((min, max, seed));
        if self.fail {
            Err(HookError("test hook failure".into()))
        } else {
            Ok(())
        }
    }
}

/// Far-map sink recording every published summary.
#[derive(Clone, Default)]
pub struct RecordingFarSink {
    pub published: Arc<Mutex<Vec<(BlockPos, FarLoadState)>>>,
}

impl FarMapSink for RecordingFarSink {
    fn publish(&self, pos: BlockPos, state: FarLoadState) {
        self.published.lock().unwrap().push((pos, state));
    }
}

impl RecordingFarSink {
    pub fn published_for(&self, pos: BlockPos) -> Vec<FarLoadState> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == pos)
            .map(|(_, s)| *s)
            .collect()
    }
}

/// Environment stub with a mutable player table.
#[derive(Default)]
pub struct TestEnv {
    pub players: Mutex<HashMap<PeerId, PlayerView>>,
    pub names: Mutex<HashMap<PeerId, String>>,
    pub released: Mutex<Vec<ObjectId>>,
}

impl TestEnv {
    pub fn add_player(&self, peer_id: PeerId, name: &str, view: PlayerView) {
        self.players.lock().unwrap().insert(peer_id, view);
        self.names.lock().unwrap().insert(peer_id, name.to_string());
    }
}

impl Environment for TestEnv {
    fn player_view(&self, peer_id: PeerId) -> Option<PlayerView> {
        self.players.lock().unwrap().get(&peer_id).copied()
    }

    fn player_name(&self, peer_id: PeerId) -> Option<String> {
        self.names.lock().unwrap().get(&peer_id).cloned()
    }

    fn release_known_object(&self, id: ObjectId) {
        self.released.lock().unwrap().push(id);
    }
}

/// Player standing still at the world origin, looking along +Z.
pub fn standing_player() -> PlayerView {
    PlayerView {
        eye_position: Vec3::new(0.0, 0.0, 0.0),
        speed: Vec3::default(),
        pitch: 0.0,
        yaw: 0.0,
    }
}

/// Framing sink collecting every handed-off target.
#[derive(Default)]
pub struct RecordingBlockSender {
    pub targets: Vec<(PeerId, SendTarget)>,
}

impl BlockSender for RecordingBlockSender {
    fn send_block(&mut self, peer_id: PeerId, target: SendTarget) {
        self.targets.push((peer_id, target));
    }
}

impl RecordingBlockSender {
    pub fn drain(&mut self) -> Vec<(PeerId, SendTarget)> {
        std::mem::take(&mut self.targets)
    }
}

/// Transport stub collecting broadcast recipients.
#[derive(Default)]
pub struct RecordingPacketSender {
    pub recipients: Vec<PeerId>,
}

impl PacketSender for RecordingPacketSender {
    fn send(&mut self, peer_id: PeerId, _payload: &[u8]) {
        self.recipients.push(peer_id);
    }
}

/// Everything a dispatch test needs, wired together.
pub struct Rig {
    pub config: DispatchConfig,
    pub world: Arc<WorldHandle>,
    pub map: MapState,
    pub emerge: EmergeDispatcher,
    pub far: RecordingFarSink,
    pub hook: RecordingHook,
    pub fatal: AsyncFatal,
}

pub fn rig(config: DispatchConfig) -> Rig {
    rig_with(config, TestGenerator::default(), RecordingHook::default())
}

pub fn rig_with(config: DispatchConfig, generator: TestGenerator, hook: RecordingHook) -> Rig {
    let map = MapState::default();
    let world = Arc::new(WorldHandle::new(Box::new(TestMap { state: map.clone() })));
    let far = RecordingFarSink::default();
    let fatal = AsyncFatal::new();

    let emerge = EmergeDispatcher::new(
        &config,
        Arc::clone(&world),
        Box::new(move |_id| Box::new(generator.clone())),
        Arc::new(hook.clone()),
        Arc::new(far.clone()),
        fatal.clone(),
    );

    Rig {
        config,
        world,
        map,
        emerge,
        far,
        hook,
        fatal,
    }
}

/// Completion callback paired with the receiver observing it.
pub fn completion_callback() -> (EmergeCallback, Receiver<(BlockPos, EmergeAction)>) {
    let (tx, rx) = channel();
    let callback: EmergeCallback = Box::new(move |pos, action| {
        let _ = tx.send((pos, action));
    });
    (callback, rx)
}
