use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, info};

use voxelsync_shared::{BlockPos, PeerId, PEER_ID_INEXISTENT};

use crate::config::DispatchConfig;
use crate::error::AsyncFatal;
use crate::map::{
    BlockGenerator, EmergeAction, FarLoadState, FarMapSink, GeneratedHook, WorldHandle,
};

/// Per-request emerge flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmergeFlags {
    /// Inexistent blocks may be made from scratch.
    pub allow_generate: bool,
    /// Bypass the total and per-peer queue limits.
    pub force_queue: bool,
}

/// Completion callback, invoked exactly once per registered callback with
/// the position and the action that resolved it. Runs on a worker thread
/// with no dispatcher or world lock held; callbacks must tolerate the
/// requesting peer being gone.
pub type EmergeCallback = Box<dyn FnOnce(BlockPos, EmergeAction) + Send>;

/// One completed emerge, reported back to the server thread. Workers never
/// touch per-client send bookkeeping; the server thread drains these each
/// tick and applies the dirty marking itself. `completed_at` is taken after
/// the map commit, so copies sent later are known to be current.
#[derive(Debug)]
pub struct BlockUpdate {
    pub pos: BlockPos,
    pub action: EmergeAction,
    pub modified: Vec<BlockPos>,
    pub completed_at: Instant,
}

struct EmergeRequest {
    flags: EmergeFlags,
    peer_requested: PeerId,
    callbacks: Vec<EmergeCallback>,
}

struct QueueState {
    requests: HashMap<BlockPos, EmergeRequest>,
    peer_counts: HashMap<PeerId, u16>,
    worker_queues: Vec<VecDeque<BlockPos>>,
}

struct Shared {
    state: Mutex<QueueState>,
    worker_events: Vec<Condvar>,
    stop: AtomicBool,
    qlimit_total: usize,
    qlimit_diskonly: u16,
    qlimit_generate: u16,
}

/// Bounded multi-producer work queue and worker pool for making map regions
/// present: from memory, from disk, or by generation.
///
/// Each worker owns a FIFO of positions; request metadata is shared so that
/// duplicate requests for one position coalesce into a single worker pop.
pub struct EmergeDispatcher {
    shared: Arc<Shared>,
    world: Arc<WorldHandle>,
    hook: Arc<dyn GeneratedHook>,
    far_sink: Arc<dyn FarMapSink>,
    fatal: AsyncFatal,
    gen_factory: Box<dyn Fn(usize) -> Box<dyn BlockGenerator>>,
    updates_tx: Sender<BlockUpdate>,
    updates_rx: Receiver<BlockUpdate>,
    workers: Vec<JoinHandle<()>>,
    debug_info: bool,
}

impl EmergeDispatcher {
    pub fn new(
        config: &DispatchConfig,
        world: Arc<WorldHandle>,
        gen_factory: Box<dyn Fn(usize) -> Box<dyn BlockGenerator>>,
        hook: Arc<dyn GeneratedHook>,
        far_sink: Arc<dyn FarMapSink>,
        fatal: AsyncFatal,
    ) -> Self {
        let threads = config.emerge_thread_count();
        let (qlimit_total, qlimit_diskonly, qlimit_generate) = config.emerge_queue_limits();
        info!("emerge dispatcher: using {} threads", threads);

        let (updates_tx, updates_rx) = channel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    requests: HashMap::new(),
                    peer_counts: HashMap::new(),
                    worker_queues: (0..threads).map(|_| VecDeque::new()).collect(),
                }),
                worker_events: (0..threads).map(|_| Condvar::new()).collect(),
                stop: AtomicBool::new(false),
                qlimit_total,
                qlimit_diskonly,
                qlimit_generate,
            }),
            world,
            hook,
            far_sink,
            fatal,
            gen_factory,
            updates_tx,
            updates_rx,
            workers: Vec::new(),
            debug_info: config.enable_mapgen_debug_info,
        }
    }

    /// Queues `pos` to be made present. Returns `true` iff accepted; a
    /// rejected request should simply be retried later.
    pub fn enqueue(&self, peer_id: PeerId, pos: BlockPos, flags: EmergeFlags) -> bool {
        self.enqueue_with_callback(peer_id, pos, flags, None)
    }

    /// Like [`enqueue`](Self::enqueue), additionally registering a completion
    /// callback. A request for a position already queued coalesces: the
    /// callback is appended, the flags are OR-ed in, and the original
    /// requesting peer keeps the queue slot.
    pub fn enqueue_with_callback(
        &self,
        peer_id: PeerId,
        pos: BlockPos,
        flags: EmergeFlags,
        callback: Option<EmergeCallback>,
    ) -> bool {
        let worker_index;
        {
            let mut state = self.shared.state.lock().unwrap();

            if !flags.force_queue {
                if state.requests.len() >= self.shared.qlimit_total {
                    return false;
                }
                if peer_id != PEER_ID_INEXISTENT {
                    let limit = if flags.allow_generate {
                        self.shared.qlimit_generate
                    } else {
                        self.shared.qlimit_diskonly
                    };
                    if state.peer_counts.get(&peer_id).copied().unwrap_or(0) >= limit {
                        return false;
                    }
                }
            }

            if let Some(request) = state.requests.get_mut(&pos) {
                if let Some(callback) = callback {
                    request.callbacks.push(callback);
                }
                request.flags.allow_generate |= flags.allow_generate;
                request.flags.force_queue |= flags.force_queue;
                return true;
            }

            state.requests.insert(
                pos,
                EmergeRequest {
                    flags,
                    peer_requested: peer_id,
                    callbacks: callback.into_iter().collect(),
                },
            );
            *state.peer_counts.entry(peer_id).or_insert(0) += 1;

            worker_index = least_loaded(&state.worker_queues);
            state.worker_queues[worker_index].push_back(pos);
        }
        self.shared.worker_events[worker_index].notify_one();

        true
    }

    pub fn start_threads(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        self.shared.stop.store(false, Ordering::SeqCst);

        for id in 0..self.shared.worker_events.len() {
            let worker = Worker {
                id,
                shared: Arc::clone(&self.shared),
                world: Arc::clone(&self.world),
                mapgen: (self.gen_factory)(id),
                hook: Arc::clone(&self.hook),
                far_sink: Arc::clone(&self.far_sink),
                fatal: self.fatal.clone(),
                updates: self.updates_tx.clone(),
                debug_info: self.debug_info,
            };
            let handle = thread::Builder::new()
                .name(format!("emerge-{}", id))
                .spawn(move || worker.run())
                .expect("failed to spawn emerge worker");
            self.workers.push(handle);
        }
    }

    /// Requests stop on all workers, wakes and joins them. Positions still
    /// queued afterwards (including any queued while no worker was running)
    /// complete with `Cancelled`, so no callback is lost.
    pub fn stop_threads(&mut self) {
        {
            let _state = self.shared.state.lock().unwrap();
            self.shared.stop.store(true, Ordering::SeqCst);
        }
        for event in &self.shared.worker_events {
            event.notify_all();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        let drained = {
            let mut state = self.shared.state.lock().unwrap();
            let mut drained = Vec::new();
            for index in 0..state.worker_queues.len() {
                while let Some(pos) = state.worker_queues[index].pop_front() {
                    if let Some(request) = take_request(&mut state, pos) {
                        drained.push((pos, request));
                    }
                }
            }
            drained
        };
        for (pos, request) in drained {
            run_callbacks(pos, EmergeAction::Cancelled, request.callbacks);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Number of positions currently queued.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().unwrap().requests.len()
    }

    /// Number of queued requests attributed to `peer_id`.
    pub fn peer_queue_count(&self, peer_id: PeerId) -> u16 {
        self.shared
            .state
            .lock()
            .unwrap()
            .peer_counts
            .get(&peer_id)
            .copied()
            .unwrap_or(0)
    }

    /// Takes every completion reported by the workers since the last drain.
    pub fn drain_updates(&self) -> Vec<BlockUpdate> {
        self.updates_rx.try_iter().collect()
    }
}

impl Drop for EmergeDispatcher {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

fn least_loaded(worker_queues: &[VecDeque<BlockPos>]) -> usize {
    let mut index = 0;
    let mut lowest = worker_queues[0].len();
    for (i, queue) in worker_queues.iter().enumerate().skip(1) {
        if queue.len() < lowest {
            index = i;
            lowest = queue.len();
        }
    }
    index
}

fn take_request(state: &mut QueueState, pos: BlockPos) -> Option<EmergeRequest> {
    let request = state.requests.remove(&pos)?;
    if let Some(count) = state.peer_counts.get_mut(&request.peer_requested) {
        *count -= 1;
        if *count == 0 {
            state.peer_counts.remove(&request.peer_requested);
        }
    }
    Some(request)
}

fn run_callbacks(pos: BlockPos, action: EmergeAction, callbacks: Vec<EmergeCallback>) {
    for callback in callbacks {
        callback(pos, action);
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    world: Arc<WorldHandle>,
    mapgen: Box<dyn BlockGenerator>,
    hook: Arc<dyn GeneratedHook>,
    far_sink: Arc<dyn FarMapSink>,
    fatal: AsyncFatal,
    updates: Sender<BlockUpdate>,
    debug_info: bool,
}

impl Worker {
    fn run(mut self) {
        debug!("emerge worker {} started", self.id);

        loop {
            let Some((pos, request)) = self.pop_block() else {
                break;
            };

            // Over-limit positions are dropped outright.
            if pos.over_limit() {
                continue;
            }

            if self.process(pos, request).is_err() {
                break;
            }
        }

        self.cancel_pending();
        debug!("emerge worker {} stopped", self.id);
    }

    /// Blocks until this worker's FIFO yields a position or stop is
    /// requested. Returns `None` on stop.
    fn pop_block(&self) -> Option<(BlockPos, EmergeRequest)> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(pos) = state.worker_queues[self.id].pop_front() {
                if let Some(request) = take_request(&mut state, pos) {
                    return Some((pos, request));
                }
                continue;
            }
            state = self.shared.worker_events[self.id].wait(state).unwrap();
        }
    }

    /// Resolves one request. `Err` means a fatal condition was recorded and
    /// this worker must shut down.
    fn process(&mut self, pos: BlockPos, request: EmergeRequest) -> Result<(), ()> {
        let allow_generate = request.flags.allow_generate;
        let mut bmdata_opt = None;

        let action = {
            let mut map = self.world.lock();

            // 1) Attempt to fetch the block from memory.
            let resident = map.get_block(pos);
            if resident.is_some_and(|s| !s.not_on_disk && s.generated) {
                EmergeAction::FromMemory
            } else {
                // 2) Attempt to load the block from disk.
                match map.load_block(pos) {
                    Ok(Some(status)) if status.generated => EmergeAction::FromDisk,
                    Ok(_) => {
                        // 3) Attempt to start generation.
                        if allow_generate {
                            match map.init_block_make(pos) {
                                Some(bmdata) => {
                                    bmdata_opt = Some(bmdata);
                                    EmergeAction::Generated
                                }
                                None => EmergeAction::Cancelled,
                            }
                        } else {
                            EmergeAction::Cancelled
                        }
                    }
                    Err(err) => {
                        drop(map);
                        return self.fail(
                            pos,
                            request,
                            format!("loading block {} failed: {}", pos, err),
                        );
                    }
                }
            }
        };

        let mut modified = Vec::new();
        if let Some(mut bmdata) = bmdata_opt {
            let started = Instant::now();
            if let Err(err) = self.mapgen.make_chunk(&mut bmdata) {
                return self.fail(
                    pos,
                    request,
                    format!("generating chunk at {} failed: {}", pos, err),
                );
            }
            if self.debug_info {
                debug!(
                    "emerge worker {}: made chunk at {} in {:?}",
                    self.id,
                    pos,
                    started.elapsed()
                );
            }

            {
                let mut map = self.world.lock();
                match map.finish_block_make(bmdata.clone()) {
                    Ok(finished) => {
                        // The hook runs under the world mutex; its errors
                        // escalate but the generated block stays usable.
                        if let Err(err) = self.hook.on_generated(
                            bmdata.blockpos_min,
                            bmdata.blockpos_max,
                            bmdata.seed,
                        ) {
                            self.fatal
                                .set(format!("emerge worker {}: {}", self.id, err));
                        }
                        map.activate_block(pos);
                        modified = finished.modified;
                    }
                    Err(err) => {
                        drop(map);
                        return self.fail(
                            pos,
                            request,
                            format!("finishing block {} failed: {}", pos, err),
                        );
                    }
                }
            }
        }

        // Anything sent from this moment on reflects the committed data.
        let completed_at = Instant::now();

        run_callbacks(pos, action, request.callbacks);

        let load_state = if action == EmergeAction::Cancelled {
            FarLoadState::NotGenerated
        } else {
            FarLoadState::Generated
        };
        self.far_sink.publish(pos, load_state);
        for p in &modified {
            if *p != pos {
                self.far_sink.publish(*p, FarLoadState::Generated);
            }
        }

        let _ = self.updates.send(BlockUpdate {
            pos,
            action,
            modified,
            completed_at,
        });
        Ok(())
    }

    fn fail(&self, pos: BlockPos, request: EmergeRequest, message: String) -> Result<(), ()> {
        self.fatal
            .set(format!("emerge worker {}: {}", self.id, message));
        run_callbacks(pos, EmergeAction::Cancelled, request.callbacks);
        self.far_sink.publish(pos, FarLoadState::NotGenerated);
        Err(())
    }

    fn cancel_pending(&self) {
        let drained = {
            let mut state = self.shared.state.lock().unwrap();
            let mut drained = Vec::new();
            while let Some(pos) = state.worker_queues[self.id].pop_front() {
                if let Some(request) = take_request(&mut state, pos) {
                    drained.push((pos, request));
                }
            }
            drained
        };
        for (pos, request) in drained {
            run_callbacks(pos, EmergeAction::Cancelled, request.callbacks);
        }
    }
}
