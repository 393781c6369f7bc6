use std::thread;

/// Contains config properties used by the dispatch core.
///
/// The embedding server owns parsing and persistence; the core only reads
/// these values. Per-peer emerge limits left at `None` are derived from the
/// worker count the way the original settings did.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Base per-client in-flight cap.
    pub max_simultaneous_block_sends_per_client: u16,
    /// Hard radius upper bound for the near ladder, in blocks.
    pub max_block_send_distance: i16,
    /// Radius inside which generation is permitted, in blocks.
    pub max_block_generate_distance: i16,
    /// Seconds since the last edit before the full send rate resumes.
    pub full_block_send_enable_min_time_from_building: f32,
    /// Emerge worker count; `None` leaves a core for the server thread and
    /// one for miscellaneous threads.
    pub num_emerge_threads: Option<usize>,
    /// Global emerge queue cap.
    pub emergequeue_limit_total: u16,
    /// Per-peer cap for load-only requests; `None` derives from the worker
    /// count.
    pub emergequeue_limit_diskonly: Option<u16>,
    /// Per-peer cap for load-or-generate requests; `None` derives from the
    /// worker count.
    pub emergequeue_limit_generate: Option<u16>,
    /// Verbose logging of generator work.
    pub enable_mapgen_debug_info: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_block_sends_per_client: 10,
            max_block_send_distance: 10,
            max_block_generate_distance: 7,
            full_block_send_enable_min_time_from_building: 2.0,
            num_emerge_threads: None,
            emergequeue_limit_total: 256,
            emergequeue_limit_diskonly: None,
            emergequeue_limit_generate: None,
            enable_mapgen_debug_info: false,
        }
    }
}

impl DispatchConfig {
    /// Effective worker count: configured value, or `cpus - 2`, floor 1.
    pub fn emerge_thread_count(&self) -> usize {
        let threads = self.num_emerge_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get().saturating_sub(2))
                .unwrap_or(1)
        });
        threads.max(1)
    }

    /// Effective queue limits `(total, diskonly, generate)`, each at least 1.
    /// User input is not trusted for something this important.
    pub fn emerge_queue_limits(&self) -> (usize, u16, u16) {
        let threads = self.emerge_thread_count() as u16;
        let total = usize::from(self.emergequeue_limit_total).max(1);
        let diskonly = self
            .emergequeue_limit_diskonly
            .unwrap_or(threads * 5 + 1)
            .max(1);
        let generate = self.emergequeue_limit_generate.unwrap_or(threads + 1).max(1);
        (total, diskonly, generate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_limits_follow_thread_count() {
        let config = DispatchConfig {
            num_emerge_threads: Some(3),
            ..DispatchConfig::default()
        };
        let (total, diskonly, generate) = config.emerge_queue_limits();
        assert_eq!(total, 256);
        assert_eq!(diskonly, 16);
        assert_eq!(generate, 4);
    }

    #[test]
    fn limits_are_clamped_to_one() {
        let config = DispatchConfig {
            num_emerge_threads: Some(1),
            emergequeue_limit_total: 0,
            emergequeue_limit_diskonly: Some(0),
            emergequeue_limit_generate: Some(0),
            ..DispatchConfig::default()
        };
        let (total, diskonly, generate) = config.emerge_queue_limits();
        assert_eq!((total, diskonly, generate), (1, 1, 1));
    }
}
