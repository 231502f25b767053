//! Per-texture replacement state machine.
//!
//! The owner thread attaches a descriptor, then polls [`ReplacedTexture::is_ready`]
//! with a time budget. The first poll submits a decode task; later polls pick
//! up its result. State lives behind a mutex shared with the decode task, and
//! the task writes its terminal state only after the decoded levels are
//! committed.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use texreplace_formats::{AlphaStatus, BasisTranscoder, DataFormat};
use web_time::Instant;

use super::copy::copy_level_to;
use super::descriptor::ReplacementDesc;
use super::level_cache::ReplacedLevelsCache;
use super::loader::load_levels;
use crate::config::ReplacerConfig;
use crate::constants::DEFAULT_PARALLEL_COPY_MIN_BYTES;
use crate::error::Result;
use crate::task::{budget_to_timeout, spawn_task, DecoderPool, TaskExecutor, TaskHandle};
use crate::vfs::{FileReference, VfsBackend};

/// Load progress of one replacement texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementState {
    /// No descriptor attached yet
    #[default]
    Uninitialized,
    /// Descriptor attached, nothing decoded
    Populated,
    /// Decode task submitted
    Pending,
    /// Confirmed that no replacement exists
    NotFound,
    /// Levels decoded and available
    Active,
    /// Teardown requested; the decode task stops early
    CancelInit,
}

impl ReplacementState {
    /// Whether [`ReplacedTexture::is_ready`] can report ready in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReplacementState::Active | ReplacementState::NotFound)
    }
}

impl fmt::Display for ReplacementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplacementState::Uninitialized => "UNINITIALIZED",
            ReplacementState::Populated => "PREPARED",
            ReplacementState::Pending => "PENDING",
            ReplacementState::NotFound => "NOT_FOUND",
            ReplacementState::Active => "ACTIVE",
            ReplacementState::CancelInit => "CANCEL_INIT",
        };
        f.write_str(name)
    }
}

/// Size of one decoded mip level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacedTextureLevel {
    pub w: u32,
    pub h: u32,
    /// File the level came from; only the first level of a file keeps it
    pub file_ref: Option<FileReference>,
}

impl ReplacedTextureLevel {
    pub fn new(w: u32, h: u32) -> Self {
        Self {
            w,
            h,
            file_ref: None,
        }
    }
}

/// Collaborators every texture needs.
#[derive(Clone)]
pub struct ReplacerContext {
    pub vfs: Arc<dyn VfsBackend>,
    pub executor: Arc<dyn TaskExecutor>,
    /// Needed for KTX2 files; without it they fail to load. Defaults to
    /// libktx when the library is installed.
    pub transcoder: Option<Arc<dyn BasisTranscoder>>,
    pub parallel_copy_min_bytes: usize,
}

impl ReplacerContext {
    pub fn new(vfs: Arc<dyn VfsBackend>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            vfs,
            executor,
            transcoder: texreplace_formats::default_transcoder(),
            parallel_copy_min_bytes: DEFAULT_PARALLEL_COPY_MIN_BYTES,
        }
    }

    /// Spawn a decoder pool sized by `config`.
    pub fn from_config(vfs: Arc<dyn VfsBackend>, config: &ReplacerConfig) -> Result<Self> {
        let pool = DecoderPool::spawn(config.worker_threads)?;
        let mut ctx = Self::new(vfs, Arc::new(pool));
        ctx.parallel_copy_min_bytes = config.parallel_copy_min_bytes;
        Ok(ctx)
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn BasisTranscoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }
}

impl fmt::Debug for ReplacerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplacerContext")
            .field("vfs", &self.vfs.describe())
            .field("transcoder", &self.transcoder.is_some())
            .field("parallel_copy_min_bytes", &self.parallel_copy_min_bytes)
            .finish()
    }
}

/// Fields written by the decode task and read by the owner.
#[derive(Debug, Default)]
struct TextureData {
    desc: Option<ReplacementDesc>,
    cache: Option<Arc<ReplacedLevelsCache>>,
    cache_generation: u64,
    levels: Vec<ReplacedTextureLevel>,
    fmt: DataFormat,
    alpha: AlphaStatus,
    log_id: String,
}

/// The part of a texture the decode task can reach.
#[derive(Debug, Default)]
struct TextureShared {
    state: Mutex<ReplacementState>,
    data: Mutex<TextureData>,
}

impl TextureShared {
    fn state(&self) -> ReplacementState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ReplacementState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn data(&self) -> MutexGuard<'_, TextureData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode task body.
    fn prepare(&self, vfs: &dyn VfsBackend, transcoder: Option<&dyn BasisTranscoder>) {
        let Some(desc) = self.data().desc.clone() else {
            log::warn!("Replacement decode started without a descriptor");
            self.finish(ReplacementState::NotFound);
            return;
        };

        let cache = Arc::clone(&desc.cache);
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut cache_data = cache.lock();
            let outcome = load_levels(vfs, transcoder, &desc, &mut cache_data, &|| {
                self.state() == ReplacementState::CancelInit
            });
            (outcome, cache.generation())
        }));
        let (outcome, generation) = match decoded {
            Ok(decoded) => decoded,
            Err(_) => {
                log::error!("{}: decoder panicked, no replacement", desc.log_id);
                cache.discard();
                let old_levels = std::mem::take(&mut self.data().levels);
                release_levels(vfs, old_levels);
                self.finish(ReplacementState::NotFound);
                return;
            }
        };
        cache.touch(Instant::now());

        let found = !outcome.levels.is_empty();
        let old_levels = {
            let mut data = self.data();
            data.fmt = outcome.fmt;
            data.alpha = outcome.alpha;
            data.cache_generation = generation;
            data.cache = found.then_some(cache);
            std::mem::replace(&mut data.levels, outcome.levels)
        };
        release_levels(vfs, old_levels);

        log::debug!(
            "{}: decode finished with {} level(s), {:?}",
            desc.log_id,
            self.data().levels.len(),
            outcome.result
        );
        self.finish(if found {
            ReplacementState::Active
        } else {
            ReplacementState::NotFound
        });
    }

    /// Publish a terminal state unless teardown already claimed the texture.
    fn finish(&self, state: ReplacementState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != ReplacementState::CancelInit {
            *current = state;
        }
    }
}

fn release_levels(vfs: &dyn VfsBackend, levels: Vec<ReplacedTextureLevel>) {
    for file_ref in levels.into_iter().filter_map(|level| level.file_ref) {
        vfs.release_file(file_ref);
    }
}

/// A texture whose pixels may come from replacement files.
pub struct ReplacedTexture {
    shared: Arc<TextureShared>,
    vfs: Weak<dyn VfsBackend>,
    executor: Arc<dyn TaskExecutor>,
    transcoder: Option<Arc<dyn BasisTranscoder>>,
    parallel_copy_min_bytes: usize,
    task: Option<TaskHandle>,
    last_used: Instant,
}

impl ReplacedTexture {
    pub fn new(ctx: &ReplacerContext) -> Self {
        Self {
            shared: Arc::new(TextureShared::default()),
            vfs: Arc::downgrade(&ctx.vfs),
            executor: Arc::clone(&ctx.executor),
            transcoder: ctx.transcoder.clone(),
            parallel_copy_min_bytes: ctx.parallel_copy_min_bytes,
            task: None,
            last_used: Instant::now(),
        }
    }

    /// Attach the descriptor and cache entry to decode from.
    ///
    /// Only valid before decoding or after a purge; returns `false` otherwise.
    pub fn finish_populate(&mut self, desc: ReplacementDesc) -> bool {
        let state = self.state();
        if !matches!(
            state,
            ReplacementState::Uninitialized | ReplacementState::Populated
        ) {
            log::warn!(
                "{}: cannot attach a descriptor in state {}",
                desc.log_id,
                state
            );
            return false;
        }

        {
            let mut data = self.shared.data();
            data.log_id = desc.log_id.clone();
            data.cache = Some(Arc::clone(&desc.cache));
            data.desc = Some(desc);
        }
        self.shared.set_state(ReplacementState::Populated);
        true
    }

    pub fn state(&self) -> ReplacementState {
        self.shared.state()
    }

    /// Check readiness, blocking at most `budget` seconds.
    ///
    /// Only returns `true` once the texture is ACTIVE or NOT_FOUND. A negative
    /// budget never starts a decode.
    pub fn is_ready(&mut self, budget: f64) -> bool {
        let now = Instant::now();
        self.check_cache_purged();

        match self.state() {
            ReplacementState::Active | ReplacementState::NotFound => {
                if self.task.is_some() && !self.try_join(budget) {
                    self.last_used = now;
                    return false;
                }
                self.touch_cache(now);
                self.last_used = now;
                true
            }
            ReplacementState::Uninitialized | ReplacementState::CancelInit => false,
            ReplacementState::Pending => self.poll_pending(budget, now),
            ReplacementState::Populated => {
                self.last_used = now;
                if budget < 0.0 {
                    return false;
                }
                self.start_decode();
                self.poll_pending(budget, now)
            }
        }
    }

    fn start_decode(&mut self) {
        let Some(vfs) = self.vfs.upgrade() else {
            log::warn!("{}: filesystem is gone, no replacement", self.log_id());
            self.shared.set_state(ReplacementState::NotFound);
            return;
        };
        debug_assert!(self.task.is_none());

        self.shared.set_state(ReplacementState::Pending);
        let shared = Arc::clone(&self.shared);
        let transcoder = self.transcoder.clone();
        let handle = spawn_task(self.executor.as_ref(), move || {
            shared.prepare(vfs.as_ref(), transcoder.as_deref());
        });
        self.task = Some(handle);
    }

    /// Wait on the in-flight task and report whether the texture is ready.
    fn poll_pending(&mut self, budget: f64, now: Instant) -> bool {
        if self.task.is_some() && !self.try_join(budget) {
            return false;
        }
        match self.state() {
            ReplacementState::Active | ReplacementState::NotFound => {
                self.touch_cache(now);
                true
            }
            ReplacementState::Pending => {
                // The task ended without publishing a result.
                log::warn!("{}: decode task was lost, will retry", self.log_id());
                self.shared.set_state(ReplacementState::Populated);
                false
            }
            _ => false,
        }
    }

    /// Join the task if it finishes within `budget`.
    fn try_join(&mut self, budget: f64) -> bool {
        let Some(task) = self.task.take() else {
            return true;
        };
        if task.wait_for(budget_to_timeout(budget)) {
            task.join();
            true
        } else {
            self.task = Some(task);
            false
        }
    }

    fn touch_cache(&self, now: Instant) {
        if let Some(cache) = &self.shared.data().cache {
            cache.touch(now);
        }
    }

    /// Fall back to POPULATED if another texture purged the shared bytes.
    fn check_cache_purged(&mut self) {
        if self.task.is_some() || self.state() != ReplacementState::Active {
            return;
        }
        let purged = {
            let data = self.shared.data();
            data.cache
                .as_ref()
                .is_some_and(|cache| cache.generation() != data.cache_generation)
        };
        if purged {
            log::debug!("{}: shared level data was purged", self.log_id());
            self.shared.set_state(ReplacementState::Populated);
        }
    }

    /// Drop decoded bytes unused since `threshold` so they reload on demand.
    ///
    /// Does nothing while a decode is still running.
    pub fn purge_if_older(&mut self, threshold: Instant) {
        if self.task.as_ref().is_some_and(|task| !task.is_done()) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.join();
        }
        if self.last_used >= threshold || self.state() != ReplacementState::Active {
            return;
        }

        let (cache, generation) = {
            let data = self.shared.data();
            (data.cache.clone(), data.cache_generation)
        };
        let Some(cache) = cache else {
            return;
        };
        if cache.purge_if_older(threshold) || cache.generation() != generation {
            log::debug!("{}: purged replacement levels", self.log_id());
            self.shared.set_state(ReplacementState::Populated);
        }
    }

    /// Copy level `level` into `out`, rows `row_pitch` bytes apart.
    ///
    /// Fails without writing if the texture is not ACTIVE, the level is out
    /// of range or empty, or `out`/`row_pitch` are too small.
    pub fn copy_level_to(&self, level: usize, out: &mut [u8], row_pitch: usize) -> bool {
        let state = self.state();
        if state != ReplacementState::Active {
            log::warn!("{}: init not done yet ({})", self.log_id(), state);
            return false;
        }

        let data = self.shared.data();
        let Some(info) = data.levels.get(level) else {
            log::warn!(
                "{}: invalid mip level {} (have {})",
                data.log_id,
                level,
                data.levels.len()
            );
            return false;
        };
        let Some(cache) = &data.cache else {
            return false;
        };
        let cache_data = cache.lock();
        copy_level_to(
            &cache_data,
            level,
            info,
            data.fmt,
            out,
            row_pitch,
            self.parallel_copy_min_bytes,
        )
    }

    pub fn format(&self) -> DataFormat {
        self.shared.data().fmt
    }

    pub fn num_levels(&self) -> usize {
        self.shared.data().levels.len()
    }

    pub fn level_w(&self, level: usize) -> Option<u32> {
        self.shared.data().levels.get(level).map(|l| l.w)
    }

    pub fn level_h(&self, level: usize) -> Option<u32> {
        self.shared.data().levels.get(level).map(|l| l.h)
    }

    /// Bytes needed for a tightly packed copy of `level`.
    pub fn level_data_size(&self, level: usize) -> Option<usize> {
        let data = self.shared.data();
        let info = data.levels.get(level)?;
        Some(data.fmt.level_size(info.w, info.h))
    }

    pub fn alpha_status(&self) -> AlphaStatus {
        self.shared.data().alpha
    }

    pub fn log_id(&self) -> String {
        self.shared.data().log_id.clone()
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }
}

impl fmt::Debug for ReplacedTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplacedTexture")
            .field("state", &self.state())
            .field("levels", &self.num_levels())
            .field("pending_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ReplacedTexture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.shared.set_state(ReplacementState::CancelInit);
            task.join();
        }

        let levels = std::mem::take(&mut self.shared.data().levels);
        if let Some(vfs) = self.vfs.upgrade() {
            release_levels(vfs.as_ref(), levels);
        }
    }
}
