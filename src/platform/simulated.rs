//! 进程内模拟平台
//!
//! 实现完整的队列契约，用于命令行压测和测试：
//! - 追踪对象创建/销毁，检查泄漏
//! - 2 槽队列深度限制、播放状态、事件掩码
//! - 记录每次提交（可选）和注入提交失败
//! - 完成通知可手动投递（`complete_one`），也可由实时消耗线程按硬件速率投递
//!
//! 两种投递方式遵循同一模型：每经过一个硬件周期投递一次通知，
//! 队列为空时记为一次欠载，通知照常投递
//!
//! “播放”时 float 缓冲区会按 16-bit 容器换算，与格式描述一致

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::audio::format::{ByteOrder, PcmBuffer, PcmSlice};
use crate::audio::pacing::PacingClock;
use crate::audio::timing::SystemClock;

use super::{
    AudioPlatform, BufferQueueSource, CompletionCallback, EngineId, ObjectId, OutputMixId,
    PlatformError, PlayEvents, PlayState, PlayerId,
};

/// 对象种类（用于失败注入）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Engine,
    OutputMix,
    Player,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::OutputMix => "output mix",
            Self::Player => "audio player",
        }
    }

    fn of(object: ObjectId) -> Self {
        match object {
            ObjectId::Engine(_) => Self::Engine,
            ObjectId::OutputMix(_) => Self::OutputMix,
            ObjectId::Player(_) => Self::Player,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "engine" => Some(Self::Engine),
            "output-mix" | "output mix" => Some(Self::OutputMix),
            "player" | "audio player" => Some(Self::Player),
            _ => None,
        }
    }
}

/// 一次提交记录
#[derive(Clone, Debug)]
pub struct Submission {
    pub player: PlayerId,
    pub at: Instant,
    pub accepted: bool,
    pub buffer: PcmBuffer,
}

#[derive(Clone, Debug, Default)]
struct SimConfig {
    fail_create: Option<ObjectKind>,
    fail_realize: Option<ObjectKind>,
    fail_register: bool,
    fail_play: bool,
    /// 每第 n 次提交失败
    fail_every: Option<u64>,
    /// 不限制队列深度
    unbounded: bool,
    record: bool,
    /// 实时消耗的每缓冲区帧数
    realtime_frames: Option<usize>,
}

type CallbackSlot = Arc<Mutex<Option<CompletionCallback>>>;

struct DrainThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct PlayerState {
    source: BufferQueueSource,
    state: PlayState,
    events: PlayEvents,
    queue: VecDeque<PcmBuffer>,
    callback: CallbackSlot,
    drain: Option<DrainThread>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    /// 存活对象及其是否已 realize
    objects: HashMap<ObjectId, bool>,
    players: HashMap<PlayerId, PlayerState>,
    created: u64,
    destroyed: u64,
    enqueue_attempts: u64,
    completions: u64,
    /// 队列为空时经过的周期数
    underruns: u64,
    played_frames: u64,
    played_bytes: u64,
    submissions: Vec<Submission>,
}

struct Shared {
    config: SimConfig,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 经过一个硬件周期：取出队首缓冲区（如有）并“播放”，返回回调槽
    ///
    /// 队列为空时同样算一个周期，照常投递通知
    fn drain_one(&self, player: PlayerId) -> Option<CallbackSlot> {
        let mut inner = self.lock();
        let state = inner.players.get_mut(&player)?;
        let popped = state.queue.pop_front();
        let slot = Arc::clone(&state.callback);
        let frame_bytes = state.source.format.bytes_per_frame();

        match popped {
            Some(buffer) => {
                let pcm = buffer.as_slice();
                let mut bytes = Vec::with_capacity(pcm.frames() * frame_bytes);
                pcm.write_s16_le(&mut bytes);
                inner.played_frames += pcm.frames() as u64;
                inner.played_bytes += bytes.len() as u64;
            }
            None => inner.underruns += 1,
        }
        inner.completions += 1;
        Some(slot)
    }

    fn is_playing(&self, player: PlayerId) -> bool {
        self.lock()
            .players
            .get(&player)
            .is_some_and(|p| p.state == PlayState::Playing)
    }
}

/// 在锁外调用完成回调
fn deliver(slot: &CallbackSlot) -> bool {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    match guard.as_mut() {
        Some(callback) => {
            callback();
            true
        }
        None => false,
    }
}

/// 模拟平台
pub struct SimulatedPlatform {
    shared: Arc<Shared>,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    fn with_config(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    fn map_config(self, f: impl FnOnce(&mut SimConfig)) -> Self {
        let mut config = self.shared.config.clone();
        f(&mut config);
        Self::with_config(config)
    }

    /// 指定种类的对象创建失败（"engine" / "output-mix" / "player"）
    pub fn fail_create_of(self, kind: &str) -> Self {
        let kind = ObjectKind::parse(kind);
        self.map_config(|c| c.fail_create = kind)
    }

    /// 指定种类的对象 realize 失败
    pub fn fail_realize_of(self, kind: &str) -> Self {
        let kind = ObjectKind::parse(kind);
        self.map_config(|c| c.fail_realize = kind)
    }

    pub fn fail_register_callback(self) -> Self {
        self.map_config(|c| c.fail_register = true)
    }

    pub fn fail_play_state(self) -> Self {
        self.map_config(|c| c.fail_play = true)
    }

    /// 每第 `n` 次提交失败（n = 2 即隔一次失败一次）
    pub fn fail_every(self, n: u64) -> Self {
        self.map_config(|c| c.fail_every = (n > 0).then_some(n))
    }

    /// 不限制队列深度
    pub fn unbounded(self) -> Self {
        self.map_config(|c| c.unbounded = true)
    }

    /// 记录每次提交的内容和时间
    pub fn recording(self) -> Self {
        self.map_config(|c| c.record = true)
    }

    /// 进入 Playing 后按硬件速率消耗队列并投递完成通知
    pub fn realtime(self, frames_per_buffer: usize) -> Self {
        self.map_config(|c| c.realtime_frames = Some(frames_per_buffer))
    }

    // === 观测接口 ===

    /// 当前存活对象数
    pub fn live_objects(&self) -> usize {
        self.shared.lock().objects.len()
    }

    pub fn created_objects(&self) -> u64 {
        self.shared.lock().created
    }

    pub fn destroyed_objects(&self) -> u64 {
        self.shared.lock().destroyed
    }

    /// 唯一存活的 player
    pub fn only_player(&self) -> Option<PlayerId> {
        let inner = self.shared.lock();
        let mut ids = inner.players.keys();
        match (ids.next(), ids.next()) {
            (Some(&id), None) => Some(id),
            _ => None,
        }
    }

    pub fn play_state(&self, player: PlayerId) -> Option<PlayState> {
        self.shared.lock().players.get(&player).map(|p| p.state)
    }

    pub fn event_mask(&self, player: PlayerId) -> Option<PlayEvents> {
        self.shared.lock().players.get(&player).map(|p| p.events)
    }

    pub fn has_callback(&self, player: PlayerId) -> bool {
        let slot = match self.shared.lock().players.get(&player) {
            Some(p) => Arc::clone(&p.callback),
            None => return false,
        };
        let has = slot.lock().unwrap_or_else(PoisonError::into_inner).is_some();
        has
    }

    /// 队列中等待播放的缓冲区数
    pub fn queued(&self, player: PlayerId) -> usize {
        self.shared
            .lock()
            .players
            .get(&player)
            .map_or(0, |p| p.queue.len())
    }

    pub fn enqueue_attempts(&self) -> u64 {
        self.shared.lock().enqueue_attempts
    }

    pub fn completions(&self) -> u64 {
        self.shared.lock().completions
    }

    pub fn underruns(&self) -> u64 {
        self.shared.lock().underruns
    }

    pub fn played_frames(&self) -> u64 {
        self.shared.lock().played_frames
    }

    /// 以 16-bit 容器计的已播放字节数
    pub fn played_bytes(&self) -> u64 {
        self.shared.lock().played_bytes
    }

    /// 全部提交记录（需开启 `recording`）
    pub fn submissions(&self) -> Vec<Submission> {
        self.shared.lock().submissions.clone()
    }

    pub fn accepted_submissions(&self) -> Vec<Submission> {
        self.shared
            .lock()
            .submissions
            .iter()
            .filter(|s| s.accepted)
            .cloned()
            .collect()
    }

    /// 模拟硬件播完一个缓冲区：弹出队首（如有）并投递完成通知
    ///
    /// 无论队列是否为空都会投递；返回是否有回调被调用
    pub fn complete_one(&self, player: PlayerId) -> bool {
        match self.shared.drain_one(player) {
            Some(slot) => deliver(&slot),
            None => false,
        }
    }

    /// 分配新对象编号并登记为未 realize
    fn allocate(inner: &mut Inner, make: impl FnOnce(u64) -> ObjectId) -> ObjectId {
        inner.next_id += 1;
        let object = make(inner.next_id);
        inner.objects.insert(object, false);
        inner.created += 1;
        object
    }

    fn check_create(&self, kind: ObjectKind) -> Result<(), PlatformError> {
        if self.shared.config.fail_create == Some(kind) {
            return Err(PlatformError::CreateFailed(kind.name()));
        }
        Ok(())
    }

    fn check_realized(inner: &Inner, object: ObjectId) -> Result<(), PlatformError> {
        match inner.objects.get(&object) {
            Some(true) => Ok(()),
            Some(false) => Err(PlatformError::Rejected("object not realized")),
            None => Err(PlatformError::UnknownObject(object)),
        }
    }

    fn start_drain(&self, player: PlayerId, frames: usize, sample_rate: u32) -> Option<DrainThread> {
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("sim-drain".to_string())
            .spawn(move || {
                let mut pacer = PacingClock::new(frames, sample_rate);
                let clock = SystemClock;
                while !thread_stop.load(Ordering::Acquire) {
                    pacer.wait(&clock);
                    if thread_stop.load(Ordering::Acquire) || !shared.is_playing(player) {
                        continue;
                    }
                    if let Some(slot) = shared.drain_one(player) {
                        deliver(&slot);
                    }
                }
            });

        match handle {
            Ok(handle) => Some(DrainThread { stop, handle }),
            Err(e) => {
                log::warn!("Failed to spawn simulated drain thread: {}", e);
                None
            }
        }
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlatform for SimulatedPlatform {
    fn create_engine(&self) -> Result<EngineId, PlatformError> {
        self.check_create(ObjectKind::Engine)?;
        let mut inner = self.shared.lock();
        let mut id = EngineId(0);
        Self::allocate(&mut inner, |n| {
            id = EngineId(n);
            id.into()
        });
        Ok(id)
    }

    fn create_output_mix(&self, engine: EngineId) -> Result<OutputMixId, PlatformError> {
        self.check_create(ObjectKind::OutputMix)?;
        let mut inner = self.shared.lock();
        Self::check_realized(&inner, engine.into())?;
        let mut id = OutputMixId(0);
        Self::allocate(&mut inner, |n| {
            id = OutputMixId(n);
            id.into()
        });
        Ok(id)
    }

    fn create_player(
        &self,
        engine: EngineId,
        output_mix: OutputMixId,
        source: &BufferQueueSource,
    ) -> Result<PlayerId, PlatformError> {
        self.check_create(ObjectKind::Player)?;
        let format = &source.format;
        if format.container_bits != 16
            || format.channels != 2
            || format.byte_order != ByteOrder::LittleEndian
        {
            return Err(PlatformError::UnsupportedFormat(format!(
                "{}ch {}-bit {:?}",
                format.channels, format.container_bits, format.byte_order
            )));
        }
        let Some(millihertz) = format.sample_rate_millihertz() else {
            return Err(PlatformError::UnsupportedFormat(format!(
                "{} Hz",
                format.sample_rate
            )));
        };
        if source.slots == 0 {
            return Err(PlatformError::Rejected("buffer queue needs at least one slot"));
        }

        let mut inner = self.shared.lock();
        Self::check_realized(&inner, engine.into())?;
        Self::check_realized(&inner, output_mix.into())?;

        let mut id = PlayerId(0);
        Self::allocate(&mut inner, |n| {
            id = PlayerId(n);
            id.into()
        });
        inner.players.insert(
            id,
            PlayerState {
                source: *source,
                state: PlayState::Stopped,
                events: PlayEvents::NONE,
                queue: VecDeque::new(),
                callback: Arc::new(Mutex::new(None)),
                drain: None,
            },
        );
        log::debug!(
            "Created player {:?}: {} slots @ {} mHz",
            id,
            source.slots,
            millihertz
        );
        Ok(id)
    }

    fn realize(&self, object: ObjectId) -> Result<(), PlatformError> {
        if self.shared.config.fail_realize == Some(ObjectKind::of(object)) {
            return Err(PlatformError::RealizeFailed(object));
        }
        let mut inner = self.shared.lock();
        match inner.objects.get_mut(&object) {
            Some(realized) => {
                *realized = true;
                Ok(())
            }
            None => Err(PlatformError::UnknownObject(object)),
        }
    }

    fn register_callback(
        &self,
        player: PlayerId,
        callback: CompletionCallback,
    ) -> Result<(), PlatformError> {
        if self.shared.config.fail_register {
            return Err(PlatformError::Rejected("callback registration refused"));
        }
        let slot = {
            let inner = self.shared.lock();
            Self::check_realized(&inner, player.into())?;
            match inner.players.get(&player) {
                Some(p) => Arc::clone(&p.callback),
                None => return Err(PlatformError::UnknownObject(player.into())),
            }
        };
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
        Ok(())
    }

    fn set_event_mask(&self, player: PlayerId, events: PlayEvents) -> Result<(), PlatformError> {
        let mut inner = self.shared.lock();
        let state = inner
            .players
            .get_mut(&player)
            .ok_or(PlatformError::UnknownObject(player.into()))?;
        state.events = events;
        Ok(())
    }

    fn set_play_state(&self, player: PlayerId, state: PlayState) -> Result<(), PlatformError> {
        if self.shared.config.fail_play {
            return Err(PlatformError::Rejected("play state change refused"));
        }

        let mut inner = self.shared.lock();
        Self::check_realized(&inner, player.into())?;
        let player_state = inner
            .players
            .get_mut(&player)
            .ok_or(PlatformError::UnknownObject(player.into()))?;
        player_state.state = state;

        if state == PlayState::Playing && player_state.drain.is_none() {
            if let Some(frames) = self.shared.config.realtime_frames {
                let sample_rate = player_state.source.format.sample_rate;
                player_state.drain = self.start_drain(player, frames, sample_rate);
            }
        }
        Ok(())
    }

    fn enqueue(&self, player: PlayerId, buffer: PcmSlice<'_>) -> Result<(), PlatformError> {
        let config = &self.shared.config;
        let mut inner = self.shared.lock();
        inner.enqueue_attempts += 1;
        let attempt = inner.enqueue_attempts;

        Self::check_realized(&inner, player.into())?;
        if buffer.is_empty() {
            return Err(PlatformError::Rejected("empty buffer"));
        }

        let state = inner
            .players
            .get_mut(&player)
            .ok_or(PlatformError::UnknownObject(player.into()))?;

        let result = if config.fail_every.is_some_and(|n| attempt % n == 0) {
            Err(PlatformError::Rejected("injected enqueue failure"))
        } else if !config.unbounded && state.queue.len() >= state.source.slots as usize {
            Err(PlatformError::BufferQueueFull)
        } else {
            state.queue.push_back(buffer.to_buffer());
            Ok(())
        };

        if config.record {
            inner.submissions.push(Submission {
                player,
                at: Instant::now(),
                accepted: result.is_ok(),
                buffer: buffer.to_buffer(),
            });
        }
        result
    }

    fn destroy(&self, object: ObjectId) {
        let removed_player = {
            let mut inner = self.shared.lock();
            if inner.objects.remove(&object).is_none() {
                return;
            }
            inner.destroyed += 1;
            match object {
                ObjectId::Player(id) => inner.players.remove(&id),
                _ => None,
            }
        };

        // 锁外停止消耗线程并丢弃回调，之后不会再有通知
        if let Some(mut player) = removed_player {
            if let Some(drain) = player.drain.take() {
                drain.stop.store(true, Ordering::Release);
                let _ = drain.handle.join();
            }
            let callback = player
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            drop(callback);
        }
    }
}
