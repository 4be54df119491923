//! 音频输出驱动
//!
//! 构造顺序：engine → output mix → player → 缓冲区 → 启动调度。
//! 任一步失败时，已创建的对象按相反顺序销毁，不会泄漏。
//!
//! 销毁顺序：
//! 1. 取消并等待 pull 线程（pull 模式）
//! 2. 销毁 player（push 模式下完成回调及其缓冲区随之释放）
//! 3. 销毁 output mix、engine

pub mod config;
pub(crate) mod pull;
pub(crate) mod push;
mod submit;

use std::sync::Arc;

use crate::audio::buffer::BufferError;
use crate::audio::format::{PcmDescriptor, SampleFormat};
use crate::audio::stats::{DriverStats, StatsReport};
use crate::audio::timing::{MonotonicClock, SystemClock};
use crate::platform::{
    AudioPlatform, BufferQueueSource, EngineId, OutputMixId, PlatformError, PlayState, PlayerId,
    Scoped, BUFFER_QUEUE_SLOTS,
};
use crate::producer::{ProducedSample, Producer, SampleProducer};

pub use config::{DriverConfig, DriverMode};
pub use pull::{set_realtime_priority, CancellationToken};

use pull::PullWorker;
use submit::QueueWriter;

/// 驱动错误
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to {step}: {source}")]
    Platform {
        step: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("failed to allocate buffers for {frames} frames: {source}")]
    OutOfMemory {
        frames: usize,
        #[source]
        source: BufferError,
    },

    #[error("failed to spawn audio thread: {0}")]
    SpawnWorker(#[source] std::io::Error),

    #[error("split producer is not supported in pull mode")]
    SplitProducerInPullMode,
}

impl DriverError {
    /// 给平台错误附上失败的步骤
    pub(crate) fn platform(step: &'static str) -> impl FnOnce(PlatformError) -> Self {
        move |source| Self::Platform { step, source }
    }

    pub(crate) fn buffer(frames: usize) -> impl FnOnce(BufferError) -> Self {
        move |source| Self::OutOfMemory { frames, source }
    }
}

/// 各模式的运行状态
///
/// push 模式的生产状态由平台持有的完成回调独占，这里无需保存
enum ModeState {
    Push,
    Pull { worker: PullWorker },
}

/// 音频输出驱动
///
/// 字段顺序即 Drop 顺序
pub struct Driver {
    mode: Option<ModeState>,
    player: Option<Scoped<PlayerId>>,
    output_mix: Option<Scoped<OutputMixId>>,
    engine: Option<Scoped<EngineId>>,
    stats: Arc<DriverStats>,
    config: DriverConfig,
}

impl Driver {
    /// 创建驱动并立即开始播放
    pub fn new(
        config: DriverConfig,
        platform: Arc<dyn AudioPlatform>,
        producer: Producer,
    ) -> Result<Self, DriverError> {
        Self::with_clock(config, platform, producer, SystemClock)
    }

    /// 以合成器（direct 生产者）创建驱动
    pub fn with_synth<S: SampleProducer + 'static>(
        config: DriverConfig,
        platform: Arc<dyn AudioPlatform>,
        synth: S,
    ) -> Result<Self, DriverError> {
        Self::new(config, platform, Producer::direct(synth))
    }

    /// 指定 pull 线程使用的时钟
    pub fn with_clock<C: MonotonicClock + 'static>(
        config: DriverConfig,
        platform: Arc<dyn AudioPlatform>,
        producer: Producer,
        clock: C,
    ) -> Result<Self, DriverError> {
        config.validate()?;

        if producer.is_split() {
            if config.mode == DriverMode::Pull {
                return Err(DriverError::SplitProducerInPullMode);
            }
            if config.sample_format == SampleFormat::Int16 {
                log::warn!(
                    "Split producer cannot render '{}' samples, output will stay silent",
                    config.sample_format
                );
            }
        }

        let engine = platform
            .create_engine()
            .map_err(DriverError::platform("create engine"))?;
        let engine = Scoped::realize(&platform, engine).map_err(DriverError::platform("realize engine"))?;

        let output_mix = platform
            .create_output_mix(engine.id())
            .map_err(DriverError::platform("create output mix"))?;
        let output_mix = Scoped::realize(&platform, output_mix)
            .map_err(DriverError::platform("realize output mix"))?;

        let source = BufferQueueSource {
            slots: BUFFER_QUEUE_SLOTS,
            format: config.output_format(),
        };
        let player = platform
            .create_player(engine.id(), output_mix.id(), &source)
            .map_err(DriverError::platform("create audio player"))?;
        let player = Scoped::realize(&platform, player)
            .map_err(DriverError::platform("realize audio player"))?;

        let stats = Arc::new(DriverStats::new());
        let writer = QueueWriter::new(
            Arc::clone(&platform),
            player.id(),
            Arc::clone(&stats),
            config.failure_alert_threshold,
        );

        let mode = match config.sample_format {
            SampleFormat::Int16 => {
                start::<i16, C>(&config, &platform, player.id(), producer, writer, clock)?
            }
            SampleFormat::Float => {
                start::<f32, C>(&config, &platform, player.id(), producer, writer, clock)?
            }
        };

        log::info!(
            "Using audio queue driver: {} mode, {} format, {} frames @ {} Hz",
            config.mode,
            config.sample_format,
            config.period_size,
            config.sample_rate
        );

        Ok(Self {
            mode: Some(mode),
            player: Some(player),
            output_mix: Some(output_mix),
            engine: Some(engine),
            stats,
            config,
        })
    }

    /// 停止并释放全部平台对象，可重复调用
    pub fn shutdown(&mut self) {
        let Some(mode) = self.mode.take() else {
            return;
        };

        if let ModeState::Pull { mut worker } = mode {
            worker.stop();
        }

        drop(self.player.take());
        drop(self.output_mix.take());
        drop(self.engine.take());

        log::info!(
            "Audio driver stopped after {} cycles ({} submitted, {} failed)",
            self.stats.cycles(),
            self.stats.submitted(),
            self.stats.submit_failures()
        );
    }

    /// 是否仍在运行（pull 线程意外退出时为 false）
    pub fn is_running(&self) -> bool {
        match &self.mode {
            Some(ModeState::Push) => true,
            Some(ModeState::Pull { worker }) => worker.is_running(),
            None => false,
        }
    }

    #[inline]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    #[inline]
    pub fn mode(&self) -> DriverMode {
        self.config.mode
    }

    #[inline]
    pub fn stats(&self) -> &Arc<DriverStats> {
        &self.stats
    }

    pub fn report(&self) -> StatsReport {
        self.stats.report(self.config.period_size, self.config.sample_rate)
    }

    /// 运行中的 player 句柄
    pub fn player_id(&self) -> Option<PlayerId> {
        self.player.as_ref().map(Scoped::id)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("player", &self.player_id())
            .field("running", &self.is_running())
            .finish()
    }
}

/// 按样本类型启动调度
fn start<T: ProducedSample, C: MonotonicClock + 'static>(
    config: &DriverConfig,
    platform: &Arc<dyn AudioPlatform>,
    player: PlayerId,
    producer: Producer,
    writer: QueueWriter,
    clock: C,
) -> Result<ModeState, DriverError> {
    match config.mode {
        DriverMode::Push => {
            push::start::<T>(platform, player, config.period_size, producer, writer)?;
            Ok(ModeState::Push)
        }
        DriverMode::Pull => {
            platform
                .set_play_state(player, PlayState::Playing)
                .map_err(DriverError::platform("start playback"))?;
            let worker = PullWorker::spawn::<T, C>(
                config.period_size,
                config.sample_rate,
                config.realtime_priority,
                producer,
                writer,
                clock,
            )?;
            Ok(ModeState::Pull { worker })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::Sample;
    use crate::platform::SimulatedPlatform;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    /// 输出常量，Drop 时置位标志
    struct Constant {
        value: f32,
        dropped: Arc<AtomicBool>,
    }

    impl Constant {
        fn new(value: f32) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    value,
                    dropped: Arc::clone(&dropped),
                },
                dropped,
            )
        }
    }

    impl SampleProducer for Constant {
        fn fill_i16(&mut self, _frames: usize, out: &mut [i16]) {
            out.fill(i16::from_f32(self.value));
        }

        fn fill_f32(&mut self, _frames: usize, out: &mut [f32]) {
            out.fill(self.value);
        }
    }

    impl Drop for Constant {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn split_lr() -> Producer {
        Producer::split(|frames: usize, left: &mut [f32], right: &mut [f32]| {
            for i in 0..frames {
                left[i] = 0.25;
                right[i] = -0.25;
            }
        })
    }

    fn config(mode: DriverMode, format: SampleFormat, period: usize) -> DriverConfig {
        DriverConfig {
            period_size: period,
            sample_rate: 44100,
            realtime_priority: 0,
            sample_format: format,
            mode,
            ..Default::default()
        }
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn test_lifecycle_releases_everything() {
        let combos = [
            (DriverMode::Push, SampleFormat::Int16, false),
            (DriverMode::Push, SampleFormat::Float, false),
            (DriverMode::Push, SampleFormat::Float, true),
            (DriverMode::Pull, SampleFormat::Int16, false),
            (DriverMode::Pull, SampleFormat::Float, false),
        ];

        for (mode, format, split) in combos {
            let sim = Arc::new(SimulatedPlatform::new());
            let (constant, dropped) = Constant::new(0.1);
            let producer = if split {
                split_lr()
            } else {
                Producer::direct(constant)
            };

            let mut driver = Driver::new(config(mode, format, 64), sim.clone(), producer).unwrap();
            assert!(driver.is_running());
            assert_eq!(sim.live_objects(), 3);

            driver.shutdown();
            assert!(!driver.is_running());
            assert_eq!(sim.live_objects(), 0, "{:?} {:?} split={}", mode, format, split);
            assert_eq!(sim.created_objects(), 3);
            assert_eq!(sim.destroyed_objects(), 3);
            if !split {
                assert!(dropped.load(Ordering::SeqCst), "{:?} {:?}", mode, format);
            }
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let sim = Arc::new(SimulatedPlatform::new());
        let (constant, _) = Constant::new(0.0);
        let mut driver =
            Driver::with_synth(config(DriverMode::Push, SampleFormat::Int16, 32), sim.clone(), constant)
                .unwrap();

        driver.shutdown();
        driver.shutdown();
        drop(driver);
        assert_eq!(sim.destroyed_objects(), 3);
    }

    #[test]
    fn test_construction_failures_do_not_leak() {
        let platforms = [
            SimulatedPlatform::new().fail_create_of("engine"),
            SimulatedPlatform::new().fail_realize_of("engine"),
            SimulatedPlatform::new().fail_create_of("output-mix"),
            SimulatedPlatform::new().fail_realize_of("output-mix"),
            SimulatedPlatform::new().fail_create_of("player"),
            SimulatedPlatform::new().fail_realize_of("player"),
            SimulatedPlatform::new().fail_play_state(),
        ];

        for sim in platforms {
            let sim = Arc::new(sim);
            for mode in [DriverMode::Push, DriverMode::Pull] {
                let (constant, _) = Constant::new(0.0);
                let result =
                    Driver::with_synth(config(mode, SampleFormat::Float, 64), sim.clone(), constant);
                assert!(matches!(result, Err(DriverError::Platform { .. })));
                assert_eq!(sim.live_objects(), 0);
                assert_eq!(sim.created_objects(), sim.destroyed_objects());
            }
        }

        let sim = Arc::new(SimulatedPlatform::new().fail_register_callback());
        let (constant, dropped) = Constant::new(0.0);
        let result = Driver::with_synth(config(DriverMode::Push, SampleFormat::Int16, 64), sim.clone(), constant);
        assert!(matches!(result, Err(DriverError::Platform { step: "register completion callback", .. })));
        assert_eq!(sim.live_objects(), 0);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_oversized_period_fails_cleanly() {
        for mode in [DriverMode::Push, DriverMode::Pull] {
            for period in [usize::MAX / 2 + 1, usize::MAX / 4] {
                let sim = Arc::new(SimulatedPlatform::new());
                let (constant, dropped) = Constant::new(0.0);
                let result =
                    Driver::with_synth(config(mode, SampleFormat::Int16, period), sim.clone(), constant);

                assert!(
                    matches!(result, Err(DriverError::OutOfMemory { frames, .. }) if frames == period),
                    "{:?} period={}",
                    mode,
                    period
                );
                assert_eq!(sim.live_objects(), 0);
                assert_eq!(sim.created_objects(), 3);
                assert!(dropped.load(Ordering::SeqCst));
            }
        }
    }

    #[test]
    fn test_rejected_before_any_platform_call() {
        let sim = Arc::new(SimulatedPlatform::new());

        let result = Driver::new(config(DriverMode::Pull, SampleFormat::Float, 0), sim.clone(), split_lr());
        assert!(matches!(result, Err(DriverError::InvalidConfig(_))));

        let result = Driver::new(config(DriverMode::Pull, SampleFormat::Float, 64), sim.clone(), split_lr());
        assert!(matches!(result, Err(DriverError::SplitProducerInPullMode)));

        assert_eq!(sim.created_objects(), 0);
    }

    #[test]
    fn test_push_split_interleaves() {
        let sim = Arc::new(SimulatedPlatform::new().recording());
        let driver = Driver::new(config(DriverMode::Push, SampleFormat::Float, 4), sim.clone(), split_lr()).unwrap();
        let player = driver.player_id().unwrap();

        assert!(sim.complete_one(player));
        let subs = sim.accepted_submissions();
        assert_eq!(subs.len(), 2);
        assert_eq!(
            subs[1].buffer.as_f32().unwrap(),
            &[0.25, -0.25, 0.25, -0.25, 0.25, -0.25, 0.25, -0.25]
        );
    }

    #[test]
    fn test_push_int16_split_keeps_chain_alive() {
        let sim = Arc::new(SimulatedPlatform::new().recording());
        let driver = Driver::new(config(DriverMode::Push, SampleFormat::Int16, 8), sim.clone(), split_lr()).unwrap();
        let player = driver.player_id().unwrap();

        for _ in 0..5 {
            assert!(sim.complete_one(player));
        }

        // 每次完成都会提交（静音），但没有生产
        assert_eq!(driver.stats().cycles(), 5);
        assert_eq!(driver.stats().skipped_productions(), 5);
        assert_eq!(sim.enqueue_attempts(), 6);
        for sub in sim.accepted_submissions() {
            assert!(sub.buffer.as_i16().unwrap().iter().all(|&s| s == 0));
        }
    }

    #[test]
    fn test_push_survives_enqueue_failures() {
        let sim = Arc::new(SimulatedPlatform::new().fail_every(2));
        let (constant, _) = Constant::new(0.5);
        let driver =
            Driver::with_synth(config(DriverMode::Push, SampleFormat::Int16, 16), sim.clone(), constant)
                .unwrap();
        let player = driver.player_id().unwrap();

        for _ in 0..12 {
            assert!(sim.complete_one(player));
        }

        // 预热 1 次 + 每次完成 1 次
        assert_eq!(sim.enqueue_attempts(), 13);
        assert_eq!(driver.stats().cycles(), 12);
        assert_eq!(driver.stats().submit_failures(), 6);
        assert_eq!(driver.stats().submitted(), 7);
    }

    #[test]
    fn test_push_realtime_chain_survives_enqueue_failures() {
        // 441 帧 @ 44100 Hz = 10ms 一个周期
        let sim = Arc::new(SimulatedPlatform::new().realtime(441).fail_every(2));
        let (constant, _) = Constant::new(0.5);
        let mut driver = Driver::with_synth(
            config(DriverMode::Push, SampleFormat::Int16, 441),
            sim.clone(),
            constant,
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || driver.stats().cycles() >= 10));
        driver.shutdown();

        let stats = driver.stats();
        assert!(stats.cycles() >= 10);
        assert!(stats.submit_failures() >= 4);
        assert!(stats.submitted() >= 5);
        assert!(sim.underruns() >= 1);
    }

    #[test]
    fn test_pull_survives_enqueue_failures() {
        let sim = Arc::new(SimulatedPlatform::new().unbounded().fail_every(2));
        let (constant, _) = Constant::new(0.5);
        let mut driver = Driver::with_synth(
            DriverConfig {
                sample_rate: 48000,
                ..config(DriverMode::Pull, SampleFormat::Int16, 64)
            },
            sim.clone(),
            constant,
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || sim.enqueue_attempts() >= 10));
        driver.shutdown();

        let stats = driver.stats();
        assert!(stats.cycles() >= 10);
        assert!(stats.submit_failures() >= 5);
        assert!(stats.submitted() >= 5);
    }

    #[test]
    fn test_pull_end_to_end_pacing() {
        const VALUE: f32 = 0.25;
        const BUFFERS: usize = 50;

        let sim = Arc::new(SimulatedPlatform::new().unbounded().recording());
        let (constant, _) = Constant::new(VALUE);
        let mut driver = Driver::with_synth(
            DriverConfig {
                realtime_priority: 60,
                ..config(DriverMode::Pull, SampleFormat::Float, 512)
            },
            sim.clone(),
            constant,
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            sim.enqueue_attempts() as usize > BUFFERS
        }));
        driver.shutdown();

        let subs = sim.accepted_submissions();
        assert!(subs.len() > BUFFERS);
        for sub in &subs[..=BUFFERS] {
            let samples = sub.buffer.as_f32().unwrap();
            assert_eq!(samples.len(), 1024);
            assert!(samples.iter().all(|&s| s == VALUE));
        }

        // 512 帧 @ 44100 Hz ≈ 11609.977µs
        let span = subs[BUFFERS].at.duration_since(subs[0].at);
        let average_us = span.as_secs_f64() * 1e6 / BUFFERS as f64;
        let ideal_us = 512.0 * 1e6 / 44100.0;
        assert!(
            (average_us - ideal_us).abs() / ideal_us < 0.05,
            "average interval {:.1}µs",
            average_us
        );
    }

    #[test]
    fn test_pull_shutdown_within_one_interval() {
        let sim = Arc::new(SimulatedPlatform::new().unbounded());
        let (constant, dropped) = Constant::new(0.0);
        // 4410 帧 @ 44100 Hz = 100ms
        let mut driver = Driver::with_synth(
            config(DriverMode::Pull, SampleFormat::Int16, 4410),
            sim.clone(),
            constant,
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(2), || sim.enqueue_attempts() >= 2));

        let start = Instant::now();
        driver.shutdown();
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(250), "shutdown took {:?}", elapsed);
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(sim.live_objects(), 0);

        // 线程已退出，不再提交
        let attempts = sim.enqueue_attempts();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(sim.enqueue_attempts(), attempts);
    }

    #[test]
    fn test_report() {
        let sim = Arc::new(SimulatedPlatform::new());
        let (constant, _) = Constant::new(0.0);
        let driver =
            Driver::with_synth(config(DriverMode::Push, SampleFormat::Float, 512), sim.clone(), constant)
                .unwrap();
        sim.complete_one(driver.player_id().unwrap());

        let report = driver.report();
        assert_eq!(report.cycles, 1);
        assert!(!report.to_string().is_empty());
    }
}
