//! Synth Driver - 音频队列驱动压测工具
//!
//! 在模拟平台上以真实硬件速率运行驱动，结束时输出统计：
//! - push / pull 两种调度模式
//! - 16-bit / float 两种样本格式
//! - 可注入提交失败，观察驱动的容错行为

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};

use synth_driver::synth::{NoiseSynth, SineSynth};
use synth_driver::{Driver, DriverConfig, DriverMode, Producer, SampleFormat, SimulatedPlatform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SignalArg {
    Sine,
    Noise,
}

/// Synth Driver - drive a simulated audio queue at hardware rate
#[derive(Parser)]
#[command(name = "synth-driver")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scheduling mode (push | pull)
    #[arg(short, long, default_value = "pull")]
    mode: DriverMode,

    /// Sample format handed to the producer (s16 | float)
    #[arg(short, long, default_value = "s16")]
    format: SampleFormat,

    /// Frames per buffer
    #[arg(short, long, default_value = "64")]
    period: usize,

    /// Sample rate in Hz
    #[arg(short, long, default_value = "44100")]
    rate: u32,

    /// Realtime priority hint for the pull thread (0 disables)
    #[arg(long, default_value = "60")]
    priority: i32,

    /// Use a split (left/right) producer; push mode with float format only
    #[arg(long)]
    split: bool,

    /// Test signal
    #[arg(long, value_enum, default_value = "sine")]
    signal: SignalArg,

    /// Sine frequency in Hz
    #[arg(long, default_value = "440")]
    frequency: f32,

    /// Output amplitude (0.0 - 1.0)
    #[arg(short, long, default_value = "0.2")]
    amplitude: f32,

    /// Run time in seconds (0 = until Ctrl+C)
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Make every Nth enqueue fail
    #[arg(long)]
    fail_every: Option<u64>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let config = DriverConfig {
        period_size: cli.period,
        sample_rate: cli.rate,
        realtime_priority: cli.priority,
        sample_format: cli.format,
        mode: cli.mode,
        ..Default::default()
    };

    let mut platform = SimulatedPlatform::new().realtime(cli.period);
    if let Some(n) = cli.fail_every {
        platform = platform.fail_every(n);
    }
    let platform = Arc::new(platform);

    let producer = build_producer(&cli);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut driver = Driver::new(config, platform.clone(), producer)?;

    println!(
        "Synth Driver - {} mode, {} format, {} frames @ {} Hz",
        driver.mode(),
        driver.config().sample_format,
        driver.config().period_size,
        driver.config().sample_rate
    );
    if cli.duration == 0 {
        println!("Press Ctrl+C to stop.\n");
    }

    let start = Instant::now();
    let limit = (cli.duration > 0).then(|| Duration::from_secs(cli.duration));
    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    let report = driver.report();
    driver.shutdown();

    println!("{}", report);
    println!(
        "Played {} frames ({} bytes) in {:.2}s, {} completions, {} underruns",
        platform.played_frames(),
        platform.played_bytes(),
        start.elapsed().as_secs_f64(),
        platform.completions(),
        platform.underruns()
    );

    Ok(())
}

fn build_producer(cli: &Cli) -> Producer {
    match (cli.signal, cli.split) {
        (SignalArg::Sine, false) => {
            Producer::direct(SineSynth::new(cli.frequency, cli.amplitude, cli.rate))
        }
        (SignalArg::Sine, true) => {
            Producer::split(SineSynth::new(cli.frequency, cli.amplitude, cli.rate))
        }
        (SignalArg::Noise, false) => Producer::direct(NoiseSynth::new(cli.amplitude)),
        (SignalArg::Noise, true) => Producer::split(NoiseSynth::new(cli.amplitude)),
    }
}
