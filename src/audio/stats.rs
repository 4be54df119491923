//! 驱动统计模块
//!
//! 在完成回调 / pull 循环中收集统计信息，全部是 lock-free 原子操作

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::pacing::Pace;
use super::timing::now_ns;

/// 提交间隔环形缓冲区大小
const INTERVAL_BUFFER_SIZE: usize = 256;

/// 驱动统计收集器
pub struct DriverStats {
    /// 生产周期数（回调次数或循环次数）
    cycles: AtomicU64,
    submitted: AtomicU64,
    submit_failures: AtomicU64,
    /// 当前连续失败次数，成功一次即清零
    consecutive_failures: AtomicU64,
    /// 最长连续失败次数
    max_consecutive_failures: AtomicU64,
    skipped_productions: AtomicU64,

    late_cycles: AtomicU64,
    total_sleep_us: AtomicU64,

    // 提交间隔（纳秒）
    last_submit_ns: AtomicU64,
    interval_buffer: Box<[AtomicU64; INTERVAL_BUFFER_SIZE]>,
    interval_write_idx: AtomicUsize,
}

impl DriverStats {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            submit_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            max_consecutive_failures: AtomicU64::new(0),
            skipped_productions: AtomicU64::new(0),
            late_cycles: AtomicU64::new(0),
            total_sleep_us: AtomicU64::new(0),
            last_submit_ns: AtomicU64::new(0),
            interval_buffer: Box::new(std::array::from_fn(|_| AtomicU64::new(0))),
            interval_write_idx: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn on_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次成功提交
    #[inline]
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let now = now_ns();
        let last = self.last_submit_ns.swap(now, Ordering::Relaxed);
        if last > 0 {
            let idx =
                self.interval_write_idx.fetch_add(1, Ordering::Relaxed) % INTERVAL_BUFFER_SIZE;
            self.interval_buffer[idx].store(now.saturating_sub(last), Ordering::Relaxed);
        }
    }

    /// 记录一次提交失败
    ///
    /// 返回 (累计失败次数, 当前连续失败次数)
    #[inline]
    pub fn record_submit_failure(&self) -> (u64, u64) {
        let total = self.submit_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let run = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_consecutive_failures.fetch_max(run, Ordering::Relaxed);
        (total, run)
    }

    /// 记录一次跳过的生产，返回累计次数
    #[inline]
    pub fn record_skipped_production(&self) -> u64 {
        self.skipped_productions.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn record_pace(&self, pace: &Pace) {
        if pace.sleep_us > 0 {
            self.total_sleep_us.fetch_add(pace.sleep_us, Ordering::Relaxed);
        }
        if pace.lag_us > 0 {
            self.late_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn submit_failures(&self) -> u64 {
        self.submit_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn skipped_productions(&self) -> u64 {
        self.skipped_productions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn late_cycles(&self) -> u64 {
        self.late_cycles.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self, frames_per_buffer: usize, sample_rate: u32) -> StatsReport {
        let expected_interval_ns = if sample_rate > 0 {
            frames_per_buffer as u64 * 1_000_000_000 / sample_rate as u64
        } else {
            0
        };

        let intervals_ns: Vec<u64> = self
            .interval_buffer
            .iter()
            .map(|v| v.load(Ordering::Relaxed))
            .filter(|&v| v > 0)
            .collect();

        let interval_stats = match (intervals_ns.iter().min(), intervals_ns.iter().max()) {
            (Some(&min_ns), Some(&max_ns)) => IntervalStats {
                min_ns,
                max_ns,
                avg_ns: intervals_ns.iter().sum::<u64>() / intervals_ns.len() as u64,
            },
            _ => IntervalStats::default(),
        };

        StatsReport {
            cycles: self.cycles(),
            submitted: self.submitted(),
            submit_failures: self.submit_failures(),
            max_consecutive_failures: self.max_consecutive_failures.load(Ordering::Relaxed),
            skipped_productions: self.skipped_productions(),
            late_cycles: self.late_cycles(),
            total_sleep_us: self.total_sleep_us.load(Ordering::Relaxed),
            expected_interval_ns,
            interval_stats,
        }
    }
}

impl Default for DriverStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计报告
#[derive(Debug)]
pub struct StatsReport {
    pub cycles: u64,
    pub submitted: u64,
    pub submit_failures: u64,
    pub max_consecutive_failures: u64,
    pub skipped_productions: u64,
    pub late_cycles: u64,
    pub total_sleep_us: u64,
    pub expected_interval_ns: u64,
    pub interval_stats: IntervalStats,
}

#[derive(Debug, Default)]
pub struct IntervalStats {
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver Statistics")?;
        writeln!(f, "=================")?;
        writeln!(f, "Cycles: {}", self.cycles)?;
        writeln!(f, "Buffers submitted: {}", self.submitted)?;
        writeln!(
            f,
            "Submit failures: {} (longest run: {})",
            self.submit_failures, self.max_consecutive_failures
        )?;
        writeln!(f, "Skipped productions: {}", self.skipped_productions)?;
        writeln!(f)?;

        writeln!(f, "Submission Timing:")?;
        writeln!(
            f,
            "  Expected: {:.2} ms",
            self.expected_interval_ns as f64 / 1_000_000.0
        )?;
        writeln!(f, "  Measured:")?;
        writeln!(
            f,
            "    Min: {:.2} ms",
            self.interval_stats.min_ns as f64 / 1_000_000.0
        )?;
        writeln!(
            f,
            "    Max: {:.2} ms",
            self.interval_stats.max_ns as f64 / 1_000_000.0
        )?;
        writeln!(
            f,
            "    Avg: {:.2} ms",
            self.interval_stats.avg_ns as f64 / 1_000_000.0
        )?;

        let jitter_ns = self
            .interval_stats
            .max_ns
            .saturating_sub(self.interval_stats.min_ns);
        let jitter_pct = if self.expected_interval_ns > 0 {
            jitter_ns as f64 / self.expected_interval_ns as f64 * 100.0
        } else {
            0.0
        };
        writeln!(
            f,
            "  Jitter: {:.2} ms ({:.1}%)",
            jitter_ns as f64 / 1_000_000.0,
            jitter_pct
        )?;
        writeln!(f)?;

        writeln!(f, "Pacing:")?;
        writeln!(f, "  Late iterations: {}", self.late_cycles)?;
        writeln!(
            f,
            "  Total sleep: {:.1} ms",
            self.total_sleep_us as f64 / 1_000.0
        )?;

        Ok(())
    }
}
