//! 单调时钟
//!
//! 所有时间戳相对进程内第一次取时的时刻（epoch），因此 0 永远不会
//! 作为有效时间戳出现，可以用来表示“尚未建立”

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// 进程内时间原点（全局缓存，只初始化一次）
static EPOCH: OnceLock<Instant> = OnceLock::new();

#[inline]
fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// 获取当前时间（纳秒），至少为 1
#[inline]
pub fn now_ns() -> u64 {
    let elapsed = epoch().elapsed().as_nanos() as u64;
    elapsed.max(1)
}

/// 获取当前时间（微秒），至少为 1
#[inline]
pub fn now_us() -> u64 {
    (now_ns() / 1_000).max(1)
}

/// 时间源
///
/// pull 循环通过它读时间和睡眠，测试中用模拟时钟替换
pub trait MonotonicClock: Send {
    /// 当前单调时间（微秒）
    fn now_us(&self) -> u64;

    /// 睡眠指定微秒数
    fn sleep_us(&self, us: u64);
}

/// 系统单调时钟
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    #[inline]
    fn now_us(&self) -> u64 {
        now_us()
    }

    fn sleep_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

/// 手动推进的时钟（测试用）
///
/// 睡眠只推进时间，不真正阻塞；克隆体共享同一时间线
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub(crate) struct ManualClock {
    now: std::sync::Arc<std::sync::atomic::AtomicU64>,
    slept: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn starting_at(us: u64) -> Self {
        let clock = Self::default();
        clock.set(us);
        clock
    }

    pub fn set(&self, us: u64) {
        self.now.store(us, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, std::sync::atomic::Ordering::SeqCst);
    }

    /// 累计睡眠时间
    pub fn total_slept_us(&self) -> u64 {
        self.slept.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl MonotonicClock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn sleep_us(&self, us: u64) {
        self.slept.fetch_add(us, std::sync::atomic::Ordering::SeqCst);
        self.advance(us);
    }
}
