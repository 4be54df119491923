//! Pull 模式节拍时钟
//!
//! 按硬件消耗速率安排下一次提交时间：
//! - 调度锚定在上一次的目标时间上，而不是“现在”，因此不会累积漂移
//! - 领先时睡眠补齐；落后时直接继续，不缩短后续间隔，也不连发追赶

use super::timing::MonotonicClock;

/// 单次节拍结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pace {
    /// 本次需要睡眠的时间（微秒）
    pub sleep_us: u64,
    /// 落后于计划的时间（微秒），领先或准时为 0
    pub lag_us: u64,
}

/// 节拍状态
#[derive(Clone, Debug)]
pub struct PacingClock {
    frames_per_buffer: usize,
    interval_us: u64,
    /// 下一次期望提交时间，0 表示尚未建立
    next_expected_us: u64,
}

impl PacingClock {
    pub fn new(frames_per_buffer: usize, sample_rate: u32) -> Self {
        Self {
            frames_per_buffer,
            interval_us: ideal_interval_us(frames_per_buffer, sample_rate),
            next_expected_us: 0,
        }
    }

    /// 理想的缓冲区间隔（微秒）
    #[inline]
    pub fn interval_us(&self) -> u64 {
        self.interval_us
    }

    #[inline]
    pub fn next_expected_us(&self) -> u64 {
        self.next_expected_us
    }

    #[inline]
    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    /// 以 `now_us` 为当前时间推进一次节拍
    ///
    /// 首次调用只建立计划，不睡眠。之后无论是否需要睡眠，
    /// 下一次期望时间都只前进一个理想间隔
    pub fn pace_at(&mut self, now_us: u64) -> Pace {
        if self.next_expected_us == 0 {
            self.next_expected_us = now_us + self.interval_us;
            return Pace::default();
        }

        let delta = self.next_expected_us as i64 - now_us as i64;
        self.next_expected_us += self.interval_us;

        if delta > 0 {
            Pace {
                sleep_us: delta as u64,
                lag_us: 0,
            }
        } else {
            Pace {
                sleep_us: 0,
                lag_us: delta.unsigned_abs(),
            }
        }
    }

    /// 读取时钟、推进节拍，并在领先时睡眠
    pub fn wait<C: MonotonicClock + ?Sized>(&mut self, clock: &C) -> Pace {
        let pace = self.pace_at(clock.now_us());
        if pace.sleep_us > 0 {
            clock.sleep_us(pace.sleep_us);
        }
        pace
    }
}

/// `frames × 1_000_000 / sample_rate`，整数微秒
#[inline]
pub fn ideal_interval_us(frames_per_buffer: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames_per_buffer as u64 * 1_000_000 / sample_rate as u64
}
