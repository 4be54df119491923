//! 缓冲区提交
//!
//! push 回调和 pull 循环共用的提交策略：
//! - 提交失败不重试、不中止，下一个周期就是重试
//! - 失败只计数，日志降频输出
//! - 连续失败达到阈值时输出一次 error 日志

use std::sync::Arc;

use crate::audio::format::PcmSlice;
use crate::audio::stats::DriverStats;
use crate::platform::{AudioPlatform, PlayerId};
use crate::producer::ProduceError;

/// 每 N 次失败输出一次日志
const LOG_EVERY: u64 = 256;

/// 向 player 缓冲队列提交数据
#[derive(Clone)]
pub(crate) struct QueueWriter {
    platform: Arc<dyn AudioPlatform>,
    player: PlayerId,
    stats: Arc<DriverStats>,
    /// 连续失败告警阈值，0 表示不告警
    alert_threshold: u64,
}

impl QueueWriter {
    pub fn new(
        platform: Arc<dyn AudioPlatform>,
        player: PlayerId,
        stats: Arc<DriverStats>,
        alert_threshold: u64,
    ) -> Self {
        Self {
            platform,
            player,
            stats,
            alert_threshold,
        }
    }

    #[inline]
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// 提交一个缓冲区，返回是否被接受
    pub fn submit(&self, pcm: PcmSlice<'_>) -> bool {
        match self.platform.enqueue(self.player, pcm) {
            Ok(()) => {
                let run = self.stats.consecutive_failures();
                self.stats.record_submitted();
                if self.alert_threshold > 0 && run >= self.alert_threshold {
                    log::info!("Enqueue recovered after {} consecutive failures", run);
                }
                true
            }
            Err(e) => {
                let (total, run) = self.stats.record_submit_failure();
                if total == 1 || total % LOG_EVERY == 0 {
                    log::warn!("Enqueue failed ({} failures so far): {}", total, e);
                }
                if self.alert_threshold > 0 && run == self.alert_threshold {
                    log::error!(
                        "{} consecutive enqueue failures, output is probably stalled",
                        run
                    );
                }
                false
            }
        }
    }

    /// 本周期未能生产，输出缓冲区保持旧内容
    pub fn report_produce_error(&self, err: ProduceError) {
        let skipped = self.stats.record_skipped_production();
        if skipped == 1 || skipped % LOG_EVERY == 0 {
            log::error!("{} (skipped {} cycles)", err, skipped);
        }
    }
}
