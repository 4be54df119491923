//! 音频核心模块
//!
//! 包含：
//! - Format: 样本格式、PCM 描述与交织
//! - Buffer: 预分配的输出/暂存缓冲区
//! - Timing: 单调时钟
//! - Pacing: pull 模式节拍
//! - Stats: 驱动统计

pub mod buffer;
pub mod format;
pub mod pacing;
pub mod stats;
pub mod timing;

pub use buffer::BufferSet;
pub use format::{PcmBuffer, PcmDescriptor, PcmSlice, Sample, SampleFormat};
pub use pacing::{Pace, PacingClock};
pub use stats::{DriverStats, StatsReport};
pub use timing::{MonotonicClock, SystemClock};
