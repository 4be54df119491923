//! 驱动配置

use std::fmt;
use std::str::FromStr;

use crate::audio::format::{PcmDescriptor, SampleFormat};

use super::DriverError;

/// 默认每缓冲区帧数
pub const DEFAULT_PERIOD_SIZE: usize = 64;
/// 默认采样率
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
/// 默认实时优先级提示
pub const DEFAULT_REALTIME_PRIORITY: i32 = 60;
/// 默认连续提交失败告警阈值
pub const DEFAULT_FAILURE_ALERT_THRESHOLD: u64 = 100;

/// 调度模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverMode {
    /// 由完成通知驱动
    Push,
    /// 由专用线程按采样率节拍驱动
    #[default]
    Pull,
}

impl DriverMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for DriverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" | "callback" => Ok(Self::Push),
            "pull" | "thread" => Ok(Self::Pull),
            other => Err(format!("unknown driver mode '{}'", other)),
        }
    }
}

/// 驱动配置（构造时读取，之后不可变）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    /// 每缓冲区帧数
    pub period_size: usize,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 实时优先级提示，`<= 0` 表示不调整（仅 pull 模式使用）
    pub realtime_priority: i32,
    pub sample_format: SampleFormat,
    pub mode: DriverMode,
    /// 连续提交失败达到此次数时输出 error 日志，0 表示关闭
    pub failure_alert_threshold: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            period_size: DEFAULT_PERIOD_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            realtime_priority: DEFAULT_REALTIME_PRIORITY,
            sample_format: SampleFormat::Int16,
            mode: DriverMode::Pull,
            failure_alert_threshold: DEFAULT_FAILURE_ALERT_THRESHOLD,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.period_size == 0 {
            return Err(DriverError::InvalidConfig("period size must be at least 1 frame"));
        }
        if self.sample_rate == 0 {
            return Err(DriverError::InvalidConfig("sample rate must be positive"));
        }
        // 平台接口以毫赫兹传递采样率
        if self.output_format().sample_rate_millihertz().is_none() {
            return Err(DriverError::InvalidConfig("sample rate out of range"));
        }
        Ok(())
    }

    /// 平台侧输出格式
    #[inline]
    pub fn output_format(&self) -> PcmDescriptor {
        PcmDescriptor::stereo_s16(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.period_size, 64);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.realtime_priority, 60);
        assert_eq!(config.sample_format, SampleFormat::Int16);
        assert_eq!(config.mode, DriverMode::Pull);
        assert_eq!(config.output_format().sample_rate_millihertz(), Some(44_100_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let zero_period = DriverConfig {
            period_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero_period.validate(), Err(DriverError::InvalidConfig(_))));

        let zero_rate = DriverConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(zero_rate.validate().is_err());

        let huge_rate = DriverConfig {
            sample_rate: u32::MAX,
            ..Default::default()
        };
        assert!(huge_rate.validate().is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("push".parse::<DriverMode>(), Ok(DriverMode::Push));
        assert_eq!("PULL".parse::<DriverMode>(), Ok(DriverMode::Pull));
        assert!("poll".parse::<DriverMode>().is_err());
        assert_eq!(DriverMode::Push.to_string(), "push");
    }
}
