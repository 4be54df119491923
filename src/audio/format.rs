//! 样本格式和交织
//!
//! 逻辑格式只有两种：
//! - Int16: 有符号 16-bit 整数
//! - Float: 32-bit 浮点，范围 [-1.0, 1.0]
//!
//! 平台输出路径固定为 16-bit 小端 PCM 容器，逻辑格式只决定
//! producer 的驱动方式，以及提交前如何换算到输出容器

use std::fmt;
use std::str::FromStr;

/// 声道数（固定立体声）
pub const NUM_CHANNELS: usize = 2;

/// 扬声器位置掩码
pub const SPEAKER_FRONT_LEFT: u32 = 0x1;
pub const SPEAKER_FRONT_RIGHT: u32 = 0x2;

/// 逻辑样本格式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16-bit 整数
    #[default]
    Int16,
    /// 32-bit 浮点
    Float,
}

impl SampleFormat {
    /// 每样本字节数
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => std::mem::size_of::<i16>(),
            Self::Float => std::mem::size_of::<f32>(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Int16 => "16bits",
            Self::Float => "float",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "16bits" | "s16" | "int16" => Ok(Self::Int16),
            "float" | "f32" => Ok(Self::Float),
            other => Err(format!("unknown sample format '{}'", other)),
        }
    }
}

/// 字节序
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// 平台输出格式描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmDescriptor {
    pub channels: u16,
    pub sample_rate: u32,
    /// 样本容器位宽
    pub container_bits: u16,
    pub byte_order: ByteOrder,
    pub channel_mask: u32,
}

impl PcmDescriptor {
    /// 立体声 16-bit 小端输出格式
    ///
    /// 无论逻辑格式是 Int16 还是 Float，平台侧都按此格式播放
    pub fn stereo_s16(sample_rate: u32) -> Self {
        Self {
            channels: NUM_CHANNELS as u16,
            sample_rate,
            container_bits: 16,
            byte_order: ByteOrder::LittleEndian,
            channel_mask: SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT,
        }
    }

    /// 采样率（毫赫兹，平台接口使用此单位），溢出 u32 时返回 None
    #[inline]
    pub fn sample_rate_millihertz(&self) -> Option<u32> {
        self.sample_rate.checked_mul(1000)
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        (self.container_bits as usize / 8) * self.channels as usize
    }
}

/// 驱动支持的样本类型
///
/// 通过这个 trait 把 int16/float 两条路径合并成一份泛型代码
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + 'static {
    const FORMAT: SampleFormat;

    /// 从 [-1.0, 1.0] 浮点换算（越界时截断）
    fn from_f32(value: f32) -> Self;

    /// 换算到 16-bit 输出容器
    fn to_i16(self) -> i16;

    /// 包装为带格式标记的 PCM 视图
    fn pcm(buf: &[Self]) -> PcmSlice<'_>;
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::Int16;

    #[inline]
    fn from_f32(value: f32) -> Self {
        let clamped = value.clamp(-1.0, 1.0);
        (clamped * i16::MAX as f32).round() as i16
    }

    #[inline]
    fn to_i16(self) -> i16 {
        self
    }

    #[inline]
    fn pcm(buf: &[Self]) -> PcmSlice<'_> {
        PcmSlice::Int16(buf)
    }
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::Float;

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_i16(self) -> i16 {
        i16::from_f32(self)
    }

    #[inline]
    fn pcm(buf: &[Self]) -> PcmSlice<'_> {
        PcmSlice::Float(buf)
    }
}

/// 提交给平台队列的交织 PCM 数据（借用）
#[derive(Clone, Copy, Debug)]
pub enum PcmSlice<'a> {
    Int16(&'a [i16]),
    Float(&'a [f32]),
}

impl<'a> PcmSlice<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            Self::Int16(_) => SampleFormat::Int16,
            Self::Float(_) => SampleFormat::Float,
        }
    }

    /// 样本数（所有声道合计）
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Int16(s) => s.len(),
            Self::Float(s) => s.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 帧数
    #[inline]
    pub fn frames(&self) -> usize {
        self.len() / NUM_CHANNELS
    }

    /// 提交长度（字节）
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len() * self.format().bytes_per_sample()
    }

    /// 按 16-bit 小端容器编码，追加到 `out`
    pub fn write_s16_le(&self, out: &mut Vec<u8>) {
        out.reserve(self.len() * 2);
        match self {
            Self::Int16(s) => {
                for &v in s.iter() {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            Self::Float(s) => {
                for &v in s.iter() {
                    out.extend_from_slice(&v.to_i16().to_le_bytes());
                }
            }
        }
    }

    pub fn to_buffer(&self) -> PcmBuffer {
        match self {
            Self::Int16(s) => PcmBuffer::Int16(s.to_vec()),
            Self::Float(s) => PcmBuffer::Float(s.to_vec()),
        }
    }
}

/// 拥有所有权的 PCM 数据（平台侧缓存/录制用）
#[derive(Clone, Debug, PartialEq)]
pub enum PcmBuffer {
    Int16(Vec<i16>),
    Float(Vec<f32>),
}

impl PcmBuffer {
    pub fn as_slice(&self) -> PcmSlice<'_> {
        match self {
            Self::Int16(v) => PcmSlice::Int16(v),
            Self::Float(v) => PcmSlice::Float(v),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::Float(v) => Some(v),
            Self::Int16(_) => None,
        }
    }

    pub fn as_i16(&self) -> Option<&[i16]> {
        match self {
            Self::Int16(v) => Some(v),
            Self::Float(_) => None,
        }
    }
}

/// 将左右声道交织写入 `out`：L0 R0 L1 R1 ...
///
/// 返回写入的帧数（取三者最短）
#[inline]
pub fn interleave<T: Sample>(left: &[T], right: &[T], out: &mut [T]) -> usize {
    let frames = left.len().min(right.len()).min(out.len() / NUM_CHANNELS);

    for (frame, (&l, &r)) in out
        .chunks_exact_mut(NUM_CHANNELS)
        .zip(left.iter().zip(right.iter()))
        .take(frames)
    {
        frame[0] = l;
        frame[1] = r;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_i16() {
        let left: Vec<i16> = (0..8).map(|i| i * 10).collect();
        let right: Vec<i16> = (0..8).map(|i| -(i * 10) - 1).collect();
        let mut out = vec![0i16; 16];

        assert_eq!(interleave(&left, &right, &mut out), 8);

        let expected: Vec<i16> = left
            .iter()
            .zip(right.iter())
            .flat_map(|(&l, &r)| [l, r])
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_interleave_f32() {
        let left = [0.1f32, 0.2, 0.3];
        let right = [-0.1f32, -0.2, -0.3];
        let mut out = [0.0f32; 6];

        assert_eq!(interleave(&left, &right, &mut out), 3);
        assert_eq!(out, [0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
    }

    #[test]
    fn test_interleave_short_output() {
        // 输出只够 2 帧，剩余输入被忽略
        let left = [1i16, 2, 3];
        let right = [4i16, 5, 6];
        let mut out = [0i16; 5];

        assert_eq!(interleave(&left, &right, &mut out), 2);
        assert_eq!(out, [1, 4, 2, 5, 0]);
    }

    #[test]
    fn test_float_to_i16_clamps() {
        assert_eq!(i16::from_f32(0.0), 0);
        assert_eq!(i16::from_f32(1.0), i16::MAX);
        assert_eq!(i16::from_f32(4.0), i16::MAX);
        assert_eq!(i16::from_f32(-4.0), -i16::MAX);
        assert_eq!(0.5f32.to_i16(), 16384);
    }

    #[test]
    fn test_pcm_slice_lengths() {
        let floats = [0.0f32; 8];
        let pcm = f32::pcm(&floats);
        assert_eq!(pcm.frames(), 4);
        assert_eq!(pcm.byte_len(), 32);

        let shorts = [0i16; 8];
        assert_eq!(i16::pcm(&shorts).byte_len(), 16);
    }

    #[test]
    fn test_write_s16_le() {
        let floats = [1.0f32, -1.0];
        let mut bytes = Vec::new();
        f32::pcm(&floats).write_s16_le(&mut bytes);
        assert_eq!(bytes, [0xFF, 0x7F, 0x01, 0x80]);
    }

    #[test]
    fn test_descriptor() {
        let desc = PcmDescriptor::stereo_s16(44100);
        assert_eq!(desc.bytes_per_frame(), 4);
        assert_eq!(desc.sample_rate_millihertz(), Some(44_100_000));
        assert_eq!(desc.byte_order, ByteOrder::LittleEndian);
        assert_eq!(PcmDescriptor::stereo_s16(4_294_968).sample_rate_millihertz(), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("float".parse::<SampleFormat>(), Ok(SampleFormat::Float));
        assert_eq!("16bits".parse::<SampleFormat>(), Ok(SampleFormat::Int16));
        assert!("s24".parse::<SampleFormat>().is_err());
    }
}
