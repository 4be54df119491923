//! 输出缓冲区管理
//!
//! 一个格式确定的交织输出缓冲区（frames × 2），split producer 额外
//! 持有左右两个单声道暂存区（各 frames）。
//!
//! 所有内存在创建时一次性分配，生产路径上不做任何分配

use std::collections::TryReserveError;

use super::format::{interleave, PcmSlice, Sample, NUM_CHANNELS};

/// 缓冲区分配错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("buffer of {0} frames exceeds the addressable size")]
    TooLarge(usize),

    #[error("allocation failed: {0}")]
    Alloc(#[from] TryReserveError),
}

/// 分配 `len` 个静音样本，分配失败返回错误而不是 abort
pub fn alloc_samples<T: Sample>(len: usize) -> Result<Box<[T]>, TryReserveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, T::default());
    Ok(v.into_boxed_slice())
}

/// 左右声道暂存区
struct ScratchPair<T> {
    left: Box<[T]>,
    right: Box<[T]>,
}

/// 一个生产周期使用的全部缓冲区
pub struct BufferSet<T: Sample> {
    frames: usize,
    output: Box<[T]>,
    scratch: Option<ScratchPair<T>>,
}

impl<T: Sample> BufferSet<T> {
    /// 只分配交织输出缓冲区
    pub fn interleaved(frames: usize) -> Result<Self, BufferError> {
        let samples = frames
            .checked_mul(NUM_CHANNELS)
            .ok_or(BufferError::TooLarge(frames))?;
        Ok(Self {
            frames,
            output: alloc_samples(samples)?,
            scratch: None,
        })
    }

    /// 输出缓冲区 + 左右暂存区
    pub fn with_scratch(frames: usize) -> Result<Self, BufferError> {
        let mut set = Self::interleaved(frames)?;
        set.scratch = Some(ScratchPair {
            left: alloc_samples(frames)?,
            right: alloc_samples(frames)?,
        });
        Ok(set)
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    #[inline]
    pub fn output(&self) -> &[T] {
        &self.output
    }

    #[inline]
    pub fn output_mut(&mut self) -> &mut [T] {
        &mut self.output
    }

    /// 左右暂存区（可变）
    #[inline]
    pub fn scratch_mut(&mut self) -> Option<(&mut [T], &mut [T])> {
        self.scratch
            .as_mut()
            .map(|s| (&mut s.left[..], &mut s.right[..]))
    }

    /// 将暂存区交织到输出缓冲区，返回帧数（无暂存区时为 0）
    pub fn interleave_scratch(&mut self) -> usize {
        match self.scratch.as_ref() {
            Some(s) => interleave(&s.left, &s.right, &mut self.output),
            None => 0,
        }
    }

    /// 以平台提交视图借出输出缓冲区
    #[inline]
    pub fn pcm(&self) -> PcmSlice<'_> {
        T::pcm(&self.output)
    }

    /// 分配的总样本数（含暂存区）
    pub fn allocated_samples(&self) -> usize {
        self.output.len()
            + self
                .scratch
                .as_ref()
                .map_or(0, |s| s.left.len() + s.right.len())
    }
}
