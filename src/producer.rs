//! 样本生产者接口
//!
//! 两种形态：
//! - direct: 直接写入交织输出缓冲区
//! - split: 写入左右两个单声道缓冲区，由驱动负责交织
//!
//! 生产者自身持有合成所需的上下文，运行在回调线程或 pull 线程上，
//! 不允许阻塞在 I/O 上

use crate::audio::buffer::BufferSet;
use crate::audio::format::{Sample, SampleFormat};

/// direct 形态：按逻辑格式填充交织缓冲区
///
/// `out.len() == frames * 2`
pub trait SampleProducer: Send {
    fn fill_i16(&mut self, frames: usize, out: &mut [i16]);

    fn fill_f32(&mut self, frames: usize, out: &mut [f32]);
}

/// split 形态：填充左右声道（只支持 float）
pub trait SplitProducer: Send {
    fn fill_split(&mut self, frames: usize, left: &mut [f32], right: &mut [f32]);
}

impl<F> SplitProducer for F
where
    F: FnMut(usize, &mut [f32], &mut [f32]) + Send,
{
    fn fill_split(&mut self, frames: usize, left: &mut [f32], right: &mut [f32]) {
        self(frames, left, right)
    }
}

/// 生产错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProduceError {
    #[error("split producer is not supported when sample format is '{0}'")]
    UnsupportedSplitFormat(SampleFormat),

    #[error("split producer requires scratch buffers")]
    MissingScratch,
}

/// 驱动使用的生产者
pub enum Producer {
    Direct(Box<dyn SampleProducer>),
    Split(Box<dyn SplitProducer>),
}

impl Producer {
    pub fn direct<P: SampleProducer + 'static>(producer: P) -> Self {
        Self::Direct(Box::new(producer))
    }

    pub fn split<P: SplitProducer + 'static>(producer: P) -> Self {
        Self::Split(Box::new(producer))
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split(_))
    }

    /// 生产一个缓冲区
    ///
    /// split 形态先填左右暂存区再交织到输出缓冲区。
    /// 出错时输出缓冲区保持上一周期的内容
    pub fn render<T: ProducedSample>(&mut self, buffers: &mut BufferSet<T>) -> Result<(), ProduceError> {
        let frames = buffers.frames();
        match self {
            Self::Direct(p) => {
                T::fill_direct(p.as_mut(), frames, buffers.output_mut());
                Ok(())
            }
            Self::Split(p) => {
                let (left, right) = buffers.scratch_mut().ok_or(ProduceError::MissingScratch)?;
                T::fill_split(p.as_mut(), frames, left, right)?;
                buffers.interleave_scratch();
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("Producer::Direct"),
            Self::Split(_) => f.write_str("Producer::Split"),
        }
    }
}

/// 把生产者调用分派到对应格式的方法
pub trait ProducedSample: Sample {
    fn fill_direct(producer: &mut dyn SampleProducer, frames: usize, out: &mut [Self]);

    fn fill_split(
        producer: &mut dyn SplitProducer,
        frames: usize,
        left: &mut [Self],
        right: &mut [Self],
    ) -> Result<(), ProduceError>;
}

impl ProducedSample for i16 {
    #[inline]
    fn fill_direct(producer: &mut dyn SampleProducer, frames: usize, out: &mut [Self]) {
        producer.fill_i16(frames, out);
    }

    fn fill_split(
        _producer: &mut dyn SplitProducer,
        _frames: usize,
        _left: &mut [Self],
        _right: &mut [Self],
    ) -> Result<(), ProduceError> {
        Err(ProduceError::UnsupportedSplitFormat(SampleFormat::Int16))
    }
}

impl ProducedSample for f32 {
    #[inline]
    fn fill_direct(producer: &mut dyn SampleProducer, frames: usize, out: &mut [Self]) {
        producer.fill_f32(frames, out);
    }

    #[inline]
    fn fill_split(
        producer: &mut dyn SplitProducer,
        frames: usize,
        left: &mut [Self],
        right: &mut [Self],
    ) -> Result<(), ProduceError> {
        producer.fill_split(frames, left, right);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 输出递增序号的 direct 生产者
    struct Counter(i32);

    impl SampleProducer for Counter {
        fn fill_i16(&mut self, _frames: usize, out: &mut [i16]) {
            for s in out.iter_mut() {
                *s = self.0 as i16;
                self.0 += 1;
            }
        }

        fn fill_f32(&mut self, _frames: usize, out: &mut [f32]) {
            for s in out.iter_mut() {
                *s = self.0 as f32;
                self.0 += 1;
            }
        }
    }

    #[test]
    fn test_direct_render_i16() {
        let mut producer = Producer::direct(Counter(0));
        let mut buffers = BufferSet::<i16>::interleaved(3).unwrap();

        producer.render(&mut buffers).unwrap();
        assert_eq!(buffers.output(), &[0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_direct_render_f32() {
        let mut producer = Producer::direct(Counter(10));
        let mut buffers = BufferSet::<f32>::interleaved(2).unwrap();

        producer.render(&mut buffers).unwrap();
        assert_eq!(buffers.output(), &[10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_split_render_interleaves() {
        let mut producer = Producer::split(|frames: usize, left: &mut [f32], right: &mut [f32]| {
            for i in 0..frames {
                left[i] = i as f32;
                right[i] = -(i as f32) - 0.5;
            }
        });
        let mut buffers = BufferSet::<f32>::with_scratch(3).unwrap();

        producer.render(&mut buffers).unwrap();
        assert_eq!(buffers.output(), &[0.0, -0.5, 1.0, -1.5, 2.0, -2.5]);
    }

    #[test]
    fn test_split_render_i16_unsupported() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let mut producer = Producer::split(move |_: usize, _: &mut [f32], _: &mut [f32]| {
            flag.store(true, Ordering::SeqCst);
        });
        let mut buffers = BufferSet::<i16>::with_scratch(4).unwrap();
        buffers.output_mut().fill(9);

        let err = producer.render(&mut buffers).unwrap_err();
        assert_eq!(err, ProduceError::UnsupportedSplitFormat(SampleFormat::Int16));

        // 上一周期的内容保持不变
        assert!(buffers.output().iter().all(|&s| s == 9));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_split_without_scratch() {
        let mut producer = Producer::split(|_: usize, _: &mut [f32], _: &mut [f32]| {});
        let mut buffers = BufferSet::<f32>::interleaved(4).unwrap();
        assert_eq!(
            producer.render(&mut buffers),
            Err(ProduceError::MissingScratch)
        );
    }
}
