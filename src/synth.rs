//! 内置信号源
//!
//! 命令行和测试用的两个生产者：正弦波和白噪声

use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::audio::format::{Sample, NUM_CHANNELS};
use crate::producer::{SampleProducer, SplitProducer};

/// 正弦波
///
/// 左右声道相同；split 形态下右声道反相
#[derive(Clone, Debug)]
pub struct SineSynth {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl SineSynth {
    pub fn new(frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        let step = if sample_rate > 0 {
            frequency / sample_rate as f32
        } else {
            0.0
        };
        Self {
            phase: 0.0,
            step,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }

    #[inline]
    fn next_value(&mut self) -> f32 {
        let value = (self.phase * TAU).sin() * self.amplitude;
        self.phase = (self.phase + self.step).fract();
        value
    }

    fn fill<T: Sample>(&mut self, frames: usize, out: &mut [T]) {
        for frame in out.chunks_exact_mut(NUM_CHANNELS).take(frames) {
            frame.fill(T::from_f32(self.next_value()));
        }
    }
}

impl SampleProducer for SineSynth {
    fn fill_i16(&mut self, frames: usize, out: &mut [i16]) {
        self.fill(frames, out);
    }

    fn fill_f32(&mut self, frames: usize, out: &mut [f32]) {
        self.fill(frames, out);
    }
}

impl SplitProducer for SineSynth {
    fn fill_split(&mut self, frames: usize, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()).take(frames) {
            let value = self.next_value();
            *l = value;
            *r = -value;
        }
    }
}

/// 均匀分布白噪声
#[derive(Clone, Debug)]
pub struct NoiseSynth {
    rng: StdRng,
    amplitude: f32,
}

impl NoiseSynth {
    pub fn new(amplitude: f32) -> Self {
        Self::with_rng(StdRng::from_entropy(), amplitude)
    }

    /// 固定种子，输出可复现
    pub fn seeded(seed: u64, amplitude: f32) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), amplitude)
    }

    fn with_rng(rng: StdRng, amplitude: f32) -> Self {
        Self {
            rng,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }

    fn fill<T: Sample>(&mut self, frames: usize, out: &mut [T]) {
        for s in out.iter_mut().take(frames * NUM_CHANNELS) {
            let value: f32 = self.rng.gen_range(-1.0..=1.0);
            *s = T::from_f32(value * self.amplitude);
        }
    }
}

impl SampleProducer for NoiseSynth {
    fn fill_i16(&mut self, frames: usize, out: &mut [i16]) {
        self.fill(frames, out);
    }

    fn fill_f32(&mut self, frames: usize, out: &mut [f32]) {
        self.fill(frames, out);
    }
}

impl SplitProducer for NoiseSynth {
    fn fill_split(&mut self, frames: usize, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()).take(frames) {
            *l = self.rng.gen_range(-1.0f32..=1.0) * self.amplitude;
            *r = self.rng.gen_range(-1.0f32..=1.0) * self.amplitude;
        }
    }
}
