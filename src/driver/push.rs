//! Push 模式：完成通知驱动
//!
//! 平台每播完一个缓冲区就调用一次回调，回调内同步生产并提交下一个。
//! 回调状态（生产者 + 缓冲区）由平台持有的闭包独占，player 销毁时
//! 随闭包一起释放，因此缓冲区不会早于队列释放

use std::sync::Arc;

use crate::audio::buffer::BufferSet;
use crate::platform::{AudioPlatform, CompletionCallback, PlayEvents, PlayState, PlayerId};
use crate::producer::{ProducedSample, Producer};

use super::submit::QueueWriter;
use super::DriverError;

/// 单个完成回调的全部状态
pub(crate) struct PushCycle<T: ProducedSample> {
    producer: Producer,
    buffers: BufferSet<T>,
    writer: QueueWriter,
}

impl<T: ProducedSample> PushCycle<T> {
    pub fn new(producer: Producer, frames: usize, writer: QueueWriter) -> Result<Self, DriverError> {
        let buffers = if producer.is_split() {
            BufferSet::with_scratch(frames)
        } else {
            BufferSet::interleaved(frames)
        }
        .map_err(DriverError::buffer(frames))?;

        Ok(Self {
            producer,
            buffers,
            writer,
        })
    }

    /// 一个缓冲区播放完毕：生产下一个并提交
    ///
    /// 生产失败时仍提交旧缓冲区，保证通知链不断
    pub fn on_buffer_complete(&mut self) {
        self.writer.stats().on_cycle();

        if let Err(e) = self.producer.render(&mut self.buffers) {
            self.writer.report_produce_error(e);
        }

        self.writer.submit(self.buffers.pcm());
    }

    pub fn into_callback(mut self) -> CompletionCallback {
        Box::new(move || self.on_buffer_complete())
    }
}

/// 注册回调、提交一个静音缓冲区预热队列，然后开始播放
pub(crate) fn start<T: ProducedSample>(
    platform: &Arc<dyn AudioPlatform>,
    player: PlayerId,
    frames: usize,
    producer: Producer,
    writer: QueueWriter,
) -> Result<(), DriverError> {
    let cycle = PushCycle::<T>::new(producer, frames, writer.clone())?;

    platform
        .register_callback(player, cycle.into_callback())
        .map_err(DriverError::platform("register completion callback"))?;

    let silence = BufferSet::<T>::interleaved(frames).map_err(DriverError::buffer(frames))?;
    if !writer.submit(silence.pcm()) {
        log::warn!("Priming enqueue failed, playback starts on the next completion");
    }

    if let Err(e) = platform.set_event_mask(player, PlayEvents::HEAD_AT_END) {
        log::debug!("Failed to set play event mask: {}", e);
    }

    platform
        .set_play_state(player, PlayState::Playing)
        .map_err(DriverError::platform("start playback"))?;

    Ok(())
}
