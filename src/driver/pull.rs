//! Pull 模式：专用工作线程按硬件速率生产
//!
//! 循环：等待节拍 → 生产 → 提交。
//! 节拍由 `PacingClock` 维护，落后时不补偿、不突发。
//! 取消后最多再走完一个周期即退出，退出时释放缓冲区和生产者

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_utils::CachePadded;

use crate::audio::buffer::BufferSet;
use crate::audio::pacing::PacingClock;
use crate::audio::timing::MonotonicClock;
use crate::producer::{ProducedSample, Producer};

use super::submit::QueueWriter;
use super::DriverError;

/// 取消标志
///
/// 关闭方写入（Release），工作线程读取（Acquire）
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<CachePadded<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// 运行中的 pull 工作线程
#[derive(Debug)]
pub(crate) struct PullWorker {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PullWorker {
    /// 启动工作线程
    ///
    /// 缓冲区在调用线程上分配，分配失败直接返回错误，不会启动线程
    pub fn spawn<T, C>(
        frames: usize,
        sample_rate: u32,
        realtime_priority: i32,
        producer: Producer,
        writer: QueueWriter,
        clock: C,
    ) -> Result<Self, DriverError>
    where
        T: ProducedSample,
        C: MonotonicClock + 'static,
    {
        let buffers =
            BufferSet::<T>::interleaved(frames).map_err(DriverError::buffer(frames))?;
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let handle = thread::Builder::new()
            .name("synth-pull".to_string())
            .spawn(move || {
                set_realtime_priority(realtime_priority);
                let pacer = PacingClock::new(frames, sample_rate);
                run_loop(pacer, buffers, producer, &writer, &clock, &worker_token);
            })
            .map_err(DriverError::SpawnWorker)?;

        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    /// 取消并等待线程退出，可重复调用
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Pull worker panicked");
            }
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PullWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<T, C>(
    mut pacer: PacingClock,
    mut buffers: BufferSet<T>,
    mut producer: Producer,
    writer: &QueueWriter,
    clock: &C,
    token: &CancellationToken,
) where
    T: ProducedSample,
    C: MonotonicClock + ?Sized,
{
    log::debug!(
        "Pull worker started: {} frames, interval {}µs",
        pacer.frames_per_buffer(),
        pacer.interval_us()
    );

    let stats = writer.stats();
    while !token.is_cancelled() {
        let pace = pacer.wait(clock);
        stats.record_pace(&pace);
        stats.on_cycle();

        if let Err(e) = producer.render(&mut buffers) {
            writer.report_produce_error(e);
        }

        writer.submit(buffers.pcm());
    }

    log::info!("Pull worker finished after {} cycles", stats.cycles());
}

/// 尝试把当前线程提升为实时调度
///
/// 优先 SCHED_FIFO，失败时退回 nice 值。`priority <= 0` 表示不调整
pub fn set_realtime_priority(priority: i32) {
    if priority <= 0 {
        return;
    }

    #[cfg(unix)]
    unsafe {
        let policy = libc::SCHED_FIFO;
        let min = libc::sched_get_priority_min(policy);
        let max = libc::sched_get_priority_max(policy);

        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority.clamp(min, max.max(min));

        let result = libc::pthread_setschedparam(libc::pthread_self(), policy, &param);
        if result == 0 {
            log::debug!("Realtime priority set: SCHED_FIFO {}", param.sched_priority);
        } else {
            log::debug!(
                "Failed to set realtime priority (error: {}), using default scheduling",
                result
            );
            libc::setpriority(libc::PRIO_PROCESS, 0, -10);
        }
    }
}
