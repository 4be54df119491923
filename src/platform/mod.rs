//! 平台音频队列接口
//!
//! 驱动把平台音频子系统当作一组不透明对象：
//! engine → output mix → player（绑定 2 槽软件缓冲队列）。
//!
//! 每个对象创建后都要 realize 才能使用，销毁顺序与创建顺序相反。
//! `Scoped` 包装在 Drop 时自动销毁，构造中途失败会精确回收已创建的对象

pub mod simulated;

use std::fmt;
use std::sync::Arc;

use crate::audio::format::{PcmDescriptor, PcmSlice};

pub use simulated::SimulatedPlatform;

/// 缓冲队列槽数
pub const BUFFER_QUEUE_SLOTS: u32 = 2;

/// 平台对象句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EngineId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputMixId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlayerId(pub u64);

/// 任意平台对象
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectId {
    Engine(EngineId),
    OutputMix(OutputMixId),
    Player(PlayerId),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(id) => write!(f, "engine#{}", id.0),
            Self::OutputMix(id) => write!(f, "output-mix#{}", id.0),
            Self::Player(id) => write!(f, "player#{}", id.0),
        }
    }
}

impl From<EngineId> for ObjectId {
    fn from(id: EngineId) -> Self {
        Self::Engine(id)
    }
}

impl From<OutputMixId> for ObjectId {
    fn from(id: OutputMixId) -> Self {
        Self::OutputMix(id)
    }
}

impl From<PlayerId> for ObjectId {
    fn from(id: PlayerId) -> Self {
        Self::Player(id)
    }
}

/// 播放状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
}

/// 播放事件掩码
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayEvents(u32);

impl PlayEvents {
    pub const NONE: Self = Self(0);
    /// 播放头到达队列末尾
    pub const HEAD_AT_END: Self = Self(0x1);
}

/// player 的数据源：软件缓冲队列 + PCM 格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferQueueSource {
    pub slots: u32,
    pub format: PcmDescriptor,
}

/// 缓冲区消耗完成通知
///
/// 平台保证同一 player 的通知串行投递，不会重入
pub type CompletionCallback = Box<dyn FnMut() + Send + 'static>;

/// 平台错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("failed to create {0}")]
    CreateFailed(&'static str),

    #[error("failed to realize {0}")]
    RealizeFailed(ObjectId),

    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("unsupported data format: {0}")]
    UnsupportedFormat(String),

    #[error("buffer queue full")]
    BufferQueueFull,

    #[error("operation rejected: {0}")]
    Rejected(&'static str),
}

/// 平台音频队列能力
///
/// `enqueue` 返回前必须完成对 `buffer` 的拷贝或消费；
/// `destroy` 一个 player 时必须丢弃其完成回调，之后不得再投递通知
pub trait AudioPlatform: Send + Sync {
    fn create_engine(&self) -> Result<EngineId, PlatformError>;

    fn create_output_mix(&self, engine: EngineId) -> Result<OutputMixId, PlatformError>;

    fn create_player(
        &self,
        engine: EngineId,
        output_mix: OutputMixId,
        source: &BufferQueueSource,
    ) -> Result<PlayerId, PlatformError>;

    /// 同步 realize 对象
    fn realize(&self, object: ObjectId) -> Result<(), PlatformError>;

    fn register_callback(
        &self,
        player: PlayerId,
        callback: CompletionCallback,
    ) -> Result<(), PlatformError>;

    fn set_event_mask(&self, player: PlayerId, events: PlayEvents) -> Result<(), PlatformError>;

    fn set_play_state(&self, player: PlayerId, state: PlayState) -> Result<(), PlatformError>;

    /// 提交一个缓冲区；队列满时返回 `BufferQueueFull`
    fn enqueue(&self, player: PlayerId, buffer: PcmSlice<'_>) -> Result<(), PlatformError>;

    fn destroy(&self, object: ObjectId);
}

/// 作用域内持有的平台对象
///
/// Drop 时调用 `destroy`
pub struct Scoped<H: Into<ObjectId> + Copy> {
    platform: Arc<dyn AudioPlatform>,
    handle: H,
}

impl<H: Into<ObjectId> + Copy> Scoped<H> {
    /// 接管一个已创建的对象，随后 realize；realize 失败时对象立即被销毁
    pub fn realize(platform: &Arc<dyn AudioPlatform>, handle: H) -> Result<Self, PlatformError> {
        let scoped = Self {
            platform: Arc::clone(platform),
            handle,
        };
        platform.realize(handle.into())?;
        log::debug!("Realized {}", handle.into());
        Ok(scoped)
    }

    #[inline]
    pub fn id(&self) -> H {
        self.handle
    }
}

impl<H: Into<ObjectId> + Copy> Drop for Scoped<H> {
    fn drop(&mut self) {
        let object = self.handle.into();
        self.platform.destroy(object);
        log::debug!("Destroyed {}", object);
    }
}

impl<H: Into<ObjectId> + Copy + fmt::Debug> fmt::Debug for Scoped<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scoped").field(&self.handle).finish()
    }
}
