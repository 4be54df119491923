//! Synth Driver Library
//!
//! Buffered-queue audio output driver for a software synthesizer.
//! Push mode reacts to buffer-completion notifications, pull mode runs
//! a dedicated thread paced to the sample rate.

pub mod audio;
pub mod driver;
pub mod platform;
pub mod producer;
pub mod synth;

pub use audio::format::{PcmSlice, Sample, SampleFormat};
pub use driver::{Driver, DriverConfig, DriverError, DriverMode};
pub use platform::{AudioPlatform, PlatformError, SimulatedPlatform};
pub use producer::{Producer, SampleProducer, SplitProducer};
