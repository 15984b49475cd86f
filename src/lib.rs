//! showclock - show timecode clock with clock-locked audio rendering
//!
//! Design principles:
//! - One clock per show, sourced from an internal transport, LTC or MTC
//! - Every consumer reads the same frame number through a `ClockReader`
//! - Audio leaves the pipelines as one 16 bit mono frame per channel per video frame
//! - Frames are stamped ahead of the clock by a fixed lookahead and queued per channel
//! - Parameter changes reach worker threads through message ring buffers

pub mod clock;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
pub mod ring;
pub mod synth;
pub mod timecode;

pub use clock::{ClockEngine, ClockReader, ClockStatus, SourceKind, TimecodeFeed, TransportState};
pub use config::{BroadcastConfig, ClockConfig, PipelineConfig, SourceConfig, SynthConfig};
pub use decode::{DecodePipeline, StreamInfo};
pub use error::{ClockError, ConfigError, DecodeError, DeviceError, Error, Result};
pub use frame::AudioFrame;
pub use ring::{ChannelBuffers, ChannelRingBuffer};
pub use synth::{NoiseCallback, NoiseType, SyntheticSource};
pub use timecode::{TimecodeFrame, TimecodeProfile};
