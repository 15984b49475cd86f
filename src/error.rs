//! Error types (thiserror-based).

use std::path::PathBuf;

use thiserror::Error;

/// Failure to open or run a media decode pipeline.
///
/// Fatal to the pipeline instance that produced it, never to the clock or
/// other pipelines.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported media: {0}")]
    Unsupported(String),

    #[error("no audio track found")]
    NoAudioTrack,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("seek to start failed: {0}")]
    Seek(String),

    #[error("no media opened")]
    NotOpened,

    #[error("decode thread is already running")]
    AlreadyRunning,

    #[error("failed to spawn decode thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Resampler(#[from] ResamplerError),
}

/// Resampler configuration failure, raised while opening a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResamplerError {
    #[error("invalid sample rate conversion {from} Hz -> {to} Hz")]
    InvalidRate { from: u32, to: u32 },

    #[error("invalid channel count {0}")]
    InvalidChannels(usize),
}

/// An audio or MIDI device could not be used.
///
/// Reported through status callbacks and recoverable by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("unsupported device configuration: {0}")]
    Config(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("device support not compiled in (enable the `{0}` feature)")]
    Unavailable(&'static str),
}

#[derive(Error, Debug)]
pub enum ClockError {
    /// A source switch found the previous source still holding resources.
    #[error("clock source conflict: {live} source handle(s) still live after teardown")]
    SourceConflict { live: usize },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("time broadcast socket error: {0}")]
    Broadcast(#[from] std::io::Error),

    #[error("failed to spawn clock thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown timecode type code {0}")]
    UnknownTimecodeType(u8),
}

/// Umbrella error for callers that drive several components.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resampler_error_converts_into_decode_error() {
        let err: DecodeError = ResamplerError::InvalidRate { from: 0, to: 48000 }.into();
        assert!(matches!(err, DecodeError::Resampler(_)));
        assert_eq!(err.to_string(), "invalid sample rate conversion 0 Hz -> 48000 Hz");
    }

    #[test]
    fn source_conflict_display() {
        let err = ClockError::SourceConflict { live: 2 };
        assert_eq!(
            err.to_string(),
            "clock source conflict: 2 source handle(s) still live after teardown"
        );
    }

    #[test]
    fn io_error_converts_into_clock_error() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        let err: ClockError = io.into();
        assert!(matches!(err, ClockError::Broadcast(_)));
    }

    #[test]
    fn umbrella_wraps_components() {
        let err: Error = DeviceError::NotFound("hw:1".into()).into();
        assert_eq!(err.to_string(), "device not found: hw:1");
    }
}
