//! Persisted settings for the clock and the frame producers
//!
//! Everything here is plain serde data; the surrounding application decides
//! where it is stored.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::broadcast::{DEFAULT_INTERVAL_MS, DEFAULT_PORT};
use crate::error::ConfigError;
use crate::synth::NoiseType;
use crate::timecode::TimecodeProfile;

/// Rate every producer emits frames at.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;
/// Frames a producer stamps ahead of the clock.
pub const DEFAULT_LOOKAHEAD_FRAMES: i64 = 5;
pub const DEFAULT_LOOP_SETTLE_MS: u64 = 800;
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 3_000;

/// Which source drives the clock.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Free-running transport.
    #[default]
    Internal,
    /// LTC on one channel of an audio input, matched by exact device name.
    Ltc { device: String, channel: u16 },
    /// MTC from the first MIDI port whose name contains `device`.
    Mtc { device: String },
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Send play/pause datagrams while the internal source runs.
    pub enabled: bool,
    /// Destination, 255.255.255.255:34456 by default.
    pub address: SocketAddr,
    /// Time between datagrams. Also the internal ticker's publish period.
    pub interval_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, DEFAULT_PORT)),
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub source: SourceConfig,
    /// Frame rate the counter runs at.
    pub profile: TimecodeProfile,
    pub broadcast: BroadcastConfig,
}

impl ClockConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read the compact settings object used by older project files:
    /// `{"clockSource": 1, "timecodeType": 4, "ltcSettings": {"device": .., "channel": ..}}`.
    ///
    /// Source codes are 0 internal, 1 LTC, 2 MTC. Missing keys fall back to
    /// the defaults.
    pub fn from_settings_value(value: &Value) -> Result<Self, ConfigError> {
        let mut config = ClockConfig::default();

        if let Some(code) = value.get("timecodeType").and_then(Value::as_u64) {
            let code = u8::try_from(code).unwrap_or(u8::MAX);
            config.profile = TimecodeProfile::from_code(code).ok_or(ConfigError::UnknownTimecodeType(code))?;
        }

        let ltc = value.get("ltcSettings");
        let device = |v: Option<&Value>| {
            v.and_then(|v| v.get("device"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        config.source = match value.get("clockSource").and_then(Value::as_u64) {
            Some(1) => SourceConfig::Ltc {
                device: device(ltc),
                channel: ltc
                    .and_then(|v| v.get("channel"))
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok())
                    .unwrap_or(0),
            },
            Some(2) => SourceConfig::Mtc {
                device: device(value.get("mtcSettings")),
            },
            _ => SourceConfig::Internal,
        };
        Ok(config)
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Output rate; sources at other rates are resampled.
    pub target_sample_rate: u32,
    /// Decides chunk length and pacing period. Should match the clock.
    pub profile: TimecodeProfile,
    /// Gain in dB; 0 is unity.
    pub gain_db: f32,
    /// Rewind at end of stream instead of finishing.
    pub looping: bool,
    /// Timestamp of the first chunk, and the pacing band around the clock.
    pub lookahead_frames: i64,
    /// Pause between end of stream and the rewind when looping.
    pub loop_settle_ms: u64,
    /// How long `stop()` waits before warning about a slow decode thread.
    pub stop_timeout_ms: u64,
    /// Frames each channel queue holds.
    pub buffer_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: TARGET_SAMPLE_RATE,
            profile: TimecodeProfile::default(),
            gain_db: 0.0,
            looping: false,
            lookahead_frames: DEFAULT_LOOKAHEAD_FRAMES,
            loop_settle_ms: DEFAULT_LOOP_SETTLE_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            buffer_capacity: crate::ring::DEFAULT_CAPACITY,
        }
    }
}

impl PipelineConfig {
    #[inline]
    pub fn loop_settle(&self) -> Duration {
        Duration::from_millis(self.loop_settle_ms)
    }

    #[inline]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Generator rate. The output device is opened at this rate when it supports it.
    pub sample_rate: u32,
    /// Number of channel queues fed, independent of the device layout.
    pub channels: u16,
    /// Decides the period length in samples.
    pub profile: TimecodeProfile,
    pub noise: NoiseType,
    /// Gain in dB, applied before the clamp to full scale.
    pub gain_db: f32,
    /// Added to the clock frame read at start for the first timestamp.
    pub lookahead_frames: i64,
    /// Frames each channel queue holds.
    pub buffer_capacity: usize,
    /// Fixed RNG seed for reproducible output.
    pub seed: Option<u64>,
    /// Output device name. `None` picks the host default.
    pub device: Option<String>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: 2,
            profile: TimecodeProfile::default(),
            noise: NoiseType::White,
            gain_db: -12.0,
            lookahead_frames: DEFAULT_LOOKAHEAD_FRAMES,
            buffer_capacity: crate::ring::DEFAULT_CAPACITY,
            seed: None,
            device: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_config_json() {
        let config = ClockConfig {
            source: SourceConfig::Ltc { device: "Line In".into(), channel: 1 },
            profile: TimecodeProfile::NtscDropFrame,
            broadcast: BroadcastConfig::default(),
        };
        let json = config.to_json().unwrap();
        assert!(json.contains(r#""kind": "ltc""#), "{json}");
        assert!(json.contains("255.255.255.255:34456"), "{json}");
        assert_eq!(ClockConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = ClockConfig::from_json(r#"{"profile":"film"}"#).unwrap();
        assert_eq!(config.profile, TimecodeProfile::Film);
        assert_eq!(config.source, SourceConfig::Internal);
        assert_eq!(config.broadcast.interval_ms, 20);

        let pipeline = PipelineConfig::from_json(r#"{"looping":true,"gain_db":-6.0}"#).unwrap();
        assert!(pipeline.looping);
        assert_eq!(pipeline.lookahead_frames, 5);
        assert_eq!(pipeline.loop_settle(), Duration::from_millis(800));
    }

    #[test]
    fn settings_object() {
        let value = serde_json::json!({
            "clockSource": 1,
            "timecodeType": 3,
            "ltcSettings": { "device": "Scarlett", "channel": 2 }
        });
        let config = ClockConfig::from_settings_value(&value).unwrap();
        assert_eq!(config.profile, TimecodeProfile::NtscDropFrame);
        assert_eq!(config.source, SourceConfig::Ltc { device: "Scarlett".into(), channel: 2 });

        let bad = serde_json::json!({ "timecodeType": 9 });
        assert!(matches!(
            ClockConfig::from_settings_value(&bad),
            Err(ConfigError::UnknownTimecodeType(9))
        ));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.json");
        let config = ClockConfig {
            profile: TimecodeProfile::Fps60,
            ..ClockConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ClockConfig::load(&path).unwrap(), config);
    }
}
