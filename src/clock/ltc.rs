//! Linear timecode source
//!
//! Biphase demodulation is left to an [`LtcDecoder`] supplied by the host.
//! This module captures one input channel (with `cpal_device`) and hands
//! every decoded frame to the clock verbatim.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::source::{SourceGuard, TimecodeFeed};
use crate::clock::ClockShared;
use crate::error::DeviceError;
use crate::timecode::TimecodeFrame;

/// Demodulates LTC from mono float samples.
pub trait LtcDecoder: Send {
    /// Consume a block of samples, calling `emit` once per completed frame.
    fn write(&mut self, samples: &[f32], sample_rate: u32, emit: &mut dyn FnMut(TimecodeFrame));
}

pub type LtcDecoderFactory = Arc<dyn Fn() -> Box<dyn LtcDecoder> + Send + Sync>;

pub(crate) struct LtcSource {
    shared: Arc<ClockShared>,
    device: String,
    channel: u16,
    feed: TimecodeFeed,
    #[cfg_attr(not(feature = "cpal_device"), allow(dead_code))]
    decoders: Option<LtcDecoderFactory>,
    guard: Option<SourceGuard>,
    #[cfg(feature = "cpal_device")]
    capture: Option<capture::Capture>,
}

impl LtcSource {
    pub fn new(shared: Arc<ClockShared>, device: String, channel: u16, decoders: Option<LtcDecoderFactory>) -> Self {
        let feed = TimecodeFeed::new(&shared);
        Self {
            shared,
            device,
            channel,
            feed,
            decoders,
            guard: None,
            #[cfg(feature = "cpal_device")]
            capture: None,
        }
    }

    pub fn feed(&self) -> TimecodeFeed {
        self.feed.clone()
    }

    #[inline]
    pub fn device(&self) -> &str {
        &self.device
    }

    #[inline]
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Install the source. On a capture error the source stays installed and
    /// the feed stays usable.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.guard.is_some() {
            return Ok(());
        }
        self.guard = Some(SourceGuard::new(&self.shared));
        self.feed.set_alive(true);
        info!(device = %self.device, channel = self.channel, "LTC source installed");

        self.open_capture().map_err(|error| {
            warn!(%error, device = %self.device, "LTC capture unavailable");
            error
        })
    }

    #[cfg(feature = "cpal_device")]
    fn open_capture(&mut self) -> Result<(), DeviceError> {
        let factory = self
            .decoders
            .as_ref()
            .ok_or_else(|| DeviceError::Config("no LTC decoder installed".into()))?;
        let decoder = factory();
        self.capture = Some(capture::open(&self.device, self.channel, decoder, self.feed.clone())?);
        Ok(())
    }

    #[cfg(not(feature = "cpal_device"))]
    fn open_capture(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable("cpal_device"))
    }

    pub fn stop(&mut self) {
        self.feed.set_alive(false);
        #[cfg(feature = "cpal_device")]
        if let Some(capture) = self.capture.take() {
            capture.close();
        }
        if self.guard.take().is_some() {
            info!(device = %self.device, "LTC source released");
        }
    }
}

impl Drop for LtcSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "cpal_device")]
mod capture {
    use std::sync::mpsc::{self, Sender};
    use std::thread::{self, JoinHandle};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;
    use tracing::error;

    use super::LtcDecoder;
    use crate::clock::source::TimecodeFeed;
    use crate::error::DeviceError;

    /// An input stream living on its own thread, since `cpal::Stream` is not `Send`.
    pub(super) struct Capture {
        stop: Sender<()>,
        handle: JoinHandle<()>,
    }

    impl Capture {
        pub fn close(self) {
            let _ = self.stop.send(());
            if self.handle.join().is_err() {
                error!("LTC capture thread panicked");
            }
        }
    }

    pub(super) fn open(
        device_name: &str,
        channel: u16,
        decoder: Box<dyn LtcDecoder>,
        feed: TimecodeFeed,
    ) -> Result<Capture, DeviceError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let name = device_name.to_owned();

        let handle = thread::Builder::new()
            .name("ltc-capture".into())
            .spawn(move || {
                let stream = match build_stream(&name, channel as usize, decoder, feed) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // stream lives until close() signals or drops the sender
                let _ = stop_rx.recv();
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Capture { stop: stop_tx, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::Stream("capture thread exited early".into()))
            }
        }
    }

    fn build_stream(
        name: &str,
        channel: usize,
        mut decoder: Box<dyn LtcDecoder>,
        feed: TimecodeFeed,
    ) -> Result<cpal::Stream, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .input_devices()
            .map_err(|e| DeviceError::Stream(e.to_string()))?
            .find(|d| d.name().map_or(false, |n| n == name))
            .ok_or_else(|| DeviceError::NotFound(name.to_owned()))?;

        let config = device
            .default_input_config()
            .map_err(|e| DeviceError::Config(e.to_string()))?;
        let channels = config.channels() as usize;
        if channel >= channels {
            return Err(DeviceError::Config(format!(
                "channel {channel} out of range for {channels}-channel device"
            )));
        }
        let sample_rate = config.sample_rate().0;
        let stream_config = config.config();
        let mut mono: Vec<f32> = Vec::new();
        let on_error = |err: cpal::StreamError| error!(%err, "LTC capture stream error");

        let stream = match config.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    mono.clear();
                    mono.extend(data.iter().skip(channel).step_by(channels).copied());
                    decoder.write(&mono, sample_rate, &mut |tc| {
                        feed.push(tc);
                    });
                },
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    mono.clear();
                    mono.extend(
                        data.iter()
                            .skip(channel)
                            .step_by(channels)
                            .map(|&s| s as f32 / 32768.0),
                    );
                    decoder.write(&mono, sample_rate, &mut |tc| {
                        feed.push(tc);
                    });
                },
                on_error,
                None,
            ),
            other => {
                return Err(DeviceError::Config(format!("unsupported sample format {other:?}")));
            }
        };
        stream.map_err(|e| DeviceError::Stream(e.to_string()))
    }
}
