//! Synthetic test signal source
//!
//! Generates noise from an audio callback and emits one timestamped frame per
//! channel every video-frame period. The first timestamp is the clock's frame
//! at `start()` plus the lookahead; after that the sequence only counts
//! periods and never reads the clock again.

mod noise;

use std::sync::Arc;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, warn};

use crate::clock::ClockReader;
use crate::config::SynthConfig;
use crate::error::DeviceError;
use crate::frame::{db_to_linear, f32_to_i16, AudioFrame};
use crate::ring::{ChannelBuffers, ChannelRingBuffer};
use crate::timecode::TimecodeProfile;

pub use self::noise::{NoiseGenerator, NoiseType};

const MESSAGE_CAPACITY: usize = 64;

/// Parameter changes delivered to the running callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SynthMessage {
    SetGainDb(f32),
    SetNoiseType(NoiseType),
}

type StatusCallback = Arc<Mutex<Option<Arc<dyn Fn(&DeviceError) + Send + Sync>>>>;

/// Call the registered callback with the lock released.
fn report(status: &StatusCallback, error: &DeviceError) {
    let callback = status.lock().clone();
    if let Some(cb) = callback {
        cb(error);
    }
}

/// The realtime half of a [`SyntheticSource`].
///
/// Owned by whatever drives the audio callback: a cpal output stream, or a
/// host that calls [`process`](Self::process) itself.
pub struct NoiseCallback {
    generator: NoiseGenerator,
    messages: Consumer<SynthMessage>,
    gain: f32,
    channels: usize,
    device_channels: usize,
    sample_rate: u32,
    profile: TimecodeProfile,
    buffers: Arc<ChannelBuffers>,
    targets: Vec<Arc<ChannelRingBuffer>>,
    planes: Vec<Vec<i16>>,
    period_len: usize,
    period_index: u64,
    timestamp: i64,
}

impl NoiseCallback {
    /// Run one device callback. The device buffer is filled with silence;
    /// the generated signal only goes to the channel queues.
    pub fn process(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        self.render(out.len() / self.device_channels.max(1));
    }

    /// Generate `frames` sample frames into the pending period.
    ///
    /// Does nothing once the owning source has stopped or restarted.
    pub fn render(&mut self, frames: usize) {
        if !self.is_live() {
            return;
        }
        while let Ok(msg) = self.messages.pop() {
            match msg {
                SynthMessage::SetGainDb(db) => self.gain = db_to_linear(db),
                SynthMessage::SetNoiseType(kind) => self.generator.set_kind(kind),
            }
        }

        for _ in 0..frames {
            for plane in self.planes.iter_mut() {
                plane.push(f32_to_i16(self.generator.next_sample() * self.gain));
            }
            if self.planes[0].len() >= self.period_len {
                self.emit();
            }
        }
    }

    /// Timestamp the next emitted frame will carry.
    #[inline]
    pub fn next_timestamp(&self) -> i64 {
        self.timestamp
    }

    /// `false` after the source that handed out this callback stopped.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.messages.is_abandoned()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn buffers(&self) -> &Arc<ChannelBuffers> {
        &self.buffers
    }

    fn emit(&mut self) {
        // a stop may land mid-block on another thread
        if !self.is_live() {
            self.planes.iter_mut().for_each(Vec::clear);
            return;
        }
        for (plane, target) in self.planes.iter_mut().zip(&self.targets) {
            target.push_frame(AudioFrame::from_samples(plane, self.sample_rate, self.timestamp));
            plane.clear();
        }
        self.timestamp += 1;
        self.period_index += 1;
        self.period_len = self.profile.samples_in_frame(self.period_index, self.sample_rate);
    }
}

pub struct SyntheticSource {
    config: SynthConfig,
    clock: ClockReader,
    buffers: Arc<ChannelBuffers>,
    messages: Option<Producer<SynthMessage>>,
    status: StatusCallback,
    #[cfg(feature = "cpal_device")]
    device: Option<device::OutputStream>,
}

impl SyntheticSource {
    pub fn new(config: SynthConfig, clock: ClockReader) -> Self {
        let buffers = Arc::new(ChannelBuffers::new(config.buffer_capacity));
        Self {
            config,
            clock,
            buffers,
            messages: None,
            status: Arc::new(Mutex::new(None)),
            #[cfg(feature = "cpal_device")]
            device: None,
        }
    }

    pub fn buffers(&self) -> Arc<ChannelBuffers> {
        self.buffers.clone()
    }

    pub fn buffer(&self, channel: usize) -> Arc<ChannelRingBuffer> {
        self.buffers.get(channel)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.messages.is_some()
    }

    /// Register a callback for output device failures while running.
    pub fn on_status<F>(&self, callback: F)
    where
        F: Fn(&DeviceError) + Send + Sync + 'static,
    {
        *self.status.lock() = Some(Arc::new(callback));
    }

    pub fn set_gain_db(&mut self, db: f32) {
        self.config.gain_db = db;
        self.send(SynthMessage::SetGainDb(db));
    }

    pub fn set_noise_type(&mut self, kind: NoiseType) {
        self.config.noise = kind;
        self.send(SynthMessage::SetNoiseType(kind));
    }

    fn send(&mut self, msg: SynthMessage) {
        if let Some(tx) = &mut self.messages {
            if tx.push(msg).is_err() {
                warn!(?msg, "synth message queue full, dropping");
            }
        }
    }

    fn make_callback(&mut self, device_channels: usize) -> NoiseCallback {
        let (producer, consumer) = RingBuffer::new(MESSAGE_CAPACITY);
        self.messages = Some(producer);

        let c = &self.config;
        let channels = c.channels.max(1) as usize;
        let timestamp = self.clock.current_frame() + c.lookahead_frames;
        self.buffers.set_active_all(true);
        debug!(timestamp, channels, noise = ?c.noise, "synthetic source seeded");

        NoiseCallback {
            generator: NoiseGenerator::new(c.noise, c.seed),
            messages: consumer,
            gain: db_to_linear(c.gain_db),
            channels,
            device_channels,
            sample_rate: c.sample_rate,
            profile: c.profile,
            buffers: self.buffers.clone(),
            targets: (0..channels).map(|ch| self.buffers.get(ch)).collect(),
            planes: vec![Vec::new(); channels],
            period_len: c.profile.samples_in_frame(0, c.sample_rate),
            period_index: 0,
            timestamp,
        }
    }

    /// Start without a device, handing the callback to the caller's audio thread.
    pub fn start_detached(&mut self) -> NoiseCallback {
        self.stop();
        let channels = self.config.channels.max(1) as usize;
        let callback = self.make_callback(channels);
        info!(next_timestamp = callback.next_timestamp(), "synthetic source started (detached)");
        callback
    }

    /// Start on the configured (or default) cpal output device.
    #[cfg(feature = "cpal_device")]
    pub fn start(&mut self) -> Result<(), DeviceError> {
        self.stop();
        let (cpal_device, stream_config) = device::select(self.config.device.as_deref(), self.config.sample_rate)?;
        let callback = self.make_callback(stream_config.channels() as usize);
        let next = callback.next_timestamp();
        match device::OutputStream::spawn(cpal_device, stream_config, callback, self.status.clone()) {
            Ok(stream) => {
                self.device = Some(stream);
                info!(next_timestamp = next, "synthetic source started");
                Ok(())
            }
            Err(e) => {
                self.messages = None;
                report(&self.status, &e);
                Err(e)
            }
        }
    }

    #[cfg(not(feature = "cpal_device"))]
    pub fn start(&mut self) -> Result<(), DeviceError> {
        let e = DeviceError::Unavailable("cpal_device");
        report(&self.status, &e);
        Err(e)
    }

    /// Close the device stream and empty the queues.
    pub fn stop(&mut self) {
        #[cfg(feature = "cpal_device")]
        if let Some(stream) = self.device.take() {
            stream.close();
        }
        if self.messages.take().is_some() {
            debug!("synthetic source stopped");
        }
        self.buffers.set_active_all(false);
        self.buffers.clear_all();
        self.buffers.set_active_all(true);
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "cpal_device")]
mod device {
    use std::sync::mpsc::{self, Sender};
    use std::thread::{self, JoinHandle};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, SupportedStreamConfig};
    use tracing::error;

    use super::{NoiseCallback, StatusCallback};
    use crate::error::DeviceError;

    pub(super) fn select(name: Option<&str>, sample_rate: u32) -> Result<(cpal::Device, SupportedStreamConfig), DeviceError> {
        let host = cpal::default_host();
        let device = match name {
            Some(name) => host
                .output_devices()
                .map_err(|e| DeviceError::Stream(e.to_string()))?
                .find(|d| d.name().map_or(false, |n| n == name))
                .ok_or_else(|| DeviceError::NotFound(name.to_owned()))?,
            None => host
                .default_output_device()
                .ok_or_else(|| DeviceError::NotFound("default output".into()))?,
        };

        // prefer the generator's own rate so one period is one callback's worth
        let wanted = SampleRate(sample_rate);
        let config = device
            .supported_output_configs()
            .map_err(|e| DeviceError::Config(e.to_string()))?
            .find(|c| c.min_sample_rate() <= wanted && wanted <= c.max_sample_rate())
            .map(|c| c.with_sample_rate(wanted));
        let config = match config {
            Some(c) => c,
            None => device
                .default_output_config()
                .map_err(|e| DeviceError::Config(e.to_string()))?,
        };
        Ok((device, config))
    }

    /// An output stream parked on its own thread, like every cpal stream here.
    pub(super) struct OutputStream {
        stop: Sender<()>,
        handle: JoinHandle<()>,
    }

    impl OutputStream {
        pub fn spawn(
            device: cpal::Device,
            config: SupportedStreamConfig,
            callback: NoiseCallback,
            status: StatusCallback,
        ) -> Result<Self, DeviceError> {
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();
            let (stop_tx, stop_rx) = mpsc::channel::<()>();

            let handle = thread::Builder::new()
                .name("synth-output".into())
                .spawn(move || {
                    let stream = match build(&device, &config, callback, status) {
                        Ok(s) => s,
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
                    let _ = stop_rx.recv();
                })
                .map_err(|e| DeviceError::Stream(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self { stop: stop_tx, handle }),
                Ok(Err(e)) => {
                    let _ = handle.join();
                    Err(e)
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(DeviceError::Stream("output thread exited early".into()))
                }
            }
        }

        pub fn close(self) {
            let _ = self.stop.send(());
            if self.handle.join().is_err() {
                error!("synth output thread panicked");
            }
        }
    }

    fn build(
        device: &cpal::Device,
        config: &SupportedStreamConfig,
        mut callback: NoiseCallback,
        status: StatusCallback,
    ) -> Result<cpal::Stream, DeviceError> {
        let stream_config = config.config();
        let on_error = move |err: cpal::StreamError| {
            error!(%err, "synth output stream error");
            super::report(&status, &DeviceError::Stream(err.to_string()));
        };

        let stream = match config.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| callback.process(data),
                on_error,
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| {
                        scratch.resize(data.len(), 0.0);
                        callback.process(&mut scratch);
                        data.fill(0);
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::U16 => {
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [u16], _| {
                        scratch.resize(data.len(), 0.0);
                        callback.process(&mut scratch);
                        data.fill(u16::MAX / 2 + 1);
                    },
                    on_error,
                    None,
                )
            }
            other => return Err(DeviceError::Config(format!("unsupported sample format {other:?}"))),
        };
        stream.map_err(|e| DeviceError::Stream(e.to_string()))
    }
}
