//! File playback into timestamped frames
//!
//! [`DecodePipeline`] decodes a media file on its own thread, converts it to
//! 16 bit PCM at the target rate, slices it into one-video-frame chunks and
//! pushes one [`AudioFrame`](crate::frame::AudioFrame) per channel into
//! [`ChannelBuffers`]. The thread paces itself against a [`ClockReader`].

mod pacing;
mod resampler;
mod slicer;
mod source;

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info, trace, warn};

use crate::clock::ClockReader;
use crate::config::PipelineConfig;
use crate::error::DecodeError;
use crate::frame::{apply_gain_i16, db_to_linear};
use crate::ring::{ChannelBuffers, ChannelRingBuffer};

pub use self::pacing::DriftPacer;
pub use self::resampler::{to_pcm16, LinearResampler};
pub use self::slicer::{FrameSlicer, SlicedChunk};
pub use self::source::StreamInfo;

use self::source::MediaSource;

const MESSAGE_CAPACITY: usize = 64;

/// Parameter changes for a running pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PipelineMessage {
    SetGainDb(f32),
    SetLooping(bool),
}

/// Everything the decode thread owns while running. Handed back on join.
struct Stages {
    media: MediaSource,
    resampler: Option<LinearResampler>,
    slicer: FrameSlicer,
    pacer: DriftPacer,
    messages: Consumer<PipelineMessage>,
    gain: f32,
    looping: bool,
    loop_settle: Duration,
}

impl Stages {
    fn apply(&mut self, msg: PipelineMessage) {
        match msg {
            PipelineMessage::SetGainDb(db) => self.gain = db_to_linear(db),
            PipelineMessage::SetLooping(looping) => self.looping = looping,
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.messages.pop() {
            self.apply(msg);
        }
    }

    fn reset_history(&mut self) {
        if let Some(r) = &mut self.resampler {
            r.reset();
        }
        self.slicer.reset();
        self.pacer.reset();
    }

    /// Seek to zero and drop every bit of carried state.
    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.reset_history();
        self.media.rewind()
    }
}

/// Flushes resampler and slicer history when dropped, however the decode
/// loop exits.
struct HistoryFlush<'a>(&'a mut Stages);

impl Deref for HistoryFlush<'_> {
    type Target = Stages;

    fn deref(&self) -> &Stages {
        self.0
    }
}

impl DerefMut for HistoryFlush<'_> {
    fn deref_mut(&mut self) -> &mut Stages {
        self.0
    }
}

impl Drop for HistoryFlush<'_> {
    fn drop(&mut self) {
        self.0.reset_history();
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<Stages>,
}

/// One media file turned into clock-stamped per-channel frames.
///
/// Parameter setters are safe to call while running; they travel to the
/// decode thread through a message queue.
pub struct DecodePipeline {
    config: PipelineConfig,
    clock: ClockReader,
    buffers: Arc<ChannelBuffers>,
    messages: Producer<PipelineMessage>,
    info: Option<StreamInfo>,
    stages: Option<Stages>,
    worker: Option<Worker>,
    pending_consumer: Option<Consumer<PipelineMessage>>,
}

impl DecodePipeline {
    /// Idle pipeline paced against `clock`. Nothing plays until `open` and `start`.
    pub fn new(config: PipelineConfig, clock: ClockReader) -> Self {
        let (messages, consumer) = RingBuffer::new(MESSAGE_CAPACITY);
        let buffers = Arc::new(ChannelBuffers::new(config.buffer_capacity));
        Self {
            config,
            clock,
            buffers,
            messages,
            info: None,
            stages: None,
            worker: None,
            pending_consumer: Some(consumer),
        }
    }

    /// Probe `path` and prepare the decode stages. Stops any current playback.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<StreamInfo, DecodeError> {
        self.stop();

        let media = MediaSource::open(path.as_ref(), self.config.target_sample_rate)?;
        let info = media.info().clone();
        let resampler = if info.sample_rate != self.config.target_sample_rate {
            Some(LinearResampler::new(info.sample_rate, self.config.target_sample_rate, info.channels)?)
        } else {
            None
        };

        let messages = match (self.pending_consumer.take(), self.stages.take()) {
            (Some(consumer), _) => consumer,
            (None, Some(old)) => old.messages,
            (None, None) => {
                // the consumer died with a panicked decode thread
                let (producer, consumer) = RingBuffer::new(MESSAGE_CAPACITY);
                self.messages = producer;
                consumer
            }
        };

        let c = &self.config;
        self.stages = Some(Stages {
            media,
            resampler,
            slicer: FrameSlicer::new(info.channels, c.target_sample_rate, c.profile, c.lookahead_frames),
            pacer: DriftPacer::new(c.profile, c.lookahead_frames),
            messages,
            gain: db_to_linear(c.gain_db),
            looping: c.looping,
            loop_settle: c.loop_settle(),
        });
        for ch in 0..info.channels {
            self.buffers.get(ch);
        }

        info!(codec = %info.codec, sample_rate = info.sample_rate, channels = info.channels, "media opened");
        self.info = Some(info.clone());
        Ok(info)
    }

    #[inline]
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    /// Shared handle to every channel queue.
    pub fn buffers(&self) -> Arc<ChannelBuffers> {
        self.buffers.clone()
    }

    /// Queue for `channel`, created on first use.
    pub fn buffer(&self, channel: usize) -> Arc<ChannelRingBuffer> {
        self.buffers.get(channel)
    }

    /// Mean fill of the active channel queues, `0.0..=1.0`.
    pub fn buffer_used_ratio(&self) -> f32 {
        self.buffers.used_ratio()
    }

    /// The decode thread exists and has not finished.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().map_or(false, |w| !w.handle.is_finished())
    }

    pub fn set_gain_db(&mut self, db: f32) {
        self.config.gain_db = db;
        self.send(PipelineMessage::SetGainDb(db));
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.config.looping = looping;
        self.send(PipelineMessage::SetLooping(looping));
    }

    fn send(&mut self, msg: PipelineMessage) {
        if let Some(stages) = &mut self.stages {
            stages.apply(msg);
        } else if self.messages.push(msg).is_err() {
            warn!(?msg, "pipeline message queue full, dropping");
        }
    }

    /// Rewind, flush and spawn the decode thread.
    pub fn start(&mut self) -> Result<(), DecodeError> {
        if self.worker.is_some() {
            if self.is_running() {
                return Err(DecodeError::AlreadyRunning);
            }
            // finished on its own at end of stream
            self.stop();
        }

        let mut stages = self.stages.take().ok_or(DecodeError::NotOpened)?;
        if let Err(e) = stages.rewind() {
            self.stages = Some(stages);
            return Err(e);
        }
        self.buffers.set_active_all(true);

        let (stop_tx, stop_rx) = mpsc::channel();
        let clock = self.clock.clone();
        let buffers = self.buffers.clone();
        let handle = thread::Builder::new()
            .name("decode".into())
            .spawn(move || run(stages, clock, buffers, stop_rx))
            .map_err(DecodeError::Spawn)?;

        self.worker = Some(Worker { stop: stop_tx, handle });
        debug!("decode thread started");
        Ok(())
    }

    /// Stop the decode thread and leave everything ready for `start`.
    ///
    /// Joins the thread, then empties the channel queues while they are
    /// inactive, rewinds and reactivates them.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            let deadline = Instant::now() + self.config.stop_timeout();
            while !worker.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }
            if !worker.handle.is_finished() {
                warn!(timeout = ?self.config.stop_timeout(), "decode thread slow to stop, still joining");
            }
            match worker.handle.join() {
                Ok(stages) => self.stages = Some(stages),
                Err(_) => error!("decode thread panicked; reopen the media to play again"),
            }
        }

        self.buffers.set_active_all(false);
        self.buffers.clear_all();
        if let Some(stages) = &mut self.stages {
            stages.drain_messages();
            if let Err(e) = stages.rewind() {
                warn!(error = %e, "rewind after stop failed");
            }
        }
        self.buffers.set_active_all(true);
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `true` if stop was requested while waiting.
fn wait(stop: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(stop.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

fn run(mut stages: Stages, clock: ClockReader, buffers: Arc<ChannelBuffers>, stop: Receiver<()>) -> Stages {
    {
        let mut stages = HistoryFlush(&mut stages);
        if let Err(e) = decode_loop(&mut stages, &clock, &buffers, &stop) {
            error!(error = %e, "decode loop failed");
        }
    }
    stages
}

fn decode_loop(
    stages: &mut Stages,
    clock: &ClockReader,
    buffers: &ChannelBuffers,
    stop: &Receiver<()>,
) -> Result<(), DecodeError> {
    let mut decoded = Vec::new();
    let mut resampled = Vec::new();
    let mut pcm = Vec::new();

    loop {
        stages.drain_messages();

        if !stages.media.next_packet(&mut decoded)? {
            if !stages.looping {
                debug!("end of stream");
                return Ok(());
            }
            if wait(stop, stages.loop_settle) {
                return Ok(());
            }
            stages.rewind()?;
            debug!("looping to start");
            continue;
        }

        let samples = match &mut stages.resampler {
            Some(r) => {
                resampled.clear();
                r.process(&decoded, &mut resampled);
                &resampled
            }
            None => &decoded,
        };
        pcm.clear();
        pcm.extend(samples.iter().map(|&s| to_pcm16(s)));
        apply_gain_i16(&mut pcm, stages.gain);
        stages.slicer.push(&pcm);

        while let Some(chunk) = stages.slicer.next_chunk() {
            // backpressure: a full queue means the consumer is behind
            while !buffers.has_capacity() {
                if wait(stop, stages.pacer.nominal() / 2) {
                    return Ok(());
                }
            }

            let timestamp = chunk.timestamp;
            for (ch, frame) in chunk.frames.into_iter().enumerate() {
                if !buffers.get(ch).push_frame(frame) {
                    trace!(ch, timestamp, "frame dropped by inactive queue");
                }
            }

            let interval = stages.pacer.next_interval(timestamp, clock.current_frame());
            if wait(stop, interval) {
                return Ok(());
            }
        }
    }
}
