//! Compressed media input via Symphonia

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_PCM_S16LE};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;
use tracing::{debug, warn};

use crate::error::DecodeError;

/// What `open` learned about the selected audio track.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StreamInfo {
    /// Short codec name, e.g. `mp3` or `pcm_s16le`.
    pub codec: String,
    /// Native rate of the track.
    pub sample_rate: u32,
    pub channels: usize,
    /// Length in sample frames, when the container states it.
    pub frames: Option<u64>,
    /// Source rate or sample format differs from the 16 bit target.
    pub needs_resampling: bool,
}

pub(crate) struct MediaSource {
    path: PathBuf,
    target_rate: u32,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: StreamInfo,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl MediaSource {
    pub fn open(path: &Path, target_rate: u32) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.to_owned(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
        let reader = probed.format;

        let usable = |t: &&symphonia::core::formats::Track| {
            t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some()
        };
        let track = reader
            .default_track()
            .filter(usable)
            .or_else(|| reader.tracks().iter().find(usable))
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| DecodeError::Unsupported("missing channel layout".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let codec = symphonia::default::get_codecs()
            .get_codec(params.codec)
            .map(|d| d.short_name.to_owned())
            .unwrap_or_else(|| "unknown".to_owned());
        let is_s16 = matches!(params.sample_format, Some(SampleFormat::S16)) || params.codec == CODEC_TYPE_PCM_S16LE;

        let info = StreamInfo {
            codec,
            sample_rate,
            channels,
            frames: params.n_frames,
            needs_resampling: sample_rate != target_rate || !is_s16,
        };
        debug!(?path, codec = %info.codec, sample_rate, channels, needs_resampling = info.needs_resampling, "opened media");

        Ok(Self {
            path: path.to_owned(),
            target_rate,
            reader,
            decoder,
            track_id,
            info,
            sample_buf: None,
        })
    }

    #[inline]
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Decode the next packet of the track into `out` as interleaved f32.
    ///
    /// Returns `false` at end of stream. Corrupt packets are skipped.
    pub fn next_packet(&mut self, out: &mut Vec<f32>) -> Result<bool, DecodeError> {
        out.clear();
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!(error = %msg, "skipping corrupt packet");
                    continue;
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let frames = decoded.capacity();
            let fits = self
                .sample_buf
                .as_ref()
                .map_or(false, |b| b.capacity() >= frames * spec.channels.count());
            if !fits {
                self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
            }
            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);
            out.extend_from_slice(buf.samples());
            return Ok(true);
        }
    }

    /// Back to the first sample with fresh codec state. Reopens the file if
    /// the container cannot seek.
    pub fn rewind(&mut self) -> Result<(), DecodeError> {
        let seek = self.reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp { ts: 0, track_id: self.track_id },
        );
        match seek {
            Ok(_) => {
                self.decoder.reset();
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "seek failed, reopening");
                *self = Self::open(&self.path, self.target_rate).map_err(|e| DecodeError::Seek(e.to_string()))?;
                Ok(())
            }
        }
    }
}
