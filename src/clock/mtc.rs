//! MIDI timecode source
//!
//! [`MtcDecoder`] assembles quarter-frame and full-frame messages into
//! [`TimecodeFrame`]s. With `midi_input` the source listens on a named MIDI
//! port through `midir`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::source::{SourceGuard, TimecodeFeed};
use crate::clock::ClockShared;
use crate::error::DeviceError;
use crate::timecode::{add_offset, TimecodeFrame, TimecodeProfile};

const QUARTER_FRAME: u8 = 0xF1;
const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

fn profile_from_rate_bits(bits: u8) -> TimecodeProfile {
    match bits & 0x03 {
        0 => TimecodeProfile::Film,
        1 => TimecodeProfile::Pal,
        2 => TimecodeProfile::NtscDropFrame,
        _ => TimecodeProfile::Ntsc,
    }
}

/// Stateful MTC parser. Feed it one complete MIDI message at a time.
#[derive(Default, Debug)]
pub struct MtcDecoder {
    pieces: [u8; 8],
    received: u8,
}

impl MtcDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a frame when `message` completes one.
    ///
    /// Eight quarter frames span two frames, so a completed quarter-frame
    /// sequence is reported two frames after the time it encodes.
    pub fn feed(&mut self, message: &[u8]) -> Option<TimecodeFrame> {
        match message {
            [QUARTER_FRAME, data] => self.quarter_frame(*data),
            [SYSEX_START, 0x7F, _, 0x01, 0x01, hh, mm, ss, ff, SYSEX_END] => {
                // a full frame resynchronises the quarter-frame sequence
                self.received = 0;
                Self::assemble(*hh, *mm, *ss, *ff)
            }
            _ => None,
        }
    }

    fn quarter_frame(&mut self, data: u8) -> Option<TimecodeFrame> {
        let piece = (data >> 4) & 0x07;
        let value = data & 0x0F;
        if piece == 0 {
            self.received = 0;
        }
        self.pieces[piece as usize] = value;
        self.received |= 1 << piece;

        if piece != 7 || self.received != 0xFF {
            return None;
        }
        self.received = 0;

        let p = &self.pieces;
        let ff = p[0] | (p[1] & 0x01) << 4;
        let ss = p[2] | (p[3] & 0x03) << 4;
        let mm = p[4] | (p[5] & 0x03) << 4;
        let hours = p[6] | (p[7] & 0x01) << 4;
        let rate = (p[7] >> 1) & 0x03;
        Self::assemble(rate << 5 | hours, mm, ss, ff).map(|tc| add_offset(&tc, 2))
    }

    fn assemble(hh: u8, mm: u8, ss: u8, ff: u8) -> Option<TimecodeFrame> {
        let profile = profile_from_rate_bits(hh >> 5);
        let tc = TimecodeFrame::from_parts((hh & 0x1F) as u32, mm, ss, ff, profile);
        if tc.is_none() {
            debug!(hh, mm, ss, ff, "discarding malformed MTC time");
        }
        tc
    }
}

pub(crate) struct MtcSource {
    shared: Arc<ClockShared>,
    device: String,
    feed: TimecodeFeed,
    guard: Option<SourceGuard>,
    #[cfg(feature = "midi_input")]
    connection: Option<midir::MidiInputConnection<()>>,
}

impl MtcSource {
    pub fn new(shared: Arc<ClockShared>, device: String) -> Self {
        let feed = TimecodeFeed::new(&shared);
        Self {
            shared,
            device,
            feed,
            guard: None,
            #[cfg(feature = "midi_input")]
            connection: None,
        }
    }

    pub fn feed(&self) -> TimecodeFeed {
        self.feed.clone()
    }

    #[inline]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Install the source. On a port error the source stays installed and
    /// the feed stays usable.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.guard.is_some() {
            return Ok(());
        }
        self.guard = Some(SourceGuard::new(&self.shared));
        self.feed.set_alive(true);
        info!(device = %self.device, "MTC source installed");

        self.connect().map_err(|error| {
            warn!(%error, device = %self.device, "MTC input unavailable");
            error
        })
    }

    #[cfg(feature = "midi_input")]
    fn connect(&mut self) -> Result<(), DeviceError> {
        use midir::{Ignore, MidiInput};

        let mut midi_in = MidiInput::new("showclock MTC").map_err(|e| DeviceError::Stream(e.to_string()))?;
        midi_in.ignore(Ignore::ActiveSense);
        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| midi_in.port_name(p).map_or(false, |n| n.contains(&self.device)))
            .ok_or_else(|| DeviceError::NotFound(self.device.clone()))?
            .clone();

        let feed = self.feed.clone();
        let mut decoder = MtcDecoder::new();
        let connection = midi_in
            .connect(
                &port,
                "showclock-mtc-in",
                move |_stamp, message, _| {
                    if let Some(tc) = decoder.feed(message) {
                        feed.push(tc);
                    }
                },
                (),
            )
            .map_err(|e| DeviceError::Stream(e.to_string()))?;
        self.connection = Some(connection);
        Ok(())
    }

    #[cfg(not(feature = "midi_input"))]
    fn connect(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable("midi_input"))
    }

    pub fn stop(&mut self) {
        self.feed.set_alive(false);
        #[cfg(feature = "midi_input")]
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        if self.guard.take().is_some() {
            info!(device = %self.device, "MTC source released");
        }
    }
}

impl Drop for MtcSource {
    fn drop(&mut self) {
        self.stop();
    }
}
