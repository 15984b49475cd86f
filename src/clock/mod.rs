//! The authoritative show clock
//!
//! [`ClockEngine`] owns the frame counter. Exactly one source drives it at a
//! time: the internal transport (optionally broadcast over UDP), an LTC
//! decoder or an MTC decoder. Everything else reads it through a
//! [`ClockReader`] or subscribes to frame changes.

pub mod broadcast;
mod internal;
pub mod ltc;
pub mod mtc;
mod source;

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{BroadcastConfig, ClockConfig, SourceConfig};
use crate::error::ClockError;
use crate::timecode::{
    frame_to_timecode, frames_to_seconds, seconds_to_frames, timecode_to_frame, TimecodeFrame, TimecodeProfile,
};

use self::broadcast::{SyncDatagram, SyncStatus};
use self::internal::InternalSource;
use self::ltc::{LtcDecoderFactory, LtcSource};
use self::mtc::MtcSource;
use self::source::ActiveSource;

pub use self::ltc::LtcDecoder;
pub use self::mtc::MtcDecoder;
pub use self::source::{ClockStatus, SourceKind, TimecodeFeed};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// Internal-mode bookkeeping: position is `base_secs` plus scaled wall time
/// since `anchor` while playing.
struct Transport {
    state: TransportState,
    anchor: Instant,
    base_secs: f64,
    speed: f64,
    profile: TimecodeProfile,
}

impl Transport {
    fn new(profile: TimecodeProfile) -> Self {
        Self {
            state: TransportState::Stopped,
            anchor: Instant::now(),
            base_secs: 0.0,
            speed: 1.0,
            profile,
        }
    }

    fn seconds(&self, now: Instant) -> f64 {
        match self.state {
            TransportState::Playing => {
                self.base_secs + now.saturating_duration_since(self.anchor).as_secs_f64() * self.speed
            }
            TransportState::Stopped | TransportState::Paused => self.base_secs,
        }
    }

    fn rebase(&mut self, now: Instant) {
        self.base_secs = self.seconds(now);
        self.anchor = now;
    }
}

type StatusCallback = Arc<dyn Fn(&ClockStatus) + Send + Sync>;

pub(crate) struct ClockShared {
    counter: AtomicI64,
    last_published: AtomicI64,
    kind: AtomicU8,
    transport: Mutex<Transport>,
    subscribers: Mutex<Vec<Sender<i64>>>,
    status: Mutex<Option<StatusCallback>>,
    live_handles: AtomicUsize,
    peak_handles: AtomicUsize,
}

impl ClockShared {
    fn new(profile: TimecodeProfile) -> Self {
        Self {
            counter: AtomicI64::new(0),
            last_published: AtomicI64::new(i64::MIN),
            kind: AtomicU8::new(SourceKind::Internal.as_u8()),
            transport: Mutex::new(Transport::new(profile)),
            subscribers: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            live_handles: AtomicUsize::new(0),
            peak_handles: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn kind(&self) -> SourceKind {
        SourceKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    fn profile(&self) -> TimecodeProfile {
        self.transport.lock().profile
    }

    /// Compute and publish the internal position as one step against
    /// transport commands.
    pub(crate) fn publish_internal(&self) {
        let t = self.transport.lock();
        self.publish(seconds_to_frames(t.seconds(Instant::now()), t.profile));
    }

    pub(crate) fn internal_frame(&self) -> i64 {
        let t = self.transport.lock();
        seconds_to_frames(t.seconds(Instant::now()), t.profile)
    }

    pub(crate) fn current_frame(&self) -> i64 {
        match self.kind() {
            SourceKind::Internal => self.internal_frame(),
            SourceKind::Ltc | SourceKind::Mtc => self.counter.load(Ordering::Acquire),
        }
    }

    /// Store `frame` and notify subscribers if it changed.
    pub(crate) fn publish(&self, frame: i64) {
        self.counter.store(frame, Ordering::Release);
        if self.last_published.swap(frame, Ordering::AcqRel) != frame {
            self.subscribers.lock().retain(|tx| tx.send(frame).is_ok());
        }
    }

    pub(crate) fn write_timecode(&self, tc: &TimecodeFrame) {
        let profile = self.profile();
        let frame = timecode_to_frame(tc);
        let frame = if tc.profile() == profile {
            frame
        } else {
            seconds_to_frames(frames_to_seconds(frame, tc.profile()), profile)
        };
        self.publish(frame);
    }

    pub(crate) fn sync_datagram(&self) -> SyncDatagram {
        let t = self.transport.lock();
        let status = match t.state {
            TransportState::Playing => SyncStatus::Play,
            TransportState::Stopped | TransportState::Paused => SyncStatus::Pause,
        };
        SyncDatagram { status, time: t.seconds(Instant::now()) }
    }

    /// Deliver `status` without holding the callback lock.
    pub(crate) fn report(&self, status: ClockStatus) {
        let callback = self.status.lock().clone();
        if let Some(cb) = callback {
            cb(&status);
        }
    }

    pub(crate) fn report_all(&self, events: Vec<ClockStatus>) {
        for status in events {
            self.report(status);
        }
    }
}

/// Read-only view of the frame counter, with an optional trim offset.
#[derive(Clone)]
pub struct ClockReader {
    shared: Arc<ClockShared>,
    offset: i64,
}

impl ClockReader {
    /// Same clock, read `offset` frames later (negative reads earlier).
    pub fn with_offset(&self, offset: i64) -> Self {
        Self {
            shared: self.shared.clone(),
            offset,
        }
    }

    #[inline]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    #[inline]
    pub fn current_frame(&self) -> i64 {
        self.shared.current_frame() + self.offset
    }

    pub fn profile(&self) -> TimecodeProfile {
        self.shared.profile()
    }
}

pub struct ClockEngine {
    shared: Arc<ClockShared>,
    source: Mutex<Option<ActiveSource>>,
    broadcast: BroadcastConfig,
    ltc_decoders: Mutex<Option<LtcDecoderFactory>>,
}

impl ClockEngine {
    /// Internal clock without time broadcast.
    pub fn new(profile: TimecodeProfile) -> Self {
        let shared = Arc::new(ClockShared::new(profile));
        let broadcast = BroadcastConfig {
            enabled: false,
            ..BroadcastConfig::default()
        };
        let mut internal = InternalSource::new(shared.clone(), broadcast.clone());
        // without a socket the only failure is thread spawn; run unticked then
        if let Err(err) = internal.start() {
            warn!(%err, "clock ticker failed to start");
        }
        Self {
            shared,
            source: Mutex::new(Some(ActiveSource::Internal(internal))),
            broadcast,
            ltc_decoders: Mutex::new(None),
        }
    }

    /// Build from persisted settings, starting the configured source.
    pub fn from_config(config: &ClockConfig) -> Result<Self, ClockError> {
        let engine = Self {
            shared: Arc::new(ClockShared::new(config.profile)),
            source: Mutex::new(None),
            broadcast: config.broadcast.clone(),
            ltc_decoders: Mutex::new(None),
        };
        engine.set_clock_source(config.source.clone())?;
        Ok(engine)
    }

    /// Current settings in persistable form.
    pub fn to_config(&self) -> ClockConfig {
        let source = match self.source.lock().as_ref() {
            Some(ActiveSource::Ltc(s)) => SourceConfig::Ltc {
                device: s.device().to_owned(),
                channel: s.channel(),
            },
            Some(ActiveSource::Mtc(s)) => SourceConfig::Mtc {
                device: s.device().to_owned(),
            },
            Some(ActiveSource::Internal(_)) | None => SourceConfig::Internal,
        };
        ClockConfig {
            source,
            profile: self.profile(),
            broadcast: self.broadcast.clone(),
        }
    }

    /// Decoder used whenever an LTC source opens a capture device.
    pub fn set_ltc_decoder_factory<F>(&self, factory: F)
    where
        F: Fn() -> Box<dyn LtcDecoder> + Send + Sync + 'static,
    {
        *self.ltc_decoders.lock() = Some(Arc::new(factory));
    }

    /// Register a callback for source and device status changes.
    pub fn on_status<F>(&self, callback: F)
    where
        F: Fn(&ClockStatus) + Send + Sync + 'static,
    {
        *self.shared.status.lock() = Some(Arc::new(callback));
    }

    pub fn reader(&self) -> ClockReader {
        ClockReader {
            shared: self.shared.clone(),
            offset: 0,
        }
    }

    /// Receive every new frame value the clock publishes.
    pub fn subscribe(&self) -> Receiver<i64> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    #[inline]
    pub fn current_frame(&self) -> i64 {
        self.shared.current_frame()
    }

    pub fn current_timecode(&self) -> TimecodeFrame {
        frame_to_timecode(self.current_frame(), self.profile())
    }

    pub fn current_seconds(&self) -> f64 {
        frames_to_seconds(self.current_frame(), self.profile())
    }

    pub fn profile(&self) -> TimecodeProfile {
        self.shared.profile()
    }

    /// Change the frame rate, keeping the wall-clock position.
    pub fn set_profile(&self, profile: TimecodeProfile) {
        let old = {
            let mut t = self.shared.transport.lock();
            std::mem::replace(&mut t.profile, profile)
        };
        if old != profile && self.source_kind() != SourceKind::Internal {
            let frame = self.shared.counter.load(Ordering::Acquire);
            self.shared.publish(seconds_to_frames(frames_to_seconds(frame, old), profile));
        }
        info!(%profile, "clock profile changed");
    }

    pub fn source_kind(&self) -> SourceKind {
        self.shared.kind()
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.transport.lock().state
    }

    pub fn speed(&self) -> f64 {
        self.shared.transport.lock().speed
    }

    /// Feed of the installed external source, if one is installed.
    pub fn timecode_feed(&self) -> Option<TimecodeFeed> {
        self.source.lock().as_ref().and_then(ActiveSource::feed)
    }

    /// Sources currently holding resources. Never above one.
    pub fn live_source_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::Acquire)
    }

    /// Highest value [`live_source_handles`](Self::live_source_handles) ever reached.
    pub fn peak_source_handles(&self) -> usize {
        self.shared.peak_handles.load(Ordering::Acquire)
    }

    fn transport_command(&self, name: &'static str, f: impl FnOnce(&mut Transport, Instant)) {
        if self.source_kind() != SourceKind::Internal {
            debug!(command = name, "transport command ignored under external timecode");
            return;
        }
        let now = Instant::now();
        let frame = {
            let mut t = self.shared.transport.lock();
            f(&mut t, now);
            let frame = seconds_to_frames(t.seconds(now), t.profile);
            // published under the lock so ticks never reorder with commands
            self.shared.publish(frame);
            frame
        };
        debug!(command = name, frame, "transport");
    }

    /// Reset to zero and play.
    pub fn start(&self) {
        self.transport_command("start", |t, now| {
            t.base_secs = 0.0;
            t.anchor = now;
            t.state = TransportState::Playing;
        });
    }

    pub fn pause(&self) {
        self.transport_command("pause", |t, now| {
            if t.state == TransportState::Playing {
                t.rebase(now);
                t.state = TransportState::Paused;
            }
        });
    }

    pub fn resume(&self) {
        self.transport_command("resume", |t, now| {
            if t.state == TransportState::Paused {
                t.anchor = now;
                t.state = TransportState::Playing;
            }
        });
    }

    /// Zero and stopped, from any state.
    pub fn stop(&self) {
        self.transport_command("stop", |t, now| {
            t.base_secs = 0.0;
            t.anchor = now;
            t.state = TransportState::Stopped;
        });
    }

    /// Jump to `frame`, keeping the transport state.
    pub fn seek(&self, frame: i64) {
        self.transport_command("seek", |t, now| {
            t.base_secs = frames_to_seconds(frame.max(0), t.profile);
            t.anchor = now;
        });
    }

    /// Scale internal time. Ignored while external timecode drives the clock.
    pub fn set_speed(&self, multiplier: f64) {
        if !multiplier.is_finite() || multiplier < 0.0 {
            warn!(multiplier, "rejecting invalid clock speed");
            return;
        }
        self.transport_command("set_speed", |t, now| {
            t.rebase(now);
            t.speed = multiplier;
        });
    }

    /// Tear down the installed source, leaving the counter at its last value.
    pub fn close_current_source(&self) {
        let mut events = Vec::new();
        {
            let mut slot = self.source.lock();
            self.close_locked(&mut slot, &mut events);
        }
        self.shared.report_all(events);
    }

    fn close_locked(&self, slot: &mut Option<ActiveSource>, events: &mut Vec<ClockStatus>) {
        if let Some(mut old) = slot.take() {
            let kind = old.kind();
            old.stop();
            drop(old);
            info!(?kind, "clock source closed");
            events.push(ClockStatus::SourceStopped(kind));
        }
    }

    /// Replace the clock source.
    ///
    /// The previous source is fully released first. If any source handle is
    /// still live afterwards the switch is refused and the counter untouched.
    /// Status callbacks run after the switch completes, outside every engine
    /// lock, so they may call back into the engine.
    pub fn set_clock_source(&self, config: SourceConfig) -> Result<(), ClockError> {
        let mut events = Vec::new();
        let result = {
            let mut slot = self.source.lock();
            self.install_locked(&mut slot, config, &mut events)
        };
        self.shared.report_all(events);
        result
    }

    fn install_locked(
        &self,
        slot: &mut Option<ActiveSource>,
        config: SourceConfig,
        events: &mut Vec<ClockStatus>,
    ) -> Result<(), ClockError> {
        self.close_locked(slot, events);

        let live = self.live_source_handles();
        if live != 0 {
            return Err(ClockError::SourceConflict { live });
        }

        let mut next = match config {
            SourceConfig::Internal => {
                let profile = self.shared.profile();
                *self.shared.transport.lock() = Transport::new(profile);
                ActiveSource::Internal(InternalSource::new(self.shared.clone(), self.broadcast.clone()))
            }
            SourceConfig::Ltc { device, channel } => {
                let decoders = self.ltc_decoders.lock().clone();
                ActiveSource::Ltc(LtcSource::new(self.shared.clone(), device, channel, decoders))
            }
            SourceConfig::Mtc { device } => ActiveSource::Mtc(MtcSource::new(self.shared.clone(), device)),
        };

        let kind = next.kind();
        if let Err(err) = next.start(events) {
            // nothing is installed; the computed internal clock keeps readers and transport working
            self.shared.kind.store(SourceKind::Internal.as_u8(), Ordering::Release);
            warn!(?kind, %err, "clock source failed to start");
            return Err(err);
        }
        self.shared.kind.store(kind.as_u8(), Ordering::Release);
        let frame = next.current_frame(&self.shared);
        self.shared.publish(frame);
        *slot = Some(next);

        info!(?kind, frame, "clock source started");
        events.push(ClockStatus::SourceStarted(kind));
        Ok(())
    }
}

impl Drop for ClockEngine {
    fn drop(&mut self) {
        if let Some(mut source) = self.source.get_mut().take() {
            source.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;
    use crate::clock::source::SourceGuard;

    #[test]
    fn start_pause_resume_stop() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        assert_eq!(clock.transport_state(), TransportState::Stopped);
        assert_eq!(clock.current_frame(), 0);

        clock.start();
        sleep(Duration::from_millis(120));
        clock.pause();
        let frozen = clock.current_frame();
        assert!(frozen >= 2, "expected progress, got {frozen}");
        sleep(Duration::from_millis(80));
        assert_eq!(clock.current_frame(), frozen);

        clock.resume();
        assert!(clock.current_frame() - frozen <= 1, "resume must not jump");

        clock.stop();
        assert_eq!(clock.current_frame(), 0);
        assert_eq!(clock.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn seek_and_speed() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        clock.seek(250);
        assert_eq!(clock.current_frame(), 250);
        assert_eq!(clock.current_timecode().to_string(), "00:00:10:00");

        clock.set_speed(0.0);
        clock.start();
        sleep(Duration::from_millis(60));
        assert_eq!(clock.current_frame(), 0);

        clock.set_speed(f64::NAN);
        assert_eq!(clock.speed(), 0.0);
    }

    #[test]
    fn reader_offset_is_not_stored() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        clock.seek(100);
        let trimmed = clock.reader().with_offset(-3);
        assert_eq!(trimmed.current_frame(), 97);
        assert_eq!(clock.current_frame(), 100);
        assert_eq!(clock.reader().current_frame(), 100);
    }

    #[test]
    fn external_feed_overwrites_counter() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        clock
            .set_clock_source(SourceConfig::Mtc { device: "none".into() })
            .unwrap();
        let feed = clock.timecode_feed().unwrap();
        let tc = TimecodeFrame::from_parts(0, 0, 4, 10, TimecodeProfile::Pal).unwrap();
        assert!(feed.push(tc));
        assert_eq!(clock.current_frame(), 110);

        // transport is ignored while external timecode drives
        clock.stop();
        clock.set_speed(2.0);
        assert_eq!(clock.current_frame(), 110);
        assert_eq!(clock.speed(), 1.0);

        clock.set_clock_source(SourceConfig::Internal).unwrap();
        assert!(!feed.push(tc));
        assert_eq!(clock.current_frame(), 0);
    }

    #[test]
    fn foreign_profile_timecode_is_rescaled() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        clock.set_clock_source(SourceConfig::Ltc { device: "none".into(), channel: 0 }).unwrap();
        let tc = TimecodeFrame::from_parts(0, 0, 2, 0, TimecodeProfile::Ntsc).unwrap();
        clock.timecode_feed().unwrap().push(tc);
        assert_eq!(clock.current_frame(), 50);
    }

    #[test]
    fn subscribers_see_changes() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        let rx = clock.subscribe();
        clock.seek(40);
        let seen: Vec<i64> = rx.try_iter().collect();
        assert!(seen.contains(&40), "{seen:?}");
    }

    #[test]
    fn missing_device_is_reported() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        clock.on_status(move |s| sink.lock().push(s.clone()));

        clock.set_clock_source(SourceConfig::Ltc { device: "no such input".into(), channel: 0 }).unwrap();
        let reports = reports.lock();
        assert!(reports.iter().any(|s| matches!(s, ClockStatus::Device { source: SourceKind::Ltc, .. })));
        assert!(reports.contains(&ClockStatus::SourceStarted(SourceKind::Ltc)));
        assert_eq!(clock.source_kind(), SourceKind::Ltc);
    }

    #[test]
    fn leaked_handle_refuses_switch() {
        let clock = ClockEngine::new(TimecodeProfile::Pal);
        clock.seek(42);
        let leaked = SourceGuard::new(&clock.shared);
        let err = clock.set_clock_source(SourceConfig::Mtc { device: "x".into() }).unwrap_err();
        assert!(matches!(err, ClockError::SourceConflict { live: 1 }));
        assert_eq!(clock.shared.counter.load(Ordering::Acquire), 42);
        drop(leaked);
        clock.set_clock_source(SourceConfig::Internal).unwrap();
        assert_eq!(clock.live_source_handles(), 1);
    }

    #[test]
    fn status_callback_may_reenter_engine() {
        let engine = Arc::new(ClockEngine::new(TimecodeProfile::Pal));
        let weak = Arc::downgrade(&engine);
        let feeds = Arc::new(Mutex::new(Vec::new()));
        let sink = feeds.clone();
        engine.on_status(move |status| {
            if let (ClockStatus::SourceStarted(_), Some(engine)) = (status, weak.upgrade()) {
                sink.lock().push((engine.timecode_feed().is_some(), engine.to_config().source));
                engine.on_status(|_| {});
            }
        });

        let (tx, rx) = mpsc::channel();
        let switcher = engine.clone();
        std::thread::spawn(move || {
            let result = switcher.set_clock_source(SourceConfig::Mtc { device: "none".into() });
            let _ = tx.send(result.is_ok());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(3)), Ok(true));
        assert_eq!(
            feeds.lock().as_slice(),
            &[(true, SourceConfig::Mtc { device: "none".into() })]
        );
    }

    #[test]
    fn failed_start_falls_back_to_internal_time() {
        let config = ClockConfig {
            source: SourceConfig::Mtc { device: "none".into() },
            profile: TimecodeProfile::Pal,
            broadcast: BroadcastConfig {
                enabled: true,
                address: "127.0.0.1:0".parse().unwrap(),
                interval_ms: 20,
            },
        };
        let clock = ClockEngine::from_config(&config).unwrap();
        assert!(matches!(
            clock.set_clock_source(SourceConfig::Internal),
            Err(ClockError::Broadcast(_))
        ));
        assert_eq!(clock.source_kind(), SourceKind::Internal);
        assert_eq!(clock.live_source_handles(), 0);
        assert!(clock.timecode_feed().is_none());
        clock.seek(30);
        assert_eq!(clock.current_frame(), 30);
        assert_eq!(clock.to_config().source, SourceConfig::Internal);
    }

    #[test]
    fn ticks_never_publish_a_stale_position() {
        let clock = ClockEngine::from_config(&ClockConfig {
            broadcast: BroadcastConfig {
                enabled: false,
                interval_ms: 1,
                ..BroadcastConfig::default()
            },
            ..ClockConfig::default()
        })
        .unwrap();
        let rx = clock.subscribe();
        for i in 1..=300 {
            clock.seek(i * 10);
        }
        sleep(Duration::from_millis(10));
        let seen: Vec<i64> = rx.try_iter().collect();
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
        assert_eq!(seen.last(), Some(&3000));
    }

    #[test]
    fn config_round_trip() {
        let clock = ClockEngine::new(TimecodeProfile::NtscDropFrame);
        clock.set_clock_source(SourceConfig::Ltc { device: "in".into(), channel: 1 }).unwrap();
        let config = clock.to_config();
        assert_eq!(config.source, SourceConfig::Ltc { device: "in".into(), channel: 1 });
        assert_eq!(config.profile, TimecodeProfile::NtscDropFrame);
    }
}
