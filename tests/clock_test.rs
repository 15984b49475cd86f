use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;

use showclock::clock::broadcast::{SyncDatagram, SyncStatus};
use showclock::{
    BroadcastConfig, ClockConfig, ClockEngine, ClockStatus, SourceConfig, SourceKind, TimecodeFrame, TimecodeProfile,
    TransportState,
};

fn recv(socket: &UdpSocket) -> SyncDatagram {
    let mut buf = [0u8; 256];
    let (len, _) = socket.recv_from(&mut buf).unwrap();
    SyncDatagram::from_bytes(&buf[..len]).unwrap()
}

#[test]
fn paused_clock_broadcasts_a_constant_time() {
    let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
    listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let config = ClockConfig {
        broadcast: BroadcastConfig {
            enabled: true,
            address: listener.local_addr().unwrap(),
            interval_ms: 5,
        },
        ..ClockConfig::default()
    };

    let clock = ClockEngine::from_config(&config).unwrap();
    clock.start();
    // skip whatever the stopped clock sent before start
    while recv(&listener).status != SyncStatus::Play {}
    sleep(Duration::from_millis(60));

    clock.pause();
    let first = loop {
        let d = recv(&listener);
        if d.status == SyncStatus::Pause {
            break d;
        }
    };
    let second = recv(&listener);
    assert_eq!(first, second);
    assert_eq!(first.to_bytes(), second.to_bytes());
}

#[test]
fn switching_sources_never_overlaps() {
    let clock = ClockEngine::new(TimecodeProfile::Pal);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    clock.on_status(move |status| sink.lock().unwrap().push(status.clone()));

    clock
        .set_clock_source(SourceConfig::Ltc { device: "Line In".into(), channel: 0 })
        .unwrap();
    assert_eq!(clock.source_kind(), SourceKind::Ltc);
    clock.set_clock_source(SourceConfig::Mtc { device: "MTC Port".into() }).unwrap();
    clock.set_clock_source(SourceConfig::Internal).unwrap();

    assert_eq!(clock.source_kind(), SourceKind::Internal);
    assert_eq!(clock.live_source_handles(), 1);
    assert_eq!(clock.peak_source_handles(), 1);
    assert_eq!(clock.transport_state(), TransportState::Stopped);
    assert_eq!(clock.current_frame(), 0);

    let events = events.lock().unwrap();
    assert!(events.contains(&ClockStatus::SourceStopped(SourceKind::Internal)));
    assert!(events.contains(&ClockStatus::SourceStarted(SourceKind::Mtc)));
    assert!(events.iter().any(|e| matches!(e, ClockStatus::Device { source: SourceKind::Ltc, .. })));
}

#[test]
fn external_timecode_drives_readers() {
    let clock = ClockEngine::new(TimecodeProfile::Pal);
    clock.set_clock_source(SourceConfig::Mtc { device: "MTC Port".into() }).unwrap();
    let reader = clock.reader().with_offset(-2);
    let updates = clock.subscribe();

    let feed = clock.timecode_feed().unwrap();
    let tc = TimecodeFrame::from_parts(0, 0, 10, 0, TimecodeProfile::Pal).unwrap();
    assert!(feed.push(tc));

    assert_eq!(clock.current_frame(), 250);
    assert_eq!(reader.current_frame(), 248);
    assert_eq!(updates.recv_timeout(Duration::from_secs(1)).unwrap(), 250);
    assert_eq!(clock.current_timecode().to_string(), "00:00:10:00");

    // transport belongs to the internal source only
    clock.start();
    assert_eq!(clock.current_frame(), 250);
}

#[test]
fn config_survives_a_round_trip_through_the_engine() {
    let config = ClockConfig {
        source: SourceConfig::Mtc { device: "IAC Bus 1".into() },
        profile: TimecodeProfile::NtscDropFrame,
        broadcast: BroadcastConfig {
            enabled: false,
            ..BroadcastConfig::default()
        },
    };
    let clock = ClockEngine::from_config(&config).unwrap();
    assert_eq!(clock.to_config(), config);
    assert_eq!(
        ClockConfig::from_json(&clock.to_config().to_json().unwrap()).unwrap(),
        config
    );
}
