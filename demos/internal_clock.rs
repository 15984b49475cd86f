//! Run the internal clock and print timecode as it changes
//!
//! Run with: cargo run --example internal_clock
//!
//! Broadcasts play/pause datagrams on UDP 34456 while it runs.

use std::thread::sleep;
use std::time::{Duration, Instant};

use showclock::{ClockConfig, ClockEngine, TimecodeProfile};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let config = ClockConfig {
        profile: TimecodeProfile::NtscDropFrame,
        ..ClockConfig::default()
    };
    let clock = ClockEngine::from_config(&config)?;
    let updates = clock.subscribe();

    clock.start();
    let started = Instant::now();
    let mut paused = false;

    while started.elapsed() < Duration::from_secs(6) {
        if let Ok(frame) = updates.recv_timeout(Duration::from_millis(100)) {
            println!("{}  (frame {frame})", clock.current_timecode());
        }
        if !paused && started.elapsed() > Duration::from_secs(3) {
            println!("-- pause --");
            clock.pause();
            sleep(Duration::from_secs(1));
            println!("-- resume at double speed --");
            clock.set_speed(2.0);
            clock.resume();
            paused = true;
        }
    }

    clock.stop();
    println!("stopped at {}", clock.current_timecode());
    Ok(())
}
