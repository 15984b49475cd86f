//! Pink noise on the default output device, framed against the clock
//!
//! Run with: cargo run --example noise_source --features cpal_device

use std::thread::sleep;
use std::time::Duration;

use showclock::{ClockEngine, NoiseType, SynthConfig, SyntheticSource, TimecodeProfile};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let clock = ClockEngine::new(TimecodeProfile::Film);
    clock.start();

    let config = SynthConfig {
        profile: TimecodeProfile::Film,
        noise: NoiseType::Pink,
        ..SynthConfig::default()
    };
    let mut source = SyntheticSource::new(config, clock.reader());
    source.on_status(|err| eprintln!("output device: {err}"));
    source.start()?;

    for second in 0..5 {
        sleep(Duration::from_secs(1));
        let frames = source.buffer(0).drain();
        source.buffer(1).drain();
        println!(
            "t={second}s clock {}  got {} frames, last ts {:?}",
            clock.current_frame(),
            frames.len(),
            frames.last().map(|f| f.timestamp())
        );
        if second == 2 {
            source.set_noise_type(NoiseType::White);
        }
    }

    source.stop();
    Ok(())
}
