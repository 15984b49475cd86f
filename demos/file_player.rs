//! Decode a file into timestamped frames locked to the internal clock
//!
//! Run with: cargo run --example file_player -- path/to/audio.mp3

use std::thread::sleep;
use std::time::{Duration, Instant};

use showclock::{ClockEngine, DecodePipeline, PipelineConfig, TimecodeProfile};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let path = std::env::args().nth(1).ok_or("usage: file_player <audio file>")?;

    let clock = ClockEngine::new(TimecodeProfile::Pal);
    let config = PipelineConfig {
        looping: true,
        ..PipelineConfig::default()
    };
    let mut pipeline = DecodePipeline::new(config, clock.reader());
    let info = pipeline.open(&path)?;
    println!(
        "{}: {} Hz, {} ch, codec {} (resampling: {})",
        path, info.sample_rate, info.channels, info.codec, info.needs_resampling
    );

    clock.start();
    pipeline.start()?;

    // play consumer: take whatever frame matches the clock, once per video frame
    let left = pipeline.buffer(0);
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(10) {
        let now = clock.current_frame();
        for ch in 1..info.channels {
            pipeline.buffer(ch).frame_at(now, 2);
        }
        match left.frame_at(now, 2) {
            Some(frame) => println!(
                "clock {now:>5}  frame {:>5}  {} samples  queue {:.0}%",
                frame.timestamp(),
                frame.sample_count(),
                pipeline.buffer_used_ratio() * 100.0
            ),
            None => println!("clock {now:>5}  no frame"),
        }
        sleep(Duration::from_millis(40));
    }

    pipeline.stop();
    clock.stop();
    Ok(())
}
