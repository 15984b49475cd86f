use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use showclock::{
    AudioFrame, ChannelRingBuffer, ClockEngine, DecodeError, DecodePipeline, PipelineConfig, SynthConfig,
    SyntheticSource, TimecodeProfile,
};
use tempfile::TempDir;

fn write_wav(dir: &Path, seconds: f32) -> PathBuf {
    let path = dir.join("tone.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let total = (44_100.0 * seconds) as usize;
    for i in 0..total {
        let t = i as f32 / 44_100.0;
        writer.write_sample(((TAU * 440.0 * t).sin() * 12_000.0) as i16).unwrap();
        writer.write_sample(((TAU * 220.0 * t).sin() * 12_000.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn wait_for_frame(buffer: &ChannelRingBuffer) -> AudioFrame {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(frame) = buffer.pop() {
            return frame;
        }
        assert!(Instant::now() < deadline, "no frame produced");
        sleep(Duration::from_millis(2));
    }
}

fn pipeline(config: PipelineConfig) -> (TempDir, ClockEngine, DecodePipeline) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempfile::tempdir().unwrap();
    let clock = ClockEngine::new(config.profile);
    let mut pipeline = DecodePipeline::new(config, clock.reader());
    let info = pipeline.open(write_wav(dir.path(), 1.0)).unwrap();
    assert_eq!(info.sample_rate, 44_100);
    assert_eq!(info.channels, 2);
    assert!(info.needs_resampling);
    (dir, clock, pipeline)
}

#[test]
fn chunks_are_one_pal_frame() {
    let (_dir, _clock, mut pipeline) = pipeline(PipelineConfig::default());
    pipeline.start().unwrap();

    let left = wait_for_frame(&pipeline.buffer(0));
    let right = wait_for_frame(&pipeline.buffer(1));
    assert_eq!(left.sample_count(), 1920);
    assert_eq!(left.payload().len(), 3840);
    assert_eq!(left.sample_rate(), 48_000);
    assert_eq!(left.channels(), 1);
    assert_eq!(left.timestamp(), 5);
    assert_eq!(right.timestamp(), 5);
    pipeline.stop();
}

#[test]
fn restart_replays_identical_audio() {
    let (_dir, _clock, mut pipeline) = pipeline(PipelineConfig::default());

    pipeline.start().unwrap();
    let first = wait_for_frame(&pipeline.buffer(0));
    pipeline.stop();
    assert_eq!(pipeline.buffer(0).available(), 0);

    pipeline.start().unwrap();
    let second = wait_for_frame(&pipeline.buffer(0));
    pipeline.stop();

    assert_eq!(first.timestamp(), second.timestamp());
    assert_eq!(first.payload(), second.payload());
}

#[test]
fn looping_restarts_timestamps() {
    let config = PipelineConfig {
        looping: true,
        loop_settle_ms: 10,
        ..PipelineConfig::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let clock = ClockEngine::new(config.profile);
    let mut pipeline = DecodePipeline::new(config, clock.reader());
    pipeline.open(write_wav(dir.path(), 0.3)).unwrap();
    pipeline.start().unwrap();

    let left = pipeline.buffer(0);
    let right = pipeline.buffer(1);
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut last = None;
    let mut wrapped = false;
    while !wrapped && Instant::now() < deadline {
        right.drain();
        for frame in left.drain() {
            if let Some(prev) = last {
                if frame.timestamp() < prev {
                    assert_eq!(frame.timestamp(), 5);
                    wrapped = true;
                }
            }
            last = Some(frame.timestamp());
        }
        sleep(Duration::from_millis(5));
    }
    pipeline.stop();
    assert!(wrapped, "stream never looped");
}

#[test]
fn gain_change_while_running() {
    let (_dir, _clock, mut pipeline) = pipeline(PipelineConfig::default());
    pipeline.set_gain_db(-200.0);
    pipeline.start().unwrap();
    let frame = wait_for_frame(&pipeline.buffer(0));
    assert!(frame.samples().all(|s| s == 0));
    pipeline.stop();
}

#[test]
fn start_requires_open_media() {
    let clock = ClockEngine::new(TimecodeProfile::Pal);
    let mut pipeline = DecodePipeline::new(PipelineConfig::default(), clock.reader());
    assert!(matches!(pipeline.start(), Err(DecodeError::NotOpened)));
    assert!(matches!(
        pipeline.open("/definitely/not/here.wav"),
        Err(DecodeError::Open { .. })
    ));
}

#[test]
fn running_twice_is_refused() {
    let (_dir, _clock, mut pipeline) = pipeline(PipelineConfig::default());
    pipeline.start().unwrap();
    assert!(matches!(pipeline.start(), Err(DecodeError::AlreadyRunning)));
    pipeline.stop();
    assert!(!pipeline.is_running());
}

#[test]
fn synthetic_source_starts_ahead_of_clock() {
    let clock = ClockEngine::new(TimecodeProfile::Pal);
    clock.seek(100);
    assert_eq!(clock.current_frame(), 100);

    let config = SynthConfig {
        channels: 1,
        seed: Some(1),
        ..SynthConfig::default()
    };
    let mut source = SyntheticSource::new(config, clock.reader());
    let mut callback = source.start_detached();
    callback.render(1920 * 2);

    let frames = source.buffer(0).drain();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].timestamp(), 105);
    assert_eq!(frames[1].timestamp(), 106);
}
