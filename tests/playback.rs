//! Playback buffer and stream manager integration tests

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use junin::config::AudioConfig;
use junin::voice::{DeviceSelection, Enqueue, PlaybackBuffer, PlaybackStreamManager};

mod common;

use common::{Consumer, FakeOutput};

fn manager(output: Arc<FakeOutput>) -> PlaybackStreamManager {
    let config = AudioConfig {
        playback_chunk_size: 8,
        playback_buffer_chunks: 2,
        enqueue_timeout: Duration::from_millis(20),
        fade_out_samples: 4,
        ..AudioConfig::default()
    };
    PlaybackStreamManager::new(output, &config, DeviceSelection::Default)
}

#[test]
fn test_partial_chunk_then_silence() {
    let buffer = PlaybackBuffer::new(2, 4);
    let generation = buffer.generation();
    assert_eq!(
        buffer.push(vec![0.5; 4], generation, Duration::ZERO),
        Enqueue::Queued
    );

    // Stereo output duplicates each mono sample
    let mut out = vec![1.0; 12];
    buffer.render(&mut out, 2);
    assert_eq!(&out[..8], &[0.5; 8]);
    assert_eq!(&out[8..], &[0.0; 4]);
    assert!(buffer.is_idle());
}

#[test]
fn test_full_buffer_times_out_without_blocking_consumer() {
    let buffer = PlaybackBuffer::new(1, 4);
    let generation = buffer.generation();
    assert_eq!(buffer.push(vec![0.1; 4], generation, Duration::ZERO), Enqueue::Queued);

    let started = Instant::now();
    assert_eq!(
        buffer.push(vec![0.2; 4], generation, Duration::from_millis(20)),
        Enqueue::TimedOut
    );
    assert!(started.elapsed() >= Duration::from_millis(20));

    // Consumer still gets the queued chunk immediately
    assert_eq!(buffer.pull_chunk(), vec![0.1; 4]);
}

#[test]
fn test_play_drain_and_cleanup() {
    let output = FakeOutput::new();
    let playback = manager(Arc::clone(&output));
    let consumer = Consumer::spawn(Arc::clone(playback.buffer()), Duration::from_millis(1));
    let stop = AtomicBool::new(false);

    let stats = playback.play_chunks(&[0.25; 20], &stop).unwrap();
    // Two full chunks and one padded
    assert_eq!(stats.queued, 3);
    assert_eq!(stats.dropped, 0);
    assert!(playback.finish(&stop));
    assert!(playback.drain(&stop, Duration::from_secs(1)));
    assert_eq!(consumer.chunks().len(), 3);

    playback.cleanup();
    playback.cleanup();
    assert!(!playback.is_open());

    // The next play reopens the stream
    playback.play_chunks(&[0.25; 8], &stop).unwrap();
    assert!(playback.is_open());
    assert_eq!(output.opened(), 2);
}
