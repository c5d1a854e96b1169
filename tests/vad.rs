//! Voice activity detection integration tests
//!
//! Drives the detector and capture engine from synthetic frames, no audio
//! hardware required

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use junin::config::AudioConfig;
use junin::events::{self, AssistantEvent, RecordingOrigin};
use junin::voice::{
    CaptureEngine, DeviceSelection, InputArbiter, InputOwner, SegmentRecorder, VadHandle,
    VadState, VadTransition, VoiceActivityDetector, run_vad_loop,
};
use junin::Error;

mod common;

use common::{FakeInput, ScriptedSource, silence_frames, sine_frames};

const FRAME_LEN: usize = 160;
const RATE: u32 = 16_000;
const FRAME: Duration = Duration::from_millis(10);

fn config() -> AudioConfig {
    AudioConfig {
        capture_sample_rate: RATE,
        chunk_size: FRAME_LEN,
        detection_time: Duration::from_millis(200),
        record_time_after_detection: Duration::from_millis(500),
        ..AudioConfig::default()
    }
}

fn at(frame: u32) -> Duration {
    FRAME * frame
}

#[test]
fn test_threshold_is_strict() {
    let mut detector = VoiceActivityDetector::new(500.0, &config());

    assert_eq!(detector.process(500.0, at(0)), None);
    assert_eq!(detector.state(), VadState::Idle);

    assert_eq!(detector.process(500.01, at(1)), Some(VadTransition::Rising));
    assert_eq!(detector.state(), VadState::Rising);
}

#[test]
fn test_short_burst_does_not_activate() {
    let mut detector = VoiceActivityDetector::new(500.0, &config());

    // 19 frames is 190 ms, just short of the detection time
    for i in 0..19 {
        let transition = detector.process(1000.0, at(i));
        assert_ne!(transition, Some(VadTransition::Activated));
    }
    assert_eq!(detector.process(0.0, at(19)), Some(VadTransition::Aborted));
    assert_eq!(detector.state(), VadState::Idle);
}

#[test]
fn test_activation_at_detection_time() {
    let mut detector = VoiceActivityDetector::new(500.0, &config());

    for i in 0..19 {
        detector.process(1000.0, at(i));
    }
    assert_eq!(
        detector.process(1000.0, at(19)),
        Some(VadTransition::Activated)
    );
    assert_eq!(detector.state(), VadState::Active);
}

#[test]
fn test_grace_period_bridges_pauses() {
    let mut detector = VoiceActivityDetector::new(500.0, &config());
    for i in 0..20 {
        detector.process(1000.0, at(i));
    }

    // 300 ms pause, shorter than the 500 ms grace
    assert_eq!(detector.process(0.0, at(20)), Some(VadTransition::Trailing));
    for i in 21..50 {
        assert_eq!(detector.process(0.0, at(i)), None);
    }
    assert_eq!(detector.process(1000.0, at(50)), Some(VadTransition::Resumed));

    // Silence until the grace period is exceeded
    let mut closed_at = None;
    for i in 51..200 {
        if detector.process(0.0, at(i)) == Some(VadTransition::Closed) {
            closed_at = Some(i);
            break;
        }
    }
    // Last loud frame ended at 510 ms; frame 101 ends at 1020 ms
    assert_eq!(closed_at, Some(101));
    assert_eq!(detector.state(), VadState::Idle);
}

#[test]
fn test_one_second_of_speech_records_one_segment() {
    let (tx, mut rx) = events::channel();
    let config = config();
    let engine = CaptureEngine::new(
        FakeInput::new(),
        InputArbiter::new(),
        config.clone(),
        DeviceSelection::Default,
        tx.clone(),
    );

    let mut frames = sine_frames(100, FRAME_LEN, RATE, 1000.0);
    frames.extend(silence_frames(80, FRAME_LEN));
    let done = Arc::new(AtomicBool::new(false));
    let mut source = ScriptedSource::new(frames, Arc::clone(&done));
    let mut detector = VoiceActivityDetector::new(500.0, &config);

    run_vad_loop(
        &mut source,
        &mut detector,
        &engine,
        &done,
        config.noise_floor,
        Some(&tx),
    )
    .unwrap();

    let mut starts = 0;
    let mut recordings = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            AssistantEvent::SpeechDetected => starts += 1,
            AssistantEvent::RecordingFinished { audio, origin } => {
                assert_eq!(origin, RecordingOrigin::Vad);
                recordings.push(audio);
            }
            _ => {}
        }
    }

    assert_eq!(starts, 1);
    assert_eq!(recordings.len(), 1);
    // 20 pre-roll frames, 80 more of speech, 50 of grace
    assert_eq!(recordings[0].frames, 150);
    assert_eq!(recordings[0].duration, Duration::from_millis(1500));

    let reader = hound::WavReader::new(std::io::Cursor::new(&recordings[0].wav)).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, RATE);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.len() as usize, 150 * FRAME_LEN);
}

#[test]
fn test_silence_records_nothing() {
    let (tx, mut rx) = events::channel();
    let config = config();
    let engine = CaptureEngine::new(
        FakeInput::new(),
        InputArbiter::new(),
        config.clone(),
        DeviceSelection::Default,
        tx.clone(),
    );
    let done = Arc::new(AtomicBool::new(false));
    let mut source = ScriptedSource::new(silence_frames(200, FRAME_LEN), Arc::clone(&done));
    let mut detector = VoiceActivityDetector::new(500.0, &config);

    run_vad_loop(&mut source, &mut detector, &engine, &done, config.noise_floor, Some(&tx)).unwrap();

    assert!(rx.try_recv().is_err());
}

#[test]
fn test_segment_open_at_stop_is_finalized() {
    let (tx, mut rx) = events::channel();
    let config = config();
    let engine = CaptureEngine::new(
        FakeInput::new(),
        InputArbiter::new(),
        config.clone(),
        DeviceSelection::Default,
        tx.clone(),
    );
    let done = Arc::new(AtomicBool::new(false));
    let mut source = ScriptedSource::new(sine_frames(40, FRAME_LEN, RATE, 1000.0), Arc::clone(&done));
    let mut detector = VoiceActivityDetector::new(500.0, &config);

    run_vad_loop(&mut source, &mut detector, &engine, &done, config.noise_floor, None).unwrap();

    match rx.try_recv() {
        Ok(AssistantEvent::RecordingFinished { audio, .. }) => assert_eq!(audio.frames, 40),
        other => panic!("expected a finished recording, got {other:?}"),
    }
    assert_eq!(detector.state(), VadState::Idle);
}

#[test]
fn test_manual_and_vad_recording_are_exclusive() {
    let (tx, _rx) = events::channel();
    let input = FakeInput::new();
    let arbiter = InputArbiter::new();
    let engine = Arc::new(CaptureEngine::new(
        input.clone(),
        Arc::clone(&arbiter),
        config(),
        DeviceSelection::Default,
        tx,
    ));

    engine.start_recording().unwrap();
    assert!(arbiter.is_recording());
    assert!(matches!(
        engine.start(Vec::new()),
        Err(Error::InputBusy("manual recording"))
    ));
    assert!(matches!(
        VadHandle::spawn(Arc::clone(&engine), false),
        Err(Error::InputBusy(_))
    ));
    assert_eq!(input.opened(), 1);

    std::thread::sleep(Duration::from_millis(20));
    let recorded = engine.stop_recording();
    assert!(recorded.is_some());
    assert_eq!(arbiter.owner(), None);

    let mut vad = VadHandle::spawn(Arc::clone(&engine), false).unwrap();
    assert!(arbiter.is_recording_vad());
    assert!(matches!(engine.start_recording(), Err(Error::InputBusy(_))));
    assert!(!arbiter.is_recording());

    vad.stop();
    assert!(!vad.is_running());
    assert_eq!(arbiter.owner(), None);
    assert_eq!(input.opened(), 2);

    // Stopping twice is harmless
    vad.stop();
    assert!(engine.stop_recording().is_none());
}

#[test]
fn test_stop_during_calibration_is_prompt() {
    // 1024 samples at 16 kHz is 64 ms; a 50-frame window takes over 3 s
    let frame = Duration::from_millis(64);
    let (tx, _rx) = events::channel();
    let config = AudioConfig {
        chunk_size: 1024,
        ..AudioConfig::default()
    };
    let engine = Arc::new(CaptureEngine::new(
        FakeInput::paced(frame),
        InputArbiter::new(),
        config,
        DeviceSelection::Default,
        tx,
    ));

    let mut vad = VadHandle::spawn(Arc::clone(&engine), true).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let stopping = Instant::now();
    vad.stop();
    assert!(stopping.elapsed() < frame * 3);
    assert!(!vad.is_running());
    assert_eq!(engine.arbiter().owner(), None);
}

#[test]
fn test_lease_released_on_drop() {
    let arbiter = InputArbiter::new();
    {
        let lease = arbiter.acquire(InputOwner::Vad).unwrap();
        assert_eq!(lease.owner(), InputOwner::Vad);
        assert!(matches!(
            arbiter.acquire(InputOwner::Manual),
            Err(Error::InputBusy("voice detection"))
        ));
    }
    assert!(arbiter.acquire(InputOwner::Manual).is_ok());
}
