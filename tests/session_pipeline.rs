//! Integration tests for the dictation pipeline: synthetic captured audio
//! through the resampling processor, and service events through the
//! connection state machine. No microphone or network required.

use std::time::Duration;

use voicestream::config::{AudioConfig, RetryConfig};
use voicestream::processor::{
    ProcessorConfig, ProcessorControl, ProcessorMessage, ResampleProcessor,
};
use voicestream::protocol::ServerEvent;
use voicestream::stream::{Effect, StreamMachine, TransportEvent};

const INPUT_RATE: u32 = 48_000;

/// Generate `seconds` of a 440Hz tone at the capture rate.
fn tone(seconds: f32) -> Vec<f32> {
    let n = (INPUT_RATE as f32 * seconds) as usize;
    (0..n)
        .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / INPUT_RATE as f32).sin() * 0.5)
        .collect()
}

/// Feed samples through the processor in capture-callback-sized chunks,
/// partitioning the output into frames and level reports.
fn run_processor(
    processor: &mut ResampleProcessor,
    samples: &[f32],
) -> (Vec<Vec<i16>>, Vec<f32>) {
    let mut frames = Vec::new();
    let mut levels = Vec::new();
    let mut sink = |m: ProcessorMessage| match m {
        ProcessorMessage::Audio(frame) => frames.push(frame.samples().to_vec()),
        ProcessorMessage::Level(level) => levels.push(level),
    };
    // 10ms per callback, matching typical device buffer sizes.
    for chunk in samples.chunks(480) {
        processor.process(chunk, &mut sink);
    }
    (frames, levels)
}

fn turn_event(text: &str, order: u64) -> TransportEvent {
    TransportEvent::Server(ServerEvent::TurnComplete {
        text: text.to_string(),
        speaker: None,
        audio_start_ms: order * 1000,
        audio_end_ms: order * 1000 + 900,
        turn_order: order,
    })
}

#[test]
fn test_audio_path_produces_steady_16k_frames() {
    let audio = AudioConfig::default();
    let mut processor = ResampleProcessor::new(&ProcessorConfig::from_audio(&audio, INPUT_RATE));

    let (frames, levels) = run_processor(&mut processor, &tone(3.0));

    // 3s at 16kHz in 800-sample frames.
    assert_eq!(frames.len(), 60);
    assert!(frames.iter().all(|f| f.len() == 800));

    // 3s of input at one report per 4000 input samples.
    assert_eq!(levels.len(), 36);
    assert!(levels.iter().all(|&l| (0.0..=1.0).contains(&l)));
    assert!(levels.iter().all(|&l| l > 0.1), "Tone should register as signal");
}

#[test]
fn test_pause_gates_audio_without_losing_alignment() {
    let audio = AudioConfig::default();
    let mut processor = ResampleProcessor::new(&ProcessorConfig::from_audio(&audio, INPUT_RATE));
    let mut sink = |_: ProcessorMessage| {};

    let (before, _) = run_processor(&mut processor, &tone(1.0));
    processor.control(ProcessorControl::Pause, &mut sink);
    let (during, _) = run_processor(&mut processor, &tone(1.0));
    processor.control(ProcessorControl::Resume, &mut sink);
    let (after, _) = run_processor(&mut processor, &tone(1.0));

    assert_eq!(before.len(), 20);
    assert!(during.is_empty(), "Paused audio must be dropped, not buffered");
    assert_eq!(after.len(), 20);
}

#[test]
fn test_stop_flushes_the_final_partial_frame() {
    let audio = AudioConfig::default();
    let mut processor = ResampleProcessor::new(&ProcessorConfig::from_audio(&audio, INPUT_RATE));

    // 1.06s: 21 full output frames, 160 samples left pending.
    let (mut frames, _) = run_processor(&mut processor, &tone(1.06));
    let full = frames.len();

    let mut sink = |m: ProcessorMessage| {
        if let ProcessorMessage::Audio(frame) = m {
            frames.push(frame.samples().to_vec());
        }
    };
    processor.control(ProcessorControl::Stop, &mut sink);

    assert_eq!(frames.len(), full + 1);
    let last = frames.last().unwrap();
    assert!(!last.is_empty() && last.len() < 800);
}

#[test]
fn test_transcription_session_assembles_ordered_transcript() {
    let mut machine = StreamMachine::new(RetryConfig::default());
    machine.begin_connect();
    machine.on_event(TransportEvent::Opened);

    machine.on_event(TransportEvent::Server(ServerEvent::PartialTranscript {
        text: "Patient pres".to_string(),
    }));
    machine.on_event(turn_event("Patient presents with chest pain.", 1));
    machine.on_event(turn_event("No prior cardiac history.", 2));

    // Mid-session drop: reconnect succeeds on the first attempt and the
    // service replays the last finalized turn.
    let effects = machine.on_event(TransportEvent::ConnectionLost {
        reason: "read reset".to_string(),
    });
    assert!(matches!(
        effects.as_slice(),
        [Effect::ScheduleReconnect { attempt: 1, delay }] if *delay == Duration::from_millis(500)
    ));
    machine.on_event(TransportEvent::BackoffElapsed);
    machine.on_event(TransportEvent::Opened);

    let effects = machine.on_event(turn_event("No prior cardiac history.", 2));
    assert!(effects.is_empty(), "Replayed turn must not surface again");
    machine.on_event(turn_event("Vitals stable.", 3));

    machine.on_event(TransportEvent::CloseRequested);

    let log = machine.into_turn_log();
    assert_eq!(
        log.transcript(),
        "Patient presents with chest pain. No prior cardiac history. Vitals stable."
    );
    let positions: Vec<u64> = log.turns().iter().map(|t| t.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
}
