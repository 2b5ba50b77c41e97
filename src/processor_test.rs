use super::*;

fn test_config(input_rate: u32) -> ProcessorConfig {
    ProcessorConfig {
        input_rate,
        target_rate: 16_000,
        frame_size: 800,
        level_interval: 4_000,
    }
}

fn collect(processor: &mut ResampleProcessor, input: &[f32]) -> Vec<ProcessorMessage> {
    let mut messages = Vec::new();
    processor.process(input, &mut |m| messages.push(m));
    messages
}

fn frames(messages: &[ProcessorMessage]) -> Vec<&AudioFrame> {
    messages
        .iter()
        .filter_map(|m| match m {
            ProcessorMessage::Audio(f) => Some(f),
            ProcessorMessage::Level(_) => None,
        })
        .collect()
}

#[test]
fn test_48khz_one_full_frame() {
    // ratio = 3.0: 2400 input samples -> exactly 800 output samples
    let mut processor = ResampleProcessor::new(&test_config(48_000));
    let input = vec![0.5f32; 2_400];

    let messages = collect(&mut processor, &input);
    let audio = frames(&messages);

    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].len(), 800);
    assert_eq!(processor.pending(), 0);
}

#[test]
fn test_48khz_partial_frame_stays_buffered() {
    let mut processor = ResampleProcessor::new(&test_config(48_000));
    let input = vec![0.5f32; 2_397]; // one sample short of a full frame

    let messages = collect(&mut processor, &input);

    assert!(frames(&messages).is_empty());
    assert_eq!(processor.pending(), 799);
}

#[test]
fn test_441khz_ratio_produces_expected_count() {
    // ratio = 2.75625: 44100 input samples -> 16000 output samples
    let mut processor = ResampleProcessor::new(&test_config(44_100));
    let input = vec![0.1f32; 44_100];

    let messages = collect(&mut processor, &input);
    let audio = frames(&messages);
    let total: usize = audio.len() * 800 + processor.pending();

    assert_eq!(total, 16_000);
    assert_eq!(audio.len(), 20);
    // All completed frames are exactly frame-sized
    assert!(audio.iter().all(|f| f.len() == 800));
}

#[test]
fn test_stop_flushes_partial_frame() {
    let mut processor = ResampleProcessor::new(&test_config(48_000));
    // 1050 input samples at ratio 3 -> 350 buffered output samples
    collect(&mut processor, &vec![0.5f32; 1_050]);
    assert_eq!(processor.pending(), 350);

    let mut messages = Vec::new();
    processor.control(ProcessorControl::Stop, &mut |m| messages.push(m));

    let audio = frames(&messages);
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].len(), 350);

    // No further output after stop
    let after = collect(&mut processor, &vec![0.5f32; 4_800]);
    assert!(after.is_empty());
}

#[test]
fn test_stop_with_empty_buffer_emits_nothing() {
    let mut processor = ResampleProcessor::new(&test_config(48_000));
    let mut messages = Vec::new();
    processor.control(ProcessorControl::Stop, &mut |m| messages.push(m));
    assert!(messages.is_empty());
}

#[test]
fn test_stop_is_idempotent() {
    let mut processor = ResampleProcessor::new(&test_config(48_000));
    collect(&mut processor, &vec![0.5f32; 1_050]);

    let mut messages = Vec::new();
    processor.control(ProcessorControl::Stop, &mut |m| messages.push(m));
    processor.control(ProcessorControl::Stop, &mut |m| messages.push(m));

    assert_eq!(frames(&messages).len(), 1);
}

#[test]
fn test_pause_gates_input_consumption() {
    let mut processor = ResampleProcessor::new(&test_config(48_000));
    let mut messages = Vec::new();

    processor.process(&vec![0.5f32; 1_200], &mut |m| messages.push(m));
    let pending_before = processor.pending();

    processor.control(ProcessorControl::Pause, &mut |m| messages.push(m));
    processor.process(&vec![0.9f32; 48_000], &mut |m| messages.push(m));

    // Nothing emitted and nothing buffered while paused
    assert!(frames(&messages).is_empty());
    assert_eq!(processor.pending(), pending_before);

    processor.control(ProcessorControl::Resume, &mut |m| messages.push(m));
    processor.process(&vec![0.5f32; 1_200], &mut |m| messages.push(m));
    assert_eq!(frames(&messages).len(), 1);
}

#[test]
fn test_pause_resets_level_accumulator() {
    let config = ProcessorConfig {
        level_interval: 100,
        ..test_config(48_000)
    };
    let mut processor = ResampleProcessor::new(&config);
    let mut messages = Vec::new();

    // Accumulate 50 loud samples, pause, resume, then 100 quiet samples.
    processor.process(&vec![1.0f32; 50], &mut |m| messages.push(m));
    processor.control(ProcessorControl::Pause, &mut |m| messages.push(m));
    processor.control(ProcessorControl::Resume, &mut |m| messages.push(m));
    processor.process(&vec![0.1f32; 100], &mut |m| messages.push(m));

    let levels: Vec<f32> = messages
        .iter()
        .filter_map(|m| match m {
            ProcessorMessage::Level(v) => Some(*v),
            _ => None,
        })
        .collect();

    // The pre-pause window was discarded: one report, quiet samples only.
    assert_eq!(levels.len(), 1);
    assert!((levels[0] - 0.3).abs() < 1e-3);
}

#[test]
fn test_level_clamped_for_clipped_input() {
    let config = ProcessorConfig {
        level_interval: 10,
        ..test_config(48_000)
    };
    let mut processor = ResampleProcessor::new(&config);

    let messages = collect(&mut processor, &vec![5.0f32; 10]);
    let level = messages
        .iter()
        .find_map(|m| match m {
            ProcessorMessage::Level(v) => Some(*v),
            _ => None,
        })
        .expect("level report");

    assert!((0.0..=1.0).contains(&level));
    assert_eq!(level, 1.0);
}

#[test]
fn test_level_cadence_follows_input_rate() {
    let config = ProcessorConfig {
        level_interval: 4_000,
        ..test_config(48_000)
    };
    let mut processor = ResampleProcessor::new(&config);

    let messages = collect(&mut processor, &vec![0.2f32; 12_000]);
    let level_count = messages
        .iter()
        .filter(|m| matches!(m, ProcessorMessage::Level(_)))
        .count();

    // 12000 input samples / 4000 interval = 3 reports, regardless of
    // how many output samples the decimator produced.
    assert_eq!(level_count, 3);
}

#[test]
fn test_decimation_is_deterministic() {
    let input: Vec<f32> = (0..10_000).map(|i| ((i % 200) as f32 / 100.0) - 1.0).collect();

    let run = || {
        let mut processor = ResampleProcessor::new(&test_config(44_100));
        let mut out: Vec<i16> = Vec::new();
        processor.process(&input, &mut |m| {
            if let ProcessorMessage::Audio(f) = m {
                out.extend_from_slice(f.samples());
            }
        });
        let mut tail = Vec::new();
        processor.control(ProcessorControl::Stop, &mut |m| {
            if let ProcessorMessage::Audio(f) = m {
                tail.extend_from_slice(f.samples());
            }
        });
        out.extend(tail);
        out
    };

    assert_eq!(run(), run());
}

#[test]
fn test_pcm16_conversion_clamps_and_rounds() {
    assert_eq!(pcm16_from_f32(0.0), 0);
    assert_eq!(pcm16_from_f32(1.0), 32_767);
    assert_eq!(pcm16_from_f32(-1.0), -32_767);
    assert_eq!(pcm16_from_f32(2.5), 32_767);
    assert_eq!(pcm16_from_f32(-2.5), -32_767);
    assert_eq!(pcm16_from_f32(0.5), 16_384); // round(16383.5)
}

#[test]
fn test_empty_input_returns_promptly() {
    let mut processor = ResampleProcessor::new(&test_config(48_000));
    let messages = collect(&mut processor, &[]);
    assert!(messages.is_empty());
}

#[test]
fn test_frame_le_bytes() {
    let frame = AudioFrame::from_samples(vec![1, -2, 256]);
    assert_eq!(frame.to_le_bytes(), vec![1, 0, 0xFE, 0xFF, 0, 1]);
}
