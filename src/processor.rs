//! Real-time resampling processor.
//!
//! Converts arbitrary-rate f32 mono input into fixed-size 16kHz PCM16
//! frames and reports a running signal level. Runs inside the audio
//! callback, so the steady-state path performs no I/O, takes no locks,
//! and allocates only when handing a completed frame upstream.

use crate::config::AudioConfig;

/// Gain applied to the mean rectified amplitude before clamping.
/// Raw speech averages are tiny; the gain makes the meter readable.
const LEVEL_GAIN: f32 = 3.0;

/// A contiguous block of PCM16 samples at the target rate.
///
/// Immutable once emitted; ownership moves upstream with the message, so
/// the audio thread never copies a completed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Serialize as little-endian bytes for the wire.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[cfg(test)]
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples }
    }
}

/// Control messages sent down into the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorControl {
    Pause,
    Resume,
    Stop,
}

/// Messages the processor posts upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorMessage {
    /// Short-window average rectified amplitude in [0, 1].
    Level(f32),
    /// A completed (or, on stop, final partial) frame.
    Audio(AudioFrame),
}

/// Configuration for the processor, fixed at construction.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Native rate of the incoming samples.
    pub input_rate: u32,
    /// Output rate after decimation.
    pub target_rate: u32,
    /// Samples per emitted frame.
    pub frame_size: usize,
    /// Input samples between level reports.
    pub level_interval: usize,
}

impl ProcessorConfig {
    pub fn from_audio(audio: &AudioConfig, input_rate: u32) -> Self {
        Self {
            input_rate,
            target_rate: audio.target_sample_rate,
            frame_size: audio.frame_size,
            level_interval: audio.level_interval,
        }
    }
}

/// Decimating resampler with frame assembly and level metering.
///
/// Downsampling keeps every ratio-th effective sample via a fractional
/// accumulator; no low-pass filter is applied. Aliasing above the new
/// Nyquist limit is an accepted latency/simplicity trade-off.
pub struct ResampleProcessor {
    ratio: f64,
    acc: f64,
    frame: Vec<i16>,
    frame_size: usize,
    level_sum: f32,
    level_count: usize,
    level_interval: usize,
    paused: bool,
    stopped: bool,
}

impl ResampleProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            ratio: config.input_rate as f64 / config.target_rate as f64,
            acc: 0.0,
            frame: Vec::with_capacity(config.frame_size),
            frame_size: config.frame_size,
            level_sum: 0.0,
            level_count: 0,
            level_interval: config.level_interval,
            paused: false,
            stopped: false,
        }
    }

    /// Feed a batch of input samples, posting messages through `sink`.
    ///
    /// While paused or stopped, input is consumed and discarded: no frames
    /// are assembled and no level accumulates.
    pub fn process(&mut self, input: &[f32], sink: &mut impl FnMut(ProcessorMessage)) {
        if self.paused || self.stopped || input.is_empty() {
            return;
        }

        for &sample in input {
            // Level metering runs on the input stream, independent of the
            // downsample decision.
            self.level_sum += sample.abs();
            self.level_count += 1;
            if self.level_count >= self.level_interval {
                let mean = self.level_sum / self.level_count as f32;
                sink(ProcessorMessage::Level((mean * LEVEL_GAIN).min(1.0)));
                self.level_sum = 0.0;
                self.level_count = 0;
            }

            self.acc += 1.0;
            if self.acc >= self.ratio {
                self.acc -= self.ratio;
                self.frame.push(pcm16_from_f32(sample));
                if self.frame.len() >= self.frame_size {
                    self.emit_frame(sink);
                }
            }
        }
    }

    /// Apply a control message.
    ///
    /// `Pause` discards all subsequent input and resets the level
    /// accumulator, so `Resume` starts a fresh metering window.
    /// `Stop` flushes any partially filled frame as a final undersized
    /// frame, then silences the processor permanently.
    pub fn control(&mut self, control: ProcessorControl, sink: &mut impl FnMut(ProcessorMessage)) {
        match control {
            ProcessorControl::Pause => {
                self.paused = true;
                self.level_sum = 0.0;
                self.level_count = 0;
            }
            ProcessorControl::Resume => {
                self.paused = false;
            }
            ProcessorControl::Stop => {
                if !self.stopped && !self.frame.is_empty() {
                    self.emit_frame(sink);
                }
                self.stopped = true;
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Samples currently buffered toward the next frame.
    pub fn pending(&self) -> usize {
        self.frame.len()
    }

    fn emit_frame(&mut self, sink: &mut impl FnMut(ProcessorMessage)) {
        let samples = std::mem::replace(&mut self.frame, Vec::with_capacity(self.frame_size));
        sink(ProcessorMessage::Audio(AudioFrame { samples }));
    }
}

/// Clamp to [-1, 1] and round to a signed 16-bit sample. No dithering.
pub fn pcm16_from_f32(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

#[cfg(test)]
#[path = "processor_test.rs"]
mod tests;
