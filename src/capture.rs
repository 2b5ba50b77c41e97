//! Microphone capture and wiring to the resampling processor.
//!
//! The cpal stream lives on a dedicated capture thread; its audio callback
//! owns a [`ResampleProcessor`]. Control messages travel down through a
//! `std::sync::mpsc` channel polled non-blockingly per callback, and
//! audio/level messages travel up through a tokio unbounded channel, so
//! the audio callback never blocks on the consumer.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::SessionError;
use crate::processor::{ProcessorConfig, ProcessorControl, ProcessorMessage, ResampleProcessor};

/// Capture lifecycle states. The controller only exists while a device is
/// held, so pre-acquisition states live on the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Recording,
    Paused,
    Stopped,
}

/// Commands understood by the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureCommand {
    Pause,
    Resume,
    Stop,
}

/// Cloneable handle for stopping capture from another task.
///
/// Used by the orchestrator's event pump to release the microphone when
/// the streaming side fails.
#[derive(Clone)]
pub struct CaptureHandle {
    cmd_tx: mpsc::Sender<CaptureCommand>,
}

impl CaptureHandle {
    /// Request a stop; best-effort (the thread may already be gone).
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(CaptureCommand::Stop);
    }

    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::Receiver<CaptureCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        (Self { cmd_tx }, cmd_rx)
    }
}

/// Microphone lifecycle controller.
///
/// Constructed by [`CaptureController::start`], which acquires the default
/// input device. The device is released on `stop()` and on drop.
pub struct CaptureController {
    cmd_tx: mpsc::Sender<CaptureCommand>,
    thread: Option<thread::JoinHandle<()>>,
    state: RecordingState,
    sample_rate: u32,
}

impl CaptureController {
    /// Acquire the microphone and start capturing.
    ///
    /// Audio and level messages are pushed into `msg_tx` as they are
    /// produced; device failures after startup are reported through
    /// `fault_tx`. Returns once audio is flowing.
    pub fn start(
        audio: &AudioConfig,
        msg_tx: UnboundedSender<ProcessorMessage>,
        fault_tx: UnboundedSender<SessionError>,
    ) -> Result<Self, SessionError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let audio = audio.clone();
        let thread = thread::Builder::new()
            .name("voicestream-capture".to_string())
            .spawn(move || capture_thread(&audio, msg_tx, fault_tx, cmd_rx, ready_tx))
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;

        // Startup blocks on device acquisition; on some platforms this is
        // where the OS permission prompt resolves.
        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!(sample_rate = sample_rate, "Capture started");
                Ok(Self {
                    cmd_tx,
                    thread: Some(thread),
                    state: RecordingState::Recording,
                    sample_rate,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SessionError::DeviceUnavailable(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Native sample rate of the acquired device.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Handle for stopping capture from another task.
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Pause sample consumption without tearing down the audio graph.
    /// Resuming is near-instantaneous and never re-prompts for permission.
    pub fn pause(&mut self) {
        if self.state == RecordingState::Recording {
            let _ = self.cmd_tx.send(CaptureCommand::Pause);
            self.state = RecordingState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == RecordingState::Paused {
            let _ = self.cmd_tx.send(CaptureCommand::Resume);
            self.state = RecordingState::Recording;
        }
    }

    /// Flush the final partial frame, tear down the stream, and release
    /// the device. Idempotent; bounded wait for the capture thread.
    pub fn stop(&mut self) {
        if self.state == RecordingState::Stopped {
            return;
        }
        let _ = self.cmd_tx.send(CaptureCommand::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.state = RecordingState::Stopped;
        info!("Capture stopped");
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        // Release the microphone on every exit path.
        self.stop();
    }
}

/// Interval the capture thread waits after a stop command so the audio
/// callback can observe it and flush. Longer than any realistic callback
/// period.
const FLUSH_GRACE: Duration = Duration::from_millis(80);

fn capture_thread(
    audio: &AudioConfig,
    msg_tx: UnboundedSender<ProcessorMessage>,
    fault_tx: UnboundedSender<SessionError>,
    cmd_rx: mpsc::Receiver<CaptureCommand>,
    ready_tx: mpsc::Sender<Result<u32, SessionError>>,
) {
    let (stream, sample_rate, ctrl_tx) = match build_stream(audio, msg_tx, fault_tx) {
        Ok(built) => {
            let _ = ready_tx.send(Ok(built.1));
            built
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    debug!(sample_rate = sample_rate, "Capture thread running");

    // Relay commands into the audio callback until stop or controller drop.
    loop {
        match cmd_rx.recv() {
            Ok(CaptureCommand::Pause) => {
                let _ = ctrl_tx.send(ProcessorControl::Pause);
            }
            Ok(CaptureCommand::Resume) => {
                let _ = ctrl_tx.send(ProcessorControl::Resume);
            }
            Ok(CaptureCommand::Stop) | Err(_) => {
                let _ = ctrl_tx.send(ProcessorControl::Stop);
                // Let the callback run once more to flush the final frame.
                thread::sleep(FLUSH_GRACE);
                break;
            }
        }
    }

    let _ = stream.pause();
    drop(stream);
    debug!("Capture thread exited, device released");
}

type BuiltStream = (cpal::Stream, u32, mpsc::Sender<ProcessorControl>);

fn build_stream(
    audio: &AudioConfig,
    msg_tx: UnboundedSender<ProcessorMessage>,
    fault_tx: UnboundedSender<SessionError>,
) -> Result<BuiltStream, SessionError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or_else(|| {
        SessionError::DeviceUnavailable("no input device available".to_string())
    })?;

    let config = device
        .default_input_config()
        .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;

    let sample_rate = config.sample_rate();
    let channels = config.channels();
    if sample_rate != audio.preferred_capture_rate {
        debug!(
            native = sample_rate,
            preferred = audio.preferred_capture_rate,
            "Device rate differs from preferred rate, decimator will adapt"
        );
    }

    let mut processor = ResampleProcessor::new(&ProcessorConfig::from_audio(audio, sample_rate));
    let (ctrl_tx, ctrl_rx) = mpsc::channel::<ProcessorControl>();

    let mut sink = move |m: ProcessorMessage| {
        let _ = msg_tx.send(m);
    };
    let mut on_input = move |samples: &[f32]| {
        while let Ok(control) = ctrl_rx.try_recv() {
            processor.control(control, &mut sink);
        }
        if channels == 1 {
            processor.process(samples, &mut sink);
        } else {
            processor.process(&to_mono(samples, channels), &mut sink);
        }
    };

    let err_fn = move |err: cpal::StreamError| {
        warn!(error = %err, "Audio stream error");
        let fault = match err {
            cpal::StreamError::DeviceNotAvailable => {
                SessionError::DeviceUnavailable("device disconnected".to_string())
            }
            other => SessionError::DeviceUnavailable(other.to_string()),
        };
        let _ = fault_tx.send(fault);
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _| on_input(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _| {
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                on_input(&samples);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config.into(),
            move |data: &[u16], _| {
                let samples: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 - 32768.0) / 32768.0)
                    .collect();
                on_input(&samples);
            },
            err_fn,
            None,
        ),
        format => {
            return Err(SessionError::DeviceUnavailable(format!(
                "unsupported sample format: {format:?}"
            )));
        }
    }
    .map_err(map_build_error)?;

    stream
        .play()
        .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;

    Ok((stream, sample_rate, ctrl_tx))
}

/// OS permission denial surfaces as a backend-specific build error on the
/// major hosts; everything else is a device problem.
fn map_build_error(e: cpal::BuildStreamError) -> SessionError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            SessionError::DeviceUnavailable("device not available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            SessionError::DeviceUnavailable("stream config not supported".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => {
            SessionError::PermissionDenied(err.to_string())
        }
        other => SessionError::DeviceUnavailable(other.to_string()),
    }
}

/// Convert multi-channel interleaved samples to mono by averaging all channels.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod tests;
