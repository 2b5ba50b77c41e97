//! Session orchestrator: the only component the UI talks to.
//!
//! Composes the capture controller and the streaming client into one
//! state machine, owns session duration and error state, and performs
//! cross-component teardown: if either side fails fatally, the other is
//! shut down before the error is surfaced, so the caller never observes
//! a half-stopped session.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{CaptureController, CaptureHandle};
use crate::config::Config;
use crate::credentials;
use crate::error::SessionError;
use crate::processor::{AudioFrame, ProcessorMessage};
use crate::protocol::TranscriptionTurn;
use crate::stream::{ConnectionState, StreamUpdate, StreamingClient};

/// Collapsed session states presented to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RequestingPermission,
    Connecting,
    Recording,
    Paused,
    Reconnecting,
    Stopped,
    Error,
}

/// Final result of a dictation session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// All turn texts concatenated in order.
    pub transcript: String,
    /// Ordered, finalized turns.
    pub turns: Vec<TranscriptionTurn>,
    /// Elapsed recording time, excluding paused spans.
    pub duration: Duration,
}

type TurnCallback = Box<dyn Fn(&TranscriptionTurn) + Send + Sync>;
type StopCallback = Box<dyn Fn(&SessionSummary) + Send + Sync>;

/// Tracks elapsed session time, excluding paused spans.
#[derive(Debug, Default)]
struct DurationTracker {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl DurationTracker {
    fn start(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        self.pause();
    }

    fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + since.elapsed(),
            None => self.accumulated,
        }
    }
}

/// State shared between the orchestrator and its event pump.
struct Shared {
    state: watch::Sender<SessionState>,
    level: watch::Sender<f32>,
    partial: watch::Sender<Option<String>>,
    capture_drained: watch::Sender<bool>,
    turns: Mutex<Vec<TranscriptionTurn>>,
    last_error: Mutex<Option<SessionError>>,
    resume_to: Mutex<SessionState>,
    clock: Mutex<DurationTracker>,
    on_turn: Mutex<Option<TurnCallback>>,
    on_stop: Mutex<Option<StopCallback>>,
}

struct ActiveSession {
    capture: CaptureController,
    stream: StreamingClient,
    pump: tokio::task::JoinHandle<()>,
}

/// Orchestrates one dictation session at a time.
pub struct SessionOrchestrator {
    config: Config,
    http: reqwest::Client,
    shared: Arc<Shared>,
    active: Option<ActiveSession>,
}

impl SessionOrchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            shared: Arc::new(Shared {
                state: watch::Sender::new(SessionState::Idle),
                level: watch::Sender::new(0.0),
                partial: watch::Sender::new(None),
                capture_drained: watch::Sender::new(false),
                turns: Mutex::new(Vec::new()),
                last_error: Mutex::new(None),
                resume_to: Mutex::new(SessionState::Recording),
                clock: Mutex::new(DurationTracker::default()),
                on_turn: Mutex::new(None),
                on_stop: Mutex::new(None),
            }),
            active: None,
        }
    }

    /// Register a callback invoked for each finalized turn.
    pub fn on_turn(&self, callback: impl Fn(&TranscriptionTurn) + Send + Sync + 'static) {
        *self.shared.on_turn.lock().unwrap() = Some(Box::new(callback));
    }

    /// Register a callback invoked once when the session stops.
    pub fn on_stop(&self, callback: impl Fn(&SessionSummary) + Send + Sync + 'static) {
        *self.shared.on_stop.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Latest signal level in [0, 1].
    pub fn level(&self) -> f32 {
        *self.shared.level.borrow()
    }

    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.shared.level.subscribe()
    }

    /// Latest provisional transcript, if one is pending.
    pub fn partial(&self) -> Option<String> {
        self.shared.partial.borrow().clone()
    }

    pub fn subscribe_partial(&self) -> watch::Receiver<Option<String>> {
        self.shared.partial.subscribe()
    }

    /// Ordered finalized turns so far.
    pub fn turns(&self) -> Vec<TranscriptionTurn> {
        self.shared.turns.lock().unwrap().clone()
    }

    /// Concatenation of all finalized turn texts.
    pub fn transcript(&self) -> String {
        join_transcript(&self.shared.turns.lock().unwrap())
    }

    /// Elapsed recording time, excluding paused spans.
    pub fn elapsed(&self) -> Duration {
        self.shared.clock.lock().unwrap().elapsed()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.last_error.lock().unwrap().clone()
    }

    /// Start a dictation session: fetch a fresh credential, connect the
    /// stream, then acquire the microphone — in that order, so we neither
    /// waste frames before the connection is up nor burn backend session
    /// quota without intent to capture.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let busy = matches!(
            self.state(),
            SessionState::RequestingPermission
                | SessionState::Connecting
                | SessionState::Recording
                | SessionState::Paused
                | SessionState::Reconnecting
        );
        if self.active.is_some() || busy {
            return Err(SessionError::SessionAlreadyActive);
        }

        self.reset_observables();
        self.set_state(SessionState::Connecting);
        info!("Starting dictation session");

        let credential = match credentials::fetch(&self.http, &self.config.stream.token_url).await {
            Ok(credential) => credential,
            Err(e) => return Err(self.fail_start(e)),
        };

        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let stream = match StreamingClient::connect(
            &self.config.stream,
            &self.config.retry,
            self.config.audio.target_sample_rate,
            credential,
            update_tx,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail_start(e)),
        };

        self.set_state(SessionState::RequestingPermission);
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        // Device acquisition blocks on the OS (and possibly a permission
        // prompt); keep it off the async workers.
        let audio = self.config.audio.clone();
        let started =
            tokio::task::spawn_blocking(move || CaptureController::start(&audio, msg_tx, fault_tx))
                .await
                .map_err(|e| SessionError::DeviceUnavailable(e.to_string()));
        let capture = match started {
            Ok(Ok(capture)) => capture,
            Ok(Err(e)) | Err(e) => {
                // No orphaned connection if the microphone fails.
                stream.close().await;
                return Err(self.fail_start(e));
            }
        };

        self.shared.clock.lock().unwrap().start();
        let pump = tokio::spawn(pump(
            self.shared.clone(),
            msg_rx,
            fault_rx,
            update_rx,
            stream.frame_sender(),
            capture.handle(),
            stream.cancel_handle(),
        ));

        self.active = Some(ActiveSession {
            capture,
            stream,
            pump,
        });
        self.set_state(SessionState::Recording);
        info!("Session recording");
        Ok(())
    }

    /// Stop the session. Capture stops first so the microphone is
    /// released immediately; the stream is then closed gracefully and the
    /// final transcript assembled. Idempotent: a second call rebuilds the
    /// summary from the finished session.
    pub async fn stop(&mut self) -> SessionSummary {
        let Some(active) = self.active.take() else {
            return self.summary();
        };
        let ActiveSession {
            capture,
            stream,
            pump,
        } = active;

        info!("Stopping session");
        // stop() joins the capture thread; run it off the async workers.
        let _ = tokio::task::spawn_blocking(move || {
            let mut capture = capture;
            capture.stop();
        })
        .await;

        // Wait for the pump to drain the final flushed frame into the
        // stream before closing it; bounded in case the pump already died.
        let mut drained = self.shared.capture_drained.subscribe();
        let _ = tokio::time::timeout(
            Duration::from_millis(500),
            drained.wait_for(|d| *d),
        )
        .await;

        let log = stream.close().await;
        let _ = pump.await;

        self.shared.clock.lock().unwrap().stop();
        *self.shared.turns.lock().unwrap() = log.into_turns();
        self.shared.partial.send_replace(None);

        if self.last_error().is_none() {
            self.set_state(SessionState::Stopped);
        }

        let summary = self.summary();
        if let Some(callback) = self.shared.on_stop.lock().unwrap().as_ref() {
            callback(&summary);
        }
        info!(
            turns = summary.turns.len(),
            duration_secs = summary.duration.as_secs_f32(),
            "Session stopped"
        );
        summary
    }

    /// Pause capture without tearing anything down. The duration clock
    /// pauses in lockstep.
    pub fn pause(&mut self) {
        if self.state() != SessionState::Recording {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.capture.pause();
            self.shared.clock.lock().unwrap().pause();
            self.set_state(SessionState::Paused);
            info!("Session paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state() != SessionState::Paused {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.capture.resume();
            self.shared.clock.lock().unwrap().resume();
            self.set_state(SessionState::Recording);
            info!("Session resumed");
        }
    }

    fn summary(&self) -> SessionSummary {
        let turns = self.turns();
        SessionSummary {
            transcript: join_transcript(&turns),
            turns,
            duration: self.elapsed(),
        }
    }

    fn reset_observables(&self) {
        self.shared.turns.lock().unwrap().clear();
        *self.shared.last_error.lock().unwrap() = None;
        self.shared.partial.send_replace(None);
        self.shared.level.send_replace(0.0);
        self.shared.capture_drained.send_replace(false);
    }

    fn fail_start(&mut self, error: SessionError) -> SessionError {
        warn!(error = %error, "Session start failed");
        *self.shared.last_error.lock().unwrap() = Some(error.clone());
        self.set_state(SessionState::Error);
        error
    }

    fn set_state(&self, state: SessionState) {
        self.shared.state.send_replace(state);
    }
}

/// Relays capture messages to the stream and stream updates to the shared
/// observables; performs emergency cross-component teardown on fatal
/// errors from either side.
async fn pump(
    shared: Arc<Shared>,
    mut msg_rx: mpsc::UnboundedReceiver<ProcessorMessage>,
    mut fault_rx: mpsc::UnboundedReceiver<SessionError>,
    mut update_rx: mpsc::UnboundedReceiver<StreamUpdate>,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    capture: CaptureHandle,
    stream_cancel: CancellationToken,
) {
    let mut msgs_open = true;
    let mut faults_open = true;
    loop {
        tokio::select! {
            msg = msg_rx.recv(), if msgs_open => match msg {
                Some(ProcessorMessage::Level(level)) => {
                    shared.level.send_replace(level);
                }
                Some(ProcessorMessage::Audio(frame)) => {
                    let _ = frame_tx.send(frame);
                }
                None => {
                    msgs_open = false;
                    shared.capture_drained.send_replace(true);
                }
            },
            fault = fault_rx.recv(), if faults_open => match fault {
                Some(error) if error.is_fatal() => {
                    warn!(error = %error, "Capture fault, shutting down session");
                    // Unpark the capture thread so the device is released
                    // without waiting for the caller to stop().
                    capture.stop();
                    stream_cancel.cancel();
                    record_fatal(&shared, error);
                }
                Some(error) => {
                    warn!(error = %error, "Transient capture fault");
                }
                None => faults_open = false,
            },
            update = update_rx.recv() => match update {
                Some(update) => on_stream_update(&shared, update, &capture),
                // Stream driver is gone; nothing left to pump for.
                None => break,
            },
        }
    }
}

fn on_stream_update(shared: &Shared, update: StreamUpdate, capture: &CaptureHandle) {
    match update {
        StreamUpdate::State(ConnectionState::Reconnecting) => {
            let current = *shared.state.borrow();
            if matches!(current, SessionState::Recording | SessionState::Paused) {
                *shared.resume_to.lock().unwrap() = current;
                shared.state.send_replace(SessionState::Reconnecting);
            }
        }
        StreamUpdate::State(ConnectionState::Connected) => {
            if *shared.state.borrow() == SessionState::Reconnecting {
                let restored = *shared.resume_to.lock().unwrap();
                shared.state.send_replace(restored);
            }
        }
        StreamUpdate::State(_) => {}
        StreamUpdate::Partial(text) => {
            shared.partial.send_replace(Some(text));
        }
        StreamUpdate::Turn(turn) => {
            shared.partial.send_replace(None);
            if let Some(callback) = shared.on_turn.lock().unwrap().as_ref() {
                callback(&turn);
            }
            shared.turns.lock().unwrap().push(turn);
        }
        StreamUpdate::Fatal(error) => {
            warn!(error = %error, "Stream failed, releasing microphone");
            capture.stop();
            record_fatal(shared, error);
        }
    }
}

fn record_fatal(shared: &Shared, error: SessionError) {
    shared.clock.lock().unwrap().stop();
    *shared.last_error.lock().unwrap() = Some(error);
    shared.state.send_replace(SessionState::Error);
}

fn join_transcript(turns: &[TranscriptionTurn]) -> String {
    turns
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
