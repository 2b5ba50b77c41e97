//! Streaming session client.
//!
//! Owns the websocket session to the transcription service and turns a
//! feed of audio frames into an ordered, append-only sequence of
//! transcription turns.
//!
//! All connection-state transitions are produced by [`StreamMachine`], a
//! pure state machine consuming typed [`TransportEvent`]s through a single
//! dispatch function. The async driver translates transport happenings
//! into events and executes the effects the machine returns, so the
//! transition table is testable without a socket.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RetryConfig, StreamConfig};
use crate::credentials::StreamCredential;
use crate::error::SessionError;
use crate::processor::AudioFrame;
use crate::protocol::{ClientSignal, ServerEvent, TranscriptionTurn, parse_server_event};

/// Connection lifecycle states. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
    Failed,
}

/// Transport happenings fed into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The websocket handshake completed.
    Opened,
    /// A parsed message from the service.
    Server(ServerEvent),
    /// The transport dropped or a send failed.
    ConnectionLost { reason: String },
    /// A scheduled backoff delay elapsed.
    BackoffElapsed,
    /// The service or credential rejected authentication. Non-retryable.
    AuthFailed { reason: String },
    /// The caller asked to close the session.
    CloseRequested,
}

/// Actions the driver must carry out after a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Re-dial the websocket now.
    Dial,
    /// Wait `delay`, then feed [`TransportEvent::BackoffElapsed`].
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Send the graceful end-of-stream signal.
    SendEndSession,
    /// Close the underlying transport.
    CloseTransport,
    /// Surface a new partial transcript.
    EmitPartial(String),
    /// Surface a newly finalized turn.
    EmitTurn(TranscriptionTurn),
    /// Surface a fatal session error. The machine is in `Failed`.
    Fail(SessionError),
}

/// Append-only log of finalized turns.
///
/// Ordering is service-assigned and preserved as received; the log never
/// re-sorts by timestamp. The service-side `turn_order` key deduplicates
/// redeliveries across reconnects.
#[derive(Debug, Default)]
pub struct TurnLog {
    turns: Vec<TranscriptionTurn>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[TranscriptionTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a finalized turn unless its service order was already seen.
    /// Returns the appended turn, or `None` for a duplicate.
    fn append(
        &mut self,
        text: String,
        speaker: Option<String>,
        audio_start_ms: u64,
        audio_end_ms: u64,
        order: u64,
    ) -> Option<TranscriptionTurn> {
        if let Some(last) = self.turns.last()
            && order <= last.order
        {
            debug!(order = order, "Duplicate turn after reconnect, dropped");
            return None;
        }
        let turn = TranscriptionTurn {
            position: self.turns.len() as u64,
            order,
            speaker,
            text,
            audio_start_ms,
            audio_end_ms,
        };
        self.turns.push(turn.clone());
        Some(turn)
    }

    /// Concatenation of all turn texts in append order.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn into_turns(self) -> Vec<TranscriptionTurn> {
        self.turns
    }
}

/// Pure connection state machine.
pub struct StreamMachine {
    state: ConnectionState,
    retry: RetryConfig,
    attempt: u32,
    turn_log: TurnLog,
    partial: Option<String>,
}

impl StreamMachine {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            retry,
            attempt: 0,
            turn_log: TurnLog::new(),
            partial: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Latest partial transcript; cleared whenever a turn finalizes.
    pub fn partial(&self) -> Option<&str> {
        self.partial.as_deref()
    }

    pub fn turn_log(&self) -> &TurnLog {
        &self.turn_log
    }

    pub fn into_turn_log(self) -> TurnLog {
        self.turn_log
    }

    /// Leave `Idle` for `Connecting`. No-op in any other state.
    pub fn begin_connect(&mut self) -> Vec<Effect> {
        match self.state {
            ConnectionState::Idle => {
                self.state = ConnectionState::Connecting;
                vec![Effect::Dial]
            }
            _ => Vec::new(),
        }
    }

    /// The single dispatch function: every transition goes through here.
    pub fn on_event(&mut self, event: TransportEvent) -> Vec<Effect> {
        use ConnectionState::*;
        use TransportEvent::*;

        match (self.state, event) {
            (Connecting | Reconnecting, Opened) => {
                self.state = Connected;
                self.attempt = 0;
                Vec::new()
            }
            // An initial connect failure is surfaced directly; the backoff
            // path only covers a connection lost after it was established.
            (Connecting, ConnectionLost { reason }) => {
                self.fail(SessionError::NetworkUnavailable(reason))
            }
            (Connected | Reconnecting, ConnectionLost { reason }) => self.schedule_retry(&reason),
            (Reconnecting, BackoffElapsed) => vec![Effect::Dial],
            (_, AuthFailed { reason }) => self.fail(SessionError::AuthenticationFailed(reason)),
            (Connected, Server(event)) => self.on_server_event(event),
            (Connected | Connecting | Reconnecting, CloseRequested) => {
                let was_connected = self.state == Connected;
                self.state = Closed;
                self.partial = None;
                if was_connected {
                    vec![Effect::SendEndSession, Effect::CloseTransport]
                } else {
                    vec![Effect::CloseTransport]
                }
            }
            // Close from idle/closed/failed is a no-op, not an error.
            (Idle | Closed | Failed, CloseRequested) => Vec::new(),
            (state, event) => {
                debug!(state = ?state, event = ?event, "Ignoring event in current state");
                Vec::new()
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::PartialTranscript { text } => {
                self.partial = Some(text.clone());
                vec![Effect::EmitPartial(text)]
            }
            ServerEvent::TurnComplete {
                text,
                speaker,
                audio_start_ms,
                audio_end_ms,
                turn_order,
            } => {
                self.partial = None;
                match self
                    .turn_log
                    .append(text, speaker, audio_start_ms, audio_end_ms, turn_order)
                {
                    Some(turn) => vec![Effect::EmitTurn(turn)],
                    None => Vec::new(),
                }
            }
            ServerEvent::SessionError { code, message } => {
                let error = if code.contains("auth") {
                    SessionError::AuthenticationFailed(message)
                } else {
                    SessionError::ServiceUnavailable(message)
                };
                let mut effects = vec![Effect::CloseTransport];
                effects.extend(self.fail(error));
                effects
            }
        }
    }

    fn schedule_retry(&mut self, reason: &str) -> Vec<Effect> {
        self.attempt += 1;
        if self.attempt > self.retry.max_attempts {
            return self.fail(SessionError::NetworkUnavailable(format!(
                "reconnect attempts exhausted: {reason}"
            )));
        }
        self.state = ConnectionState::Reconnecting;
        vec![Effect::ScheduleReconnect {
            attempt: self.attempt,
            delay: self.retry.delay_for_attempt(self.attempt),
        }]
    }

    fn fail(&mut self, error: SessionError) -> Vec<Effect> {
        self.state = ConnectionState::Failed;
        self.partial = None;
        vec![Effect::Fail(error)]
    }
}

/// Updates the client pushes to its consumer as the session progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    State(ConnectionState),
    Partial(String),
    Turn(TranscriptionTurn),
    Fatal(SessionError),
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Handle to a live streaming session.
pub struct StreamingClient {
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    cancel: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
    task: tokio::task::JoinHandle<TurnLog>,
}

impl StreamingClient {
    /// Open a session using a fresh short-lived credential.
    ///
    /// Resolves once the handshake completes; a failure here is surfaced
    /// as a typed error without entering the backoff path.
    pub async fn connect(
        config: &StreamConfig,
        retry: &RetryConfig,
        sample_rate: u32,
        credential: StreamCredential,
        update_tx: mpsc::UnboundedSender<StreamUpdate>,
    ) -> Result<Self, SessionError> {
        if credential.is_expired() {
            return Err(SessionError::AuthenticationFailed(
                "credential expired before connect".to_string(),
            ));
        }

        let url = session_url(&config.endpoint, credential.token(), sample_rate);
        let mut machine = StreamMachine::new(retry.clone());
        machine.begin_connect();
        let _ = update_tx.send(StreamUpdate::State(ConnectionState::Connecting));
        info!(endpoint = %config.endpoint, "Connecting to transcription service");

        let ws = match dial(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                let _ = update_tx.send(StreamUpdate::State(ConnectionState::Failed));
                return Err(e);
            }
        };
        machine.on_event(TransportEvent::Opened);
        info!("Session connected");

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let _ = update_tx.send(StreamUpdate::State(ConnectionState::Connected));
        let cancel = CancellationToken::new();

        let driver = Driver {
            ws,
            machine,
            url,
            credential,
            frame_rx,
            update_tx,
            state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            frame_tx,
            cancel,
            state_rx,
            task,
        })
    }

    /// Queue a frame for transmission. Never blocks or suspends the
    /// caller; transport failures are reported through the update channel.
    pub fn send_frame(&self, frame: AudioFrame) {
        if self.frame_tx.send(frame).is_err() {
            debug!("Frame dropped: streaming driver not running");
        }
    }

    /// Sender half for frame delivery; used by the orchestrator's pump so
    /// frames flow without borrowing the client.
    pub fn frame_sender(&self) -> mpsc::UnboundedSender<AudioFrame> {
        self.frame_tx.clone()
    }

    /// Token that shuts the driver down; used for emergency teardown when
    /// the capture side fails.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Close the session: graceful end-of-stream if connected, then
    /// transport teardown. Safe to call in any state; returns the final
    /// turn log.
    pub async fn close(self) -> TurnLog {
        self.cancel.cancel();
        match self.task.await {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "Streaming driver panicked");
                TurnLog::new()
            }
        }
    }
}

fn session_url(endpoint: &str, token: &str, sample_rate: u32) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{sep}token={token}&sample_rate={sample_rate}")
}

async fn dial(url: &str) -> Result<WsStream, SessionError> {
    use tokio_tungstenite::tungstenite::Error as WsError;

    match tokio_tungstenite::connect_async(url).await {
        Ok((ws, _response)) => Ok(ws),
        Err(WsError::Http(response)) => {
            let status = response.status();
            if status == 401 || status == 403 {
                Err(SessionError::AuthenticationFailed(format!(
                    "handshake rejected with {status}"
                )))
            } else {
                Err(SessionError::ServiceUnavailable(format!(
                    "handshake rejected with {status}"
                )))
            }
        }
        Err(e) => Err(SessionError::NetworkUnavailable(e.to_string())),
    }
}

/// How a connected phase ended.
enum PhaseEnd {
    Cancelled,
    Failed,
    Lost(String),
}

/// What the driver does after settling a batch of effects.
enum Next {
    Continue,
    Reconnect(Duration),
    Stop,
}

struct Driver {
    ws: WsStream,
    machine: StreamMachine,
    url: String,
    credential: StreamCredential,
    frame_rx: mpsc::UnboundedReceiver<AudioFrame>,
    update_tx: mpsc::UnboundedSender<StreamUpdate>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) -> TurnLog {
        let mut frames_open = true;
        loop {
            match self.connected_phase(&mut frames_open).await {
                PhaseEnd::Cancelled => {
                    self.graceful_close().await;
                    break;
                }
                PhaseEnd::Failed => break,
                PhaseEnd::Lost(reason) => {
                    warn!(reason = %reason, "Connection lost");
                    let effects = self.machine.on_event(TransportEvent::ConnectionLost { reason });
                    match self.settle(effects) {
                        Next::Reconnect(delay) => {
                            if !self.reconnect_loop(delay, &mut frames_open).await {
                                break;
                            }
                        }
                        _ => break,
                    }
                }
            }
        }
        self.machine.into_turn_log()
    }

    /// Pump frames out and events in until the connection ends.
    async fn connected_phase(&mut self, frames_open: &mut bool) -> PhaseEnd {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return PhaseEnd::Cancelled,
                frame = self.frame_rx.recv(), if *frames_open => match frame {
                    Some(frame) => {
                        if let Err(e) = self.ws.send(Message::binary(frame.to_le_bytes())).await {
                            return PhaseEnd::Lost(format!("send failed: {e}"));
                        }
                    }
                    None => *frames_open = false,
                },
                msg = self.ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_server_event(text.as_str()) {
                            Ok(event) => {
                                let effects =
                                    self.machine.on_event(TransportEvent::Server(event));
                                if matches!(self.settle(effects), Next::Stop) {
                                    let _ = self.ws.close(None).await;
                                    return PhaseEnd::Failed;
                                }
                            }
                            Err(e) => {
                                let error = SessionError::MalformedMessage(e.to_string());
                                warn!(error = %error, "Dropping malformed server message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return PhaseEnd::Lost("closed by peer".to_string());
                    }
                    Some(Ok(_)) => {} // pings handled by the library, binary ignored
                    Some(Err(e)) => return PhaseEnd::Lost(format!("transport error: {e}")),
                },
            }
        }
    }

    /// Bounded-backoff reconnect. Returns true once reconnected, false if
    /// the session ended (cancel, credential expiry, attempts exhausted).
    async fn reconnect_loop(&mut self, mut delay: Duration, frames_open: &mut bool) -> bool {
        loop {
            if !self.backoff_wait(delay, frames_open).await {
                let effects = self.machine.on_event(TransportEvent::CloseRequested);
                self.settle(effects);
                return false;
            }
            if self.credential.is_expired() {
                let effects = self.machine.on_event(TransportEvent::AuthFailed {
                    reason: "credential expired during reconnect".to_string(),
                });
                self.settle(effects);
                return false;
            }

            let effects = self.machine.on_event(TransportEvent::BackoffElapsed);
            self.settle(effects);
            info!(attempt = self.machine.attempt(), "Reconnecting");

            match dial(&self.url).await {
                Ok(ws) => {
                    self.ws = ws;
                    let effects = self.machine.on_event(TransportEvent::Opened);
                    self.settle(effects);
                    info!("Reconnected");
                    return true;
                }
                // A non-retryable redial failure (handshake rejection)
                // ends the session instead of burning more attempts.
                Err(e) if !e.is_retryable() => {
                    let effects = self.machine.on_event(TransportEvent::AuthFailed {
                        reason: e.to_string(),
                    });
                    self.settle(effects);
                    return false;
                }
                Err(e) => {
                    let effects = self
                        .machine
                        .on_event(TransportEvent::ConnectionLost { reason: e.to_string() });
                    match self.settle(effects) {
                        Next::Reconnect(next_delay) => delay = next_delay,
                        _ => return false,
                    }
                }
            }
        }
    }

    /// Sleep out the backoff, discarding frames produced while the
    /// transport is down. Returns false on cancellation.
    async fn backoff_wait(&mut self, delay: Duration, frames_open: &mut bool) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                frame = self.frame_rx.recv(), if *frames_open => {
                    if frame.is_none() {
                        *frames_open = false;
                    }
                }
            }
        }
    }

    async fn graceful_close(&mut self) {
        let effects = self.machine.on_event(TransportEvent::CloseRequested);
        if effects.iter().any(|e| matches!(e, Effect::SendEndSession)) {
            // Frames queued before the close request carry the tail of the
            // dictation; flush them ahead of the end-of-stream signal.
            while let Ok(frame) = self.frame_rx.try_recv() {
                if self
                    .ws
                    .send(Message::binary(frame.to_le_bytes()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let signal = Message::text(ClientSignal::EndSession.to_json());
            let _ = self.ws.send(signal).await;
        }
        let _ = self.ws.close(None).await;
        self.settle(effects);
        info!("Session closed");
    }

    /// Execute the notification side of a batch of effects and report the
    /// flow-changing one, if any. Dial/close/end-session effects are
    /// carried out by the calling context.
    fn settle(&self, effects: Vec<Effect>) -> Next {
        let mut next = Next::Continue;
        for effect in effects {
            match effect {
                Effect::EmitPartial(text) => {
                    let _ = self.update_tx.send(StreamUpdate::Partial(text));
                }
                Effect::EmitTurn(turn) => {
                    let _ = self.update_tx.send(StreamUpdate::Turn(turn));
                }
                Effect::Fail(error) => {
                    let _ = self.update_tx.send(StreamUpdate::Fatal(error));
                    next = Next::Stop;
                }
                Effect::ScheduleReconnect { attempt, delay } => {
                    debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Backoff scheduled");
                    next = Next::Reconnect(delay);
                }
                Effect::Dial | Effect::SendEndSession | Effect::CloseTransport => {}
            }
        }
        self.publish_state();
        next
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        if *self.state_tx.borrow() != state {
            self.state_tx.send_replace(state);
            let _ = self.update_tx.send(StreamUpdate::State(state));
        }
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
