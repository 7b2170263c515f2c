//! Session events and WebSocket streaming.
//!
//! Every event a session handles is turned into zero or more [`LessonEvent`]s
//! and broadcast. WebSocket clients subscribe to one session and receive only
//! that session's events.
//!
//! # Event Types
//!
//! - `connected` - sent when a client connects, carries the session snapshot
//! - `phase_changed` - the session moved to another phase
//! - `hint_revealed` - a new hint tier was revealed
//! - `challenge_scored` - a challenge result was recorded
//! - `lesson_complete` - the session reached the completion screen
//! - `error` - an event was rejected

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AppState};
use crate::session::{EventOutcome, LessonSession, Phase, SessionEvent, SessionSnapshot};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// The observed session.
    pub session_id: String,
    /// Its state at connection time.
    pub session: SessionSnapshot,
}

/// Payload for the `phase_changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChangedPayload {
    /// The session.
    pub session_id: String,
    /// Previous phase.
    pub from: Phase,
    /// New phase.
    pub to: Phase,
}

/// Payload for the `hint_revealed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintRevealedPayload {
    /// The session.
    pub session_id: String,
    /// Challenge the hint belongs to.
    pub challenge_index: usize,
    /// Hints revealed so far.
    pub tier: usize,
    /// The hint text.
    pub hint: String,
}

/// Payload for the `challenge_scored` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeScoredPayload {
    /// The session.
    pub session_id: String,
    /// Challenge that was graded.
    pub challenge_index: usize,
    /// Whether the answer was correct.
    pub success: bool,
    /// Score after grading.
    pub score: usize,
}

/// Payload for the `lesson_complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompletePayload {
    /// The session.
    pub session_id: String,
    /// Final score.
    pub score: usize,
    /// Challenges in the lesson.
    pub total: usize,
    /// Whether every challenge was passed.
    pub perfect: bool,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// The session.
    pub session_id: String,
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events streamed to observers of a session.
///
/// Serialized as JSON objects with `event` and `payload` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum LessonEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Sent when the phase changes.
    PhaseChanged(PhaseChangedPayload),
    /// Sent when a hint is revealed.
    HintRevealed(HintRevealedPayload),
    /// Sent when a challenge result is recorded.
    ChallengeScored(ChallengeScoredPayload),
    /// Sent when the lesson completes.
    LessonComplete(LessonCompletePayload),
    /// Sent when an event is rejected.
    Error(ErrorPayload),
}

impl LessonEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub fn connected(session_id: impl Into<String>, session: SessionSnapshot) -> Self {
        Self::Connected(ConnectedPayload {
            session_id: session_id.into(),
            session,
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            session_id: session_id.into(),
            message: message.into(),
        })
    }

    /// Describes what handling `event` did to `session`.
    ///
    /// `index_before` is the challenge index before the event was applied.
    #[must_use]
    pub fn from_transition(
        session_id: &str,
        event: SessionEvent,
        outcome: EventOutcome,
        index_before: usize,
        session: &LessonSession,
    ) -> Vec<Self> {
        let EventOutcome::Applied { from, to } = outcome else {
            return Vec::new();
        };
        let state = session.state();
        let mut events = Vec::new();

        match event {
            SessionEvent::ChallengeResult { success } => {
                events.push(Self::ChallengeScored(ChallengeScoredPayload {
                    session_id: session_id.to_string(),
                    challenge_index: index_before,
                    success,
                    score: state.score,
                }));
            }
            SessionEvent::RequestHint => {
                if let Some(hint) = session.current_hint() {
                    events.push(Self::HintRevealed(HintRevealedPayload {
                        session_id: session_id.to_string(),
                        challenge_index: state.current_challenge_index,
                        tier: state.hint_tier,
                        hint: hint.to_string(),
                    }));
                }
            }
            SessionEvent::Advance | SessionEvent::Skip | SessionEvent::Retry => {}
        }

        if from != to {
            events.push(Self::PhaseChanged(PhaseChangedPayload {
                session_id: session_id.to_string(),
                from,
                to,
            }));
        }

        if to == Phase::Complete && from != to {
            events.push(Self::LessonComplete(LessonCompletePayload {
                session_id: session_id.to_string(),
                score: state.score,
                total: session.total(),
                perfect: state.score == session.total(),
            }));
        }

        events
    }

    /// The session this event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Connected(p) => &p.session_id,
            Self::PhaseChanged(p) => &p.session_id,
            Self::HintRevealed(p) => &p.session_id,
            Self::ChallengeScored(p) => &p.session_id,
            Self::LessonComplete(p) => &p.session_id,
            Self::Error(p) => &p.session_id,
        }
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::PhaseChanged(_) => "phase_changed",
            Self::HintRevealed(_) => "hint_revealed",
            Self::ChallengeScored(_) => "challenge_scored",
            Self::LessonComplete(_) => "lesson_complete",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events to WebSocket clients.
///
/// Events are not kept for clients that connect later.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<LessonEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LessonEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers received it.
    pub fn send(&self, event: LessonEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Takes a session's snapshot and subscribes to the broadcaster under one
/// sessions lock.
///
/// Events are broadcast while that lock is held, so the receiver sees every
/// event after the snapshot and none before it. Counts as use of the session.
pub(crate) async fn attach(
    state: &AppState,
    session_id: &str,
) -> Option<(SessionSnapshot, broadcast::Receiver<LessonEvent>)> {
    let mut sessions = state.sessions.lock().await;
    let snapshot = sessions.get_mut(session_id)?.touch().snapshot();
    Some((snapshot, state.broadcaster.subscribe()))
}

/// Upgrades `GET /api/sessions/:id/ws` to a WebSocket bound to one session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some((snapshot, event_receiver)) = attach(&state, &session_id).await else {
        return ApiError::session_not_found(&session_id).into_response();
    };

    info!(session_id = %session_id, "New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, snapshot, event_receiver))
}

/// Handles a single WebSocket connection.
///
/// Sends `connected` with the snapshot, then forwards this session's events.
/// Pings every 30 seconds and closes after 3 missed pongs.
async fn handle_socket(
    socket: WebSocket,
    session_id: String,
    snapshot: SessionSnapshot,
    mut event_receiver: broadcast::Receiver<LessonEvent>,
) {
    let (mut sender, mut receiver) = socket.split();

    let connected_json = match serde_json::to_string(&LessonEvent::connected(&session_id, snapshot)) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize connected event");
            return;
        }
    };

    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!(session_id = %session_id, "WebSocket client connected, sent snapshot");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    // The first tick fires immediately
    heartbeat.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring data message from client");
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(event) if event.session_id() == session_id => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event");
                                continue;
                            }
                        };

                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Client lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(missed = MAX_MISSED_PONGS, "Client missed pongs, closing connection");
                    break;
                }
            }
        }
    }

    info!(session_id = %session_id, "WebSocket client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
