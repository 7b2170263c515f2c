//! HTTP API for lesson sessions.
//!
//! Exposes sessions to a rendering layer, which polls snapshots or
//! subscribes to the WebSocket stream.
//!
//! # Endpoints
//!
//! - `POST /api/sessions` - Resolve a lesson and start a session
//! - `GET /api/sessions/:id` - Get the session snapshot
//! - `POST /api/sessions/:id/events` - Apply one event
//! - `DELETE /api/sessions/:id` - Discard a session
//! - `GET /api/sessions/:id/ws` - Stream session events
//!
//! # Example
//!
//! ```no_run
//! use genius_lesson::{create_router, AppState, Config};
//!
//! # async fn example() -> genius_lesson::Result<()> {
//! let state = AppState::from_config(Config::default())?;
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::content::{ContentOrigin, LessonResolution, LessonResolver};
use crate::error::{LessonError, Result};
use crate::events::{ws_handler, EventBroadcaster, LessonEvent};
use crate::lesson::MAX_GRADE;
use crate::progress::{sink_from_config, ProgressReporter};
use crate::session::{EventOutcome, LessonSession, SessionEvent, SessionSnapshot};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for starting a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// The learner.
    pub child_id: String,
    /// Grade to pick a lesson for.
    pub grade: u8,
    /// Specific lesson to play, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
}

/// Response body for a started session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// Identifier for subsequent requests.
    pub session_id: String,
    /// Which content source served the lesson.
    pub source: ContentOrigin,
    /// Initial snapshot.
    pub session: SessionSnapshot,
}

/// Response body for an applied event.
#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    /// What the event did.
    pub outcome: EventOutcome,
    /// Snapshot after the event.
    pub session: SessionSnapshot,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// A live session and when a request last used it.
#[derive(Debug)]
pub struct SessionEntry {
    /// The session.
    pub session: LessonSession,
    /// Last request that read or changed the session.
    pub last_touched: Instant,
}

impl SessionEntry {
    pub(crate) fn new(session: LessonSession) -> Self {
        Self {
            session,
            last_touched: Instant::now(),
        }
    }

    /// Marks the session as used and returns it.
    pub fn touch(&mut self) -> &mut LessonSession {
        self.last_touched = Instant::now();
        &mut self.session
    }
}

/// Shared application state for the HTTP server.
///
/// Sessions are independent; the map lock is held for the duration of one
/// event so events for a session are applied one at a time. Sessions left
/// untouched for longer than the idle time are discarded without persistence,
/// the same as a client navigating away.
#[derive(Debug)]
pub struct AppState {
    /// Engine configuration.
    pub config: Config,
    /// Live sessions by id.
    pub sessions: Mutex<HashMap<String, SessionEntry>>,
    /// How long a session may sit untouched.
    pub session_idle: Duration,
    /// Lesson lookup.
    pub resolver: LessonResolver,
    /// Completion persistence, if enabled.
    pub reporter: Option<ProgressReporter>,
    /// Event stream for WebSocket clients.
    pub broadcaster: EventBroadcaster,
}

impl AppState {
    /// Creates a state with no progress persistence.
    #[must_use]
    pub fn new(config: Config, resolver: LessonResolver) -> Self {
        Self {
            session_idle: Duration::from_secs(config.session_idle_seconds),
            config,
            sessions: Mutex::new(HashMap::new()),
            resolver,
            reporter: None,
            broadcaster: EventBroadcaster::default(),
        }
    }

    /// Builds the resolver and progress sink described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in lessons fail to load or the progress
    /// sink is misconfigured.
    pub fn from_config(config: Config) -> Result<Self> {
        let resolver = LessonResolver::from_config(&config)?;
        let reporter = sink_from_config(&config.progress)?.map(ProgressReporter::new);
        let mut state = Self::new(config, resolver);
        state.reporter = reporter;
        Ok(state)
    }

    /// Sets where completion records are sent.
    #[must_use]
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sets how long a session may sit untouched.
    #[must_use]
    pub const fn with_session_idle(mut self, idle: Duration) -> Self {
        self.session_idle = idle;
        self
    }

    /// Discards sessions idle for longer than the idle time.
    ///
    /// Returns how many were discarded.
    pub async fn evict_idle_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|session_id, entry| {
            let keep = entry.last_touched.elapsed() <= self.session_idle;
            if !keep {
                debug!(session_id = %session_id, phase = %entry.session.phase(), "Discarding idle session");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Idle sessions discarded");
        }
        evicted
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
pub(crate) enum ApiError {
    /// Malformed or out-of-range request.
    BadRequest(String),
    /// Unknown session or no lesson to play.
    NotFound(String),
    /// Event rejected by the strict transition policy.
    Conflict(String),
    /// Anything else.
    Internal(String),
}

impl ApiError {
    pub(crate) fn session_not_found(session_id: &str) -> Self {
        Self::NotFound(format!("Session '{session_id}' not found"))
    }
}

impl From<LessonError> for ApiError {
    fn from(err: LessonError) -> Self {
        match err {
            LessonError::NoLessonAvailable { .. } => Self::NotFound(err.to_string()),
            LessonError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            LessonError::InvalidLesson { .. } => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// Routes live under `/api`, with permissive CORS for local front-ends and
/// request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/sessions", post(handle_create_session))
        .route(
            "/sessions/:id",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sessions/:id/events", post(handle_event))
        .route("/sessions/:id/ws", get(ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/sessions`.
async fn handle_create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> std::result::Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    if request.child_id.trim().is_empty() {
        return Err(ApiError::BadRequest("childId must not be empty".to_string()));
    }
    if request.grade > MAX_GRADE {
        return Err(ApiError::BadRequest(format!(
            "grade {} is out of range (0-{MAX_GRADE})",
            request.grade
        )));
    }

    let (source, lesson) = match state
        .resolver
        .resolve(request.grade, request.lesson_id.as_deref())
        .await
    {
        LessonResolution::FromPrimary(lesson) => (ContentOrigin::Primary, lesson),
        LessonResolution::FromFallback(lesson) => (ContentOrigin::Fallback, lesson),
        LessonResolution::NotFound { grade } => return Err(LessonError::no_lesson(grade).into()),
    };

    let mut session = LessonSession::new(lesson, &request.child_id, state.config.subject)?
        .with_policy(state.config.invalid_transitions);
    if let Some(reporter) = &state.reporter {
        session = session.with_reporter(reporter.clone());
    }

    state.evict_idle_sessions().await;

    let session_id = uuid::Uuid::new_v4().to_string();
    let snapshot = session.snapshot();

    info!(
        session_id = %session_id,
        child_id = %request.child_id,
        lesson_id = %snapshot.lesson_id,
        source = ?source,
        "Session started"
    );

    state
        .sessions
        .lock()
        .await
        .insert(session_id.clone(), SessionEntry::new(session));

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            source,
            session: snapshot,
        }),
    ))
}

/// Handler for `GET /api/sessions/:id`.
async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> std::result::Result<Json<SessionSnapshot>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    sessions
        .get_mut(&session_id)
        .map(|entry| Json(entry.touch().snapshot()))
        .ok_or_else(|| ApiError::session_not_found(&session_id))
}

/// Handler for `POST /api/sessions/:id/events`.
///
/// Applies the event and broadcasts what it did.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(event): Json<SessionEvent>,
) -> std::result::Result<Json<EventResponse>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    let session = sessions
        .get_mut(&session_id)
        .ok_or_else(|| ApiError::session_not_found(&session_id))?
        .touch();

    let index_before = session.state().current_challenge_index;
    let outcome = match session.handle(event) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Event rejected");
            state
                .broadcaster
                .send(LessonEvent::error(&session_id, e.to_string()));
            return Err(e.into());
        }
    };

    for lesson_event in
        LessonEvent::from_transition(&session_id, event, outcome, index_before, session)
    {
        state.broadcaster.send(lesson_event);
    }

    info!(
        session_id = %session_id,
        event = %event,
        outcome = ?outcome,
        phase = %session.phase(),
        "Event processed"
    );

    Ok(Json(EventResponse {
        outcome,
        session: session.snapshot(),
    }))
}

/// Handler for `DELETE /api/sessions/:id`.
///
/// Discards the session. Nothing is persisted.
async fn handle_delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    let removed = state.sessions.lock().await.remove(&session_id);
    if removed.is_none() {
        return Err(ApiError::session_not_found(&session_id));
    }
    info!(session_id = %session_id, "Session discarded");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Tests
// ============================================================================
