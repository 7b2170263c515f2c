//! Lesson phase controller.
//!
//! A [`LessonSession`] drives one learner through a lesson:
//!
//! - `Rules` -> `Demo` on `advance` or `skip`
//! - `Demo` -> `Practice` on `advance`
//! - `Practice` -> `Practice` on `request_hint`, or on `challenge_result`
//!   while challenges remain
//! - `Practice` -> `Complete` on the last `challenge_result`
//! - `Complete` -> `Rules` on `retry`
//!
//! Entering `Complete` dispatches a [`CompletionRecord`] once. Any other
//! event is handled according to the session's [`TransitionPolicy`].

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::TransitionPolicy;
use crate::error::{LessonError, Result};
use crate::lesson::{Challenge, ChallengeMode, Lesson, Subject};
use crate::progress::{CompletionRecord, ProgressReporter};

/// Title shown when every challenge was passed.
pub const PERFECT_TITLE: &str = "Perfect Score!";
/// Message shown when every challenge was passed.
pub const PERFECT_MESSAGE: &str = "Amazing work! You're a natural!";
/// Title shown otherwise.
pub const COMPLETE_TITLE: &str = "Lesson Complete!";
/// Message shown otherwise.
pub const COMPLETE_MESSAGE: &str = "Great effort! Keep practicing!";

// ============================================================================
// Phase and SessionEvent
// ============================================================================

/// The four lesson phases. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Concept explanation. Initial phase.
    #[default]
    Rules,
    /// Worked example.
    Demo,
    /// Graded challenges.
    Practice,
    /// Celebration screen. Left only by `retry`.
    Complete,
}

impl Phase {
    /// Returns `true` for the terminal phase.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rules => write!(f, "rules"),
            Self::Demo => write!(f, "demo"),
            Self::Practice => write!(f, "practice"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Input events accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The learner proceeds.
    Advance,
    /// The learner skips the rules.
    Skip,
    /// A graded challenge answer.
    ChallengeResult {
        /// Whether the answer was correct.
        success: bool,
    },
    /// The learner asks for the next hint.
    RequestHint,
    /// Start the lesson over.
    Retry,
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Advance => write!(f, "advance"),
            Self::Skip => write!(f, "skip"),
            Self::ChallengeResult { .. } => write!(f, "challenge_result"),
            Self::RequestHint => write!(f, "request_hint"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// What handling an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EventOutcome {
    /// A transition fired. `from` and `to` are equal for self-transitions.
    Applied {
        /// Phase before the event.
        from: Phase,
        /// Phase after the event.
        to: Phase,
    },
    /// A legal event with nothing left to do (hints exhausted).
    Unchanged,
    /// An event with no transition in the current phase, dropped.
    Ignored,
}

impl EventOutcome {
    const fn applied(from: Phase, to: Phase) -> Self {
        Self::Applied { from, to }
    }

    /// Returns `true` if the phase changed.
    #[must_use]
    pub fn changed_phase(&self) -> bool {
        matches!(self, Self::Applied { from, to } if from != to)
    }
}

// ============================================================================
// SessionState
// ============================================================================

/// Mutable progress of one learner through one lesson.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Active phase.
    pub phase: Phase,
    /// Zero-based index of the active challenge.
    pub current_challenge_index: usize,
    /// Challenges passed so far.
    pub score: usize,
    /// Hints revealed for the active challenge.
    pub hint_tier: usize,
    /// Whether the latest hint is on screen.
    pub hint_visible: bool,
}

impl SessionState {
    fn clear_hints(&mut self) {
        self.hint_tier = 0;
        self.hint_visible = false;
    }
}

// ============================================================================
// LessonSession
// ============================================================================

/// One learner's run through one lesson.
#[derive(Debug)]
pub struct LessonSession {
    lesson: Lesson,
    child_id: String,
    subject: Subject,
    policy: TransitionPolicy,
    state: SessionState,
    reporter: Option<ProgressReporter>,
    last_completion: Option<CompletionRecord>,
    pending: Vec<JoinHandle<()>>,
}

impl LessonSession {
    /// Starts a session in the `Rules` phase.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::InvalidLesson` if the lesson fails validation.
    pub fn new(lesson: Lesson, child_id: impl Into<String>, subject: Subject) -> Result<Self> {
        lesson.validate()?;
        Ok(Self {
            lesson,
            child_id: child_id.into(),
            subject,
            policy: TransitionPolicy::default(),
            state: SessionState::default(),
            reporter: None,
            last_completion: None,
            pending: Vec::new(),
        })
    }

    /// Sets how events with no transition are handled.
    #[must_use]
    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets where completion records are sent.
    #[must_use]
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// The lesson being played.
    #[must_use]
    pub const fn lesson(&self) -> &Lesson {
        &self.lesson
    }

    /// The learner.
    #[must_use]
    pub fn child_id(&self) -> &str {
        &self.child_id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Active phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Number of challenges in the lesson.
    #[must_use]
    pub fn total(&self) -> usize {
        self.lesson.total_challenges()
    }

    /// The active challenge. `None` outside `Practice`.
    #[must_use]
    pub fn current_challenge(&self) -> Option<&Challenge> {
        if self.state.phase == Phase::Practice {
            self.lesson.challenges.get(self.state.current_challenge_index)
        } else {
            None
        }
    }

    /// The most recently revealed hint, while visible.
    #[must_use]
    pub fn current_hint(&self) -> Option<&str> {
        if !self.state.hint_visible || self.state.hint_tier == 0 {
            return None;
        }
        self.current_challenge()
            .and_then(|c| c.hints.get(self.state.hint_tier - 1))
            .map(String::as_str)
    }

    /// The record produced by the latest completion, if any.
    #[must_use]
    pub const fn last_completion(&self) -> Option<&CompletionRecord> {
        self.last_completion.as_ref()
    }

    /// Takes the handles of completion writes that had not finished when
    /// the last one was dispatched.
    ///
    /// Transition logic never waits on them; callers about to exit can.
    pub fn take_pending_persists(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.pending)
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::InvalidTransition` for an event with no
    /// transition in the current phase, only under [`TransitionPolicy::Reject`].
    pub fn handle(&mut self, event: SessionEvent) -> Result<EventOutcome> {
        let from = self.state.phase;
        let outcome = match (from, event) {
            (Phase::Rules, SessionEvent::Advance | SessionEvent::Skip) => {
                self.state.phase = Phase::Demo;
                EventOutcome::applied(from, Phase::Demo)
            }
            (Phase::Demo, SessionEvent::Advance) => {
                self.state.phase = Phase::Practice;
                self.state.current_challenge_index = 0;
                self.state.clear_hints();
                EventOutcome::applied(from, Phase::Practice)
            }
            (Phase::Practice, SessionEvent::ChallengeResult { success }) => {
                self.score_challenge(success)
            }
            (Phase::Practice, SessionEvent::RequestHint) => self.reveal_hint(),
            (Phase::Complete, SessionEvent::Retry) => {
                self.state = SessionState::default();
                EventOutcome::applied(from, Phase::Rules)
            }
            _ => return self.unmatched(event),
        };

        debug!(
            lesson_id = %self.lesson.id,
            event = %event,
            phase = %self.state.phase,
            index = self.state.current_challenge_index,
            score = self.state.score,
            hint_tier = self.state.hint_tier,
            "Event handled"
        );
        Ok(outcome)
    }

    fn score_challenge(&mut self, success: bool) -> EventOutcome {
        if success {
            self.state.score += 1;
        }
        self.state.clear_hints();

        if self.state.current_challenge_index + 1 < self.total() {
            self.state.current_challenge_index += 1;
            return EventOutcome::applied(Phase::Practice, Phase::Practice);
        }

        self.state.phase = Phase::Complete;
        self.complete();
        EventOutcome::applied(Phase::Practice, Phase::Complete)
    }

    fn reveal_hint(&mut self) -> EventOutcome {
        let available = self.lesson.hint_count(self.state.current_challenge_index);
        if self.state.hint_tier >= available {
            return EventOutcome::Unchanged;
        }
        self.state.hint_tier += 1;
        self.state.hint_visible = true;
        EventOutcome::applied(Phase::Practice, Phase::Practice)
    }

    fn complete(&mut self) {
        let record = CompletionRecord::new(
            self.child_id.clone(),
            self.subject,
            self.lesson.id.clone(),
            self.state.score,
            self.total(),
        );
        info!(
            child_id = %record.child_id,
            lesson_id = %record.skill_id,
            score = record.score,
            total = record.total,
            "Lesson complete"
        );

        match &self.reporter {
            Some(reporter) => {
                self.pending.retain(|handle| !handle.is_finished());
                self.pending.extend(reporter.dispatch(record.clone()));
            }
            None => debug!("No progress sink configured, completion not recorded"),
        }
        self.last_completion = Some(record);
    }

    fn unmatched(&self, event: SessionEvent) -> Result<EventOutcome> {
        match self.policy {
            TransitionPolicy::Ignore => {
                debug!(phase = %self.state.phase, event = %event, "Ignoring event");
                Ok(EventOutcome::Ignored)
            }
            TransitionPolicy::Reject => Err(LessonError::invalid_transition(self.state.phase, event)),
        }
    }

    /// Read-only view of the session for a rendering layer.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let phase = self.state.phase;
        let lesson = &self.lesson;

        let (rule, rule_explanation) = if phase == Phase::Rules {
            (Some(lesson.rule.clone()), Some(lesson.rule_explanation.clone()))
        } else {
            (None, None)
        };
        let (demo_code, demo_output) = if phase == Phase::Demo {
            (Some(lesson.demo_code.clone()), Some(lesson.demo_output.clone()))
        } else {
            (None, None)
        };
        let result = (phase == Phase::Complete).then(|| {
            LessonResult::new(self.state.score == self.total())
        });

        SessionSnapshot {
            lesson_id: lesson.id.clone(),
            topic: lesson.topic.clone(),
            mode: lesson.mode,
            phase,
            current_challenge_index: self.state.current_challenge_index,
            score: self.state.score,
            total: self.total(),
            hint_tier: self.state.hint_tier,
            hint_visible: self.state.hint_visible,
            rule,
            rule_explanation,
            demo_code,
            demo_output,
            challenge: self.current_challenge().cloned(),
            hint: self.current_hint().map(str::to_string),
            result,
        }
    }
}

// ============================================================================
// SessionSnapshot
// ============================================================================

/// Celebration shown on the completion screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonResult {
    /// Whether every challenge was passed.
    pub perfect: bool,
    /// Headline.
    pub title: String,
    /// Encouragement line.
    pub message: String,
}

impl LessonResult {
    fn new(perfect: bool) -> Self {
        let (title, message) = if perfect {
            (PERFECT_TITLE, PERFECT_MESSAGE)
        } else {
            (COMPLETE_TITLE, COMPLETE_MESSAGE)
        };
        Self {
            perfect,
            title: title.to_string(),
            message: message.to_string(),
        }
    }
}

/// Observable outputs of a session after an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Lesson identifier.
    pub lesson_id: String,
    /// Lesson display label.
    pub topic: String,
    /// Challenge renderer.
    pub mode: ChallengeMode,
    /// Active phase.
    pub phase: Phase,
    /// Zero-based index of the active challenge.
    pub current_challenge_index: usize,
    /// Challenges passed so far.
    pub score: usize,
    /// Challenges in the lesson.
    pub total: usize,
    /// Hints revealed for the active challenge.
    pub hint_tier: usize,
    /// Whether the latest hint is on screen.
    pub hint_visible: bool,
    /// Concept name, in `Rules`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Concept explanation, in `Rules`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_explanation: Option<String>,
    /// Example code, in `Demo`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_code: Option<String>,
    /// Example output, in `Demo`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_output: Option<String>,
    /// Active challenge, in `Practice`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    /// Latest revealed hint, while visible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Celebration, in `Complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<LessonResult>,
}

// ============================================================================
// Tests
// ============================================================================
