//! SchoolGenius lesson engine
//!
//! Drives a learner through the rules, demo, practice and completion phases
//! of a lesson, resolves lesson content with a static fallback, and records
//! the final score once per completion.

pub mod api;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod grading;
pub mod lesson;
pub mod progress;
pub mod session;

pub use api::{
    create_router, AppState, CreateSessionRequest, CreateSessionResponse, ErrorResponse,
    EventResponse, SessionEntry,
};
pub use config::{Config, ProgressConfig, ProgressSinkKind, TransitionPolicy};
pub use content::{
    ContentOrigin, ContentSource, DirectorySource, LessonResolution, LessonResolver, StaticSource,
};
pub use error::{LessonError, Result};
pub use events::{EventBroadcaster, LessonEvent};
pub use grading::{grade, Answer};
pub use lesson::{
    BlockKind, Challenge, ChallengeMode, ChallengeProblem, CodeBlock, Lesson, LessonBank, Subject,
    MAX_BANK_SIZE, MAX_GRADE,
};
pub use progress::{
    sink_from_config, CompletionRecord, JsonlFileSink, MemorySink, ProgressReporter, ProgressSink,
    RestProgressSink,
};
pub use session::{
    EventOutcome, LessonResult, LessonSession, Phase, SessionEvent, SessionSnapshot, SessionState,
};
