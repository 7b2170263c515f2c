//! Error types for the lesson engine.
//!
//! One error hierarchy covers configuration loading, lesson content,
//! the phase controller and progress persistence. Variants carry a
//! suggestion where the user can act on the failure.

use std::path::PathBuf;

/// A specialized `Result` type for lesson engine operations.
pub type Result<T> = std::result::Result<T, LessonError>;

/// Errors that can occur while resolving, running or recording a lesson.
#[derive(Debug, thiserror::Error)]
pub enum LessonError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your genius.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Lesson Content Errors
    // ========================================================================
    /// Lesson bank file was not found.
    #[error("Lesson bank not found: '{path}'\n\nSuggestion: Check the 'lessonsDir' field in genius.json")]
    BankNotFound {
        /// Path where the bank was expected.
        path: PathBuf,
    },

    /// Lesson bank file exceeds the size limit.
    #[error("Lesson bank exceeds size limit (1024KB): '{path}' is {size_kb}KB\n\nSuggestion: Split the bank into one file per grade")]
    BankTooLarge {
        /// Path to the oversized bank.
        path: PathBuf,
        /// Actual size in kilobytes.
        size_kb: u64,
    },

    /// Lesson bank file is not a valid bank document.
    #[error("Invalid lesson bank '{path}': {message}")]
    BankParseError {
        /// Path to the bank file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// A lesson failed validation.
    #[error("Invalid lesson '{lesson_id}': {message}")]
    InvalidLesson {
        /// Identifier of the offending lesson.
        lesson_id: String,
        /// What is wrong with it.
        message: String,
    },

    /// A content source could not be read.
    #[error("Content source '{source_name}' failed: {message}")]
    ContentSource {
        /// Name of the failing source.
        source_name: String,
        /// Description of the failure.
        message: String,
    },

    /// Neither the primary nor the fallback source yielded a lesson.
    #[error("No lesson available for grade {grade}\n\nSuggestion: Seed lessons for this grade or check the fallback grade in genius.json")]
    NoLessonAvailable {
        /// The requested grade.
        grade: u8,
    },

    // ========================================================================
    // Phase Controller Errors
    // ========================================================================
    /// An event does not match any transition of the current phase.
    #[error("Invalid transition: '{event}' is not accepted in phase '{phase}'")]
    InvalidTransition {
        /// The current phase.
        phase: String,
        /// The rejected event.
        event: String,
    },

    // ========================================================================
    // Progress Persistence Errors
    // ========================================================================
    /// The progress sink failed to record a completion.
    #[error("Failed to record progress via {sink}: {message}")]
    ProgressWrite {
        /// Name of the sink.
        sink: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // General Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LessonError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `BankNotFound` error.
    #[must_use]
    pub fn bank_not_found(path: impl Into<PathBuf>) -> Self {
        Self::BankNotFound { path: path.into() }
    }

    /// Creates a new `BankTooLarge` error.
    #[must_use]
    pub fn bank_too_large(path: impl Into<PathBuf>, size_kb: u64) -> Self {
        Self::BankTooLarge {
            path: path.into(),
            size_kb,
        }
    }

    /// Creates a new `BankParseError`.
    #[must_use]
    pub fn bank_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::BankParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidLesson` error.
    #[must_use]
    pub fn invalid_lesson(lesson_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidLesson {
            lesson_id: lesson_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ContentSource` error.
    #[must_use]
    pub fn content_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContentSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Creates a new `NoLessonAvailable` error.
    #[must_use]
    pub const fn no_lesson(grade: u8) -> Self {
        Self::NoLessonAvailable { grade }
    }

    /// Creates a new `InvalidTransition` error.
    #[must_use]
    pub fn invalid_transition(phase: impl std::fmt::Display, event: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            phase: phase.to_string(),
            event: event.to_string(),
        }
    }

    /// Creates a new `ProgressWrite` error.
    #[must_use]
    pub fn progress_write(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProgressWrite {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is a content problem the caller can
    /// recover from by picking another lesson or grade.
    #[must_use]
    pub const fn is_content_error(&self) -> bool {
        matches!(
            self,
            Self::BankNotFound { .. }
                | Self::BankTooLarge { .. }
                | Self::BankParseError { .. }
                | Self::InvalidLesson { .. }
                | Self::ContentSource { .. }
                | Self::NoLessonAvailable { .. }
        )
    }
}
