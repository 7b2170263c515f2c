//! Lesson content resolution.
//!
//! Lessons come from a primary [`ContentSource`] (the seeded lesson store)
//! with a static fallback compiled into the crate. The [`LessonResolver`]
//! reports which of the two served the lesson.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{LessonError, Result};
use crate::lesson::{Lesson, LessonBank, MAX_GRADE};

/// Read-only provider of lessons, keyed by grade.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Returns the lessons available for a grade, possibly none.
    async fn fetch_lessons(&self, grade: u8) -> Result<Vec<Lesson>>;
}

// ============================================================================
// DirectorySource
// ============================================================================

/// Reads `grade-<n>.json` lesson banks from a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the bank file for a grade.
    #[must_use]
    pub fn bank_path(&self, grade: u8) -> PathBuf {
        self.root.join(format!("grade-{grade}.json"))
    }
}

#[async_trait]
impl ContentSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch_lessons(&self, grade: u8) -> Result<Vec<Lesson>> {
        let path = self.bank_path(grade);
        match LessonBank::load(&path).await {
            Ok(bank) => {
                if bank.is_empty() {
                    debug!(path = %path.display(), "Lesson bank is empty");
                } else {
                    debug!(path = %path.display(), lessons = bank.len(), "Loaded lesson bank");
                }
                Ok(bank.lessons)
            }
            Err(LessonError::BankNotFound { .. }) => {
                debug!(path = %path.display(), "No lesson bank for grade");
                Ok(Vec::new())
            }
            Err(LessonError::Io(e)) => Err(LessonError::content_source(
                self.name(),
                format!("{}: {e}", path.display()),
            )),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// StaticSource
// ============================================================================

/// The built-in lesson table.
///
/// A grade with no entry is served the lessons of `default_grade`.
#[derive(Debug, Clone)]
pub struct StaticSource {
    bank: LessonBank,
    default_grade: u8,
}

impl StaticSource {
    /// Creates a source over the bank compiled into the crate.
    pub fn builtin(default_grade: u8) -> Result<Self> {
        Ok(Self::new(LessonBank::builtin()?, default_grade))
    }

    /// Creates a source over an arbitrary bank.
    #[must_use]
    pub const fn new(bank: LessonBank, default_grade: u8) -> Self {
        Self {
            bank,
            default_grade,
        }
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_lessons(&self, grade: u8) -> Result<Vec<Lesson>> {
        let lessons = self.bank.for_grade(grade);
        if !lessons.is_empty() {
            return Ok(lessons);
        }
        debug!(
            grade,
            default_grade = self.default_grade,
            "No static lesson for grade, using default grade"
        );
        Ok(self.bank.for_grade(self.default_grade))
    }
}

// ============================================================================
// LessonResolver
// ============================================================================

/// Which source served a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentOrigin {
    /// The seeded lesson store.
    Primary,
    /// The static fallback table.
    Fallback,
}

/// Result of resolving a lesson for a grade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonResolution {
    /// Served by the primary source.
    FromPrimary(Lesson),
    /// Served by the static fallback.
    FromFallback(Lesson),
    /// Neither source had a lesson for the grade.
    NotFound {
        /// The requested grade.
        grade: u8,
    },
}

impl LessonResolution {
    /// Returns the source that served the lesson, if any.
    #[must_use]
    pub const fn origin(&self) -> Option<ContentOrigin> {
        match self {
            Self::FromPrimary(_) => Some(ContentOrigin::Primary),
            Self::FromFallback(_) => Some(ContentOrigin::Fallback),
            Self::NotFound { .. } => None,
        }
    }

    /// Unwraps the lesson, turning `NotFound` into an error.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::NoLessonAvailable` for `NotFound`.
    pub fn into_lesson(self) -> Result<Lesson> {
        match self {
            Self::FromPrimary(lesson) | Self::FromFallback(lesson) => Ok(lesson),
            Self::NotFound { grade } => Err(LessonError::no_lesson(grade)),
        }
    }
}

/// Tries the primary source, then the fallback.
pub struct LessonResolver {
    primary: Arc<dyn ContentSource>,
    fallback: Arc<dyn ContentSource>,
}

impl std::fmt::Debug for LessonResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonResolver")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl LessonResolver {
    /// Creates a resolver from a primary and a fallback source.
    #[must_use]
    pub fn new(primary: Arc<dyn ContentSource>, fallback: Arc<dyn ContentSource>) -> Self {
        Self { primary, fallback }
    }

    /// Builds the standard resolver: a lesson directory backed by the
    /// built-in table.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Arc::new(DirectorySource::new(&config.lessons_dir)),
            Arc::new(StaticSource::builtin(config.fallback_grade)?),
        ))
    }

    /// Lists every valid lesson available for a grade, primary first.
    ///
    /// Falls back to the static table only when the primary has nothing.
    pub async fn list(&self, grade: u8) -> (Option<ContentOrigin>, Vec<Lesson>) {
        let primary = valid_lessons(self.primary.as_ref(), grade).await;
        if !primary.is_empty() {
            return (Some(ContentOrigin::Primary), primary);
        }
        let fallback = valid_lessons(self.fallback.as_ref(), grade).await;
        if fallback.is_empty() {
            (None, fallback)
        } else {
            (Some(ContentOrigin::Fallback), fallback)
        }
    }

    /// Resolves the lesson to play for a grade.
    ///
    /// Picks the lesson with `lesson_id` if given and present, otherwise the
    /// first lesson. Primary failures are logged and treated as empty.
    pub async fn resolve(&self, grade: u8, lesson_id: Option<&str>) -> LessonResolution {
        if grade > MAX_GRADE {
            warn!(grade, "Grade out of range");
            return LessonResolution::NotFound { grade };
        }

        let primary = valid_lessons(self.primary.as_ref(), grade).await;
        if let Some(lesson) = select(primary, lesson_id) {
            info!(grade, lesson_id = %lesson.id, source = self.primary.name(), "Lesson resolved");
            return LessonResolution::FromPrimary(lesson);
        }

        let fallback = valid_lessons(self.fallback.as_ref(), grade).await;
        if let Some(lesson) = select(fallback, lesson_id) {
            info!(grade, lesson_id = %lesson.id, source = self.fallback.name(), "Lesson resolved from fallback");
            return LessonResolution::FromFallback(lesson);
        }

        warn!(grade, "No lesson available");
        LessonResolution::NotFound { grade }
    }
}

async fn valid_lessons(source: &dyn ContentSource, grade: u8) -> Vec<Lesson> {
    let lessons = match source.fetch_lessons(grade).await {
        Ok(lessons) => lessons,
        Err(e) if e.is_content_error() => {
            warn!(source = source.name(), grade, error = %e, "Unusable lesson content");
            return Vec::new();
        }
        Err(e) => {
            error!(source = source.name(), grade, error = %e, "Content source failed");
            return Vec::new();
        }
    };

    lessons
        .into_iter()
        .filter(|lesson| match lesson.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(source = source.name(), error = %e, "Skipping invalid lesson");
                false
            }
        })
        .collect()
}

fn select(lessons: Vec<Lesson>, lesson_id: Option<&str>) -> Option<Lesson> {
    if let Some(id) = lesson_id {
        if let Some(lesson) = lessons.iter().find(|lesson| lesson.id == id) {
            return Some(lesson.clone());
        }
        debug!(lesson_id = id, "Requested lesson not found, using first");
    }
    lessons.into_iter().next()
}
