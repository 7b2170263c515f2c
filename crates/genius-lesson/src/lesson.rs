//! Lesson content types and lesson bank loading.
//!
//! A [`Lesson`] is immutable for the duration of a session. Lessons are
//! grouped into a [`LessonBank`], a JSON document loaded either from a
//! seeded file or from the bank compiled into this crate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LessonError, Result};

/// Highest supported grade (`0` is kindergarten).
pub const MAX_GRADE: u8 = 12;

/// Maximum allowed lesson bank file size in bytes (1MB).
pub const MAX_BANK_SIZE: u64 = 1024 * 1024;

/// Lesson bank compiled into the crate, used as the static fallback table.
const BUILTIN_BANK: &str = include_str!("../data/builtin_lessons.json");

/// School subject a lesson belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    /// Coding lessons (blocks or typed code).
    #[default]
    Coding,
    /// Math lessons.
    Math,
    /// Spelling lessons.
    Spelling,
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coding => write!(f, "coding"),
            Self::Math => write!(f, "math"),
            Self::Spelling => write!(f, "spelling"),
        }
    }
}

/// Selects which challenge renderer a lesson uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeMode {
    /// Drag-and-drop code blocks.
    Blocks,
    /// Typed code.
    #[serde(alias = "python")]
    Text,
}

impl std::fmt::Display for ChallengeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocks => write!(f, "blocks"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Category of a code block, used for rendering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Something the character does.
    Action,
    /// A repeat block.
    Loop,
    /// An IF block.
    Conditional,
    /// A variable assignment.
    Variable,
    /// Something shown on screen.
    Output,
}

/// A draggable code block offered by a blocks challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Identifier used in the correct sequence.
    pub id: String,
    /// Block category.
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// Label shown on the block.
    pub text: String,
    /// Optional icon shown next to the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// The problem a challenge poses. Opaque to the phase controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeProblem {
    /// Arrange blocks in the right order.
    #[serde(rename_all = "camelCase")]
    Blocks {
        /// Blocks offered to the learner.
        available_blocks: Vec<CodeBlock>,
        /// Block ids in the expected order.
        correct_sequence: Vec<String>,
        /// Output shown when the program runs.
        output: String,
    },
    /// Type a short program.
    #[serde(rename_all = "camelCase")]
    Text {
        /// Code pre-filled in the editor.
        #[serde(default)]
        starter_code: String,
        /// Reference solution.
        solution: String,
        /// Output the solution prints.
        expected_output: String,
    },
}

impl ChallengeProblem {
    /// Returns the renderer this problem needs.
    #[must_use]
    pub const fn mode(&self) -> ChallengeMode {
        match self {
            Self::Blocks { .. } => ChallengeMode::Blocks,
            Self::Text { .. } => ChallengeMode::Text,
        }
    }
}

/// One gradable practice item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// What the learner is asked to do.
    pub instruction: String,
    /// The problem definition.
    pub problem: ChallengeProblem,
    /// Progressively more specific clues, possibly empty.
    #[serde(default)]
    pub hints: Vec<String>,
}

/// A lesson: rule, demo and an ordered list of challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Lesson identifier, also used as the skill identifier.
    pub id: String,
    /// Grade the lesson targets.
    pub grade: u8,
    /// Display label.
    pub topic: String,
    /// Challenge renderer.
    pub mode: ChallengeMode,
    /// Name of the concept being taught.
    pub rule: String,
    /// Explanation of the concept.
    pub rule_explanation: String,
    /// Example shown in the demo phase.
    pub demo_code: String,
    /// Output of the demo example.
    pub demo_output: String,
    /// Ordered practice items; never empty in a valid lesson.
    pub challenges: Vec<Challenge>,
}

impl Lesson {
    /// Checks the structural rules every lesson must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::InvalidLesson` if the id is empty, the grade is
    /// above [`MAX_GRADE`], there are no challenges, or a challenge's problem
    /// does not match the lesson mode.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LessonError::invalid_lesson(
                "<unnamed>",
                "lesson id must not be empty",
            ));
        }
        if self.grade > MAX_GRADE {
            return Err(LessonError::invalid_lesson(
                &self.id,
                format!("grade {} is above {MAX_GRADE}", self.grade),
            ));
        }
        if self.challenges.is_empty() {
            return Err(LessonError::invalid_lesson(
                &self.id,
                "lesson has no challenges",
            ));
        }
        if let Some((index, challenge)) = self
            .challenges
            .iter()
            .enumerate()
            .find(|(_, c)| c.problem.mode() != self.mode)
        {
            return Err(LessonError::invalid_lesson(
                &self.id,
                format!(
                    "challenge {index} is a {} problem in a {} lesson",
                    challenge.problem.mode(),
                    self.mode
                ),
            ));
        }
        Ok(())
    }

    /// Number of challenges in the lesson.
    #[must_use]
    pub fn total_challenges(&self) -> usize {
        self.challenges.len()
    }

    /// Number of hints available for the challenge at `index` (0 if out of range).
    #[must_use]
    pub fn hint_count(&self, index: usize) -> usize {
        self.challenges.get(index).map_or(0, |c| c.hints.len())
    }
}

/// A collection of lessons, typically one file per grade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonBank {
    /// The lessons, in presentation order.
    pub lessons: Vec<Lesson>,
}

impl LessonBank {
    /// Loads a lesson bank from a JSON file.
    ///
    /// Lessons are not validated here; the resolver validates them one by
    /// one so a single bad lesson does not hide the rest of the bank.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::BankNotFound` if the file doesn't exist,
    /// `LessonError::BankTooLarge` if it exceeds [`MAX_BANK_SIZE`], and
    /// `LessonError::BankParseError` if it is not a bank document.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LessonError::bank_not_found(path)
            } else {
                LessonError::Io(e)
            }
        })?;

        let file_size = metadata.len();
        if file_size > MAX_BANK_SIZE {
            return Err(LessonError::bank_too_large(path, file_size / 1024));
        }

        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| LessonError::bank_parse(path, e.to_string()))
    }

    /// Parses and validates a lesson bank from JSON text.
    ///
    /// `origin` is only used in error messages.
    pub fn from_json(content: &str, origin: impl AsRef<Path>) -> Result<Self> {
        let bank: Self = serde_json::from_str(content)
            .map_err(|e| LessonError::bank_parse(origin.as_ref(), e.to_string()))?;
        for lesson in &bank.lessons {
            lesson.validate()?;
        }
        Ok(bank)
    }

    /// Returns the bank compiled into this crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_BANK, "<builtin>")
    }

    /// Returns the lessons for a grade, in bank order.
    #[must_use]
    pub fn for_grade(&self, grade: u8) -> Vec<Lesson> {
        self.lessons
            .iter()
            .filter(|lesson| lesson.grade == grade)
            .cloned()
            .collect()
    }

    /// Number of lessons in the bank.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    /// Returns `true` if the bank holds no lessons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}
