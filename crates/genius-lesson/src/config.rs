//! Configuration types for the lesson engine.
//!
//! This module provides the configuration structures that select the
//! subject, where lessons come from, how strictly the phase controller
//! treats unexpected events, and where completion records are written.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LessonError, Result};
use crate::lesson::{Subject, MAX_GRADE};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "genius.json";

/// Default directory holding seeded lesson banks.
fn default_lessons_dir() -> String {
    "lessons".to_string()
}

/// Default grade of the static table used when a grade has no entry.
const fn default_fallback_grade() -> u8 {
    5
}

/// Default idle time in seconds before an abandoned session is dropped.
const fn default_session_idle_seconds() -> u64 {
    30 * 60
}

/// Default JSON-lines file for completion records.
fn default_progress_file() -> String {
    ".genius/progress.jsonl".to_string()
}

/// Default environment variable holding the REST API key.
fn default_api_key_env() -> String {
    "GENIUS_PROGRESS_KEY".to_string()
}

/// Default REST table receiving completion records.
fn default_table() -> String {
    "learning_progress".to_string()
}

/// Default REST request timeout in seconds.
const fn default_timeout_seconds() -> u32 {
    10
}

/// Main configuration for the lesson engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Subject recorded in completion records.
    #[serde(default)]
    pub subject: Subject,

    /// Directory with one lesson bank per grade (`grade-<n>.json`).
    #[serde(default = "default_lessons_dir")]
    pub lessons_dir: String,

    /// Static-table grade used when the requested grade has no entry.
    #[serde(default = "default_fallback_grade")]
    pub fallback_grade: u8,

    /// How the controller treats events that match no transition.
    #[serde(default)]
    pub invalid_transitions: TransitionPolicy,

    /// Seconds a served session may sit untouched before it is discarded.
    #[serde(default = "default_session_idle_seconds")]
    pub session_idle_seconds: u64,

    /// Where completion records are written.
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subject: Subject::default(),
            lessons_dir: default_lessons_dir(),
            fallback_grade: default_fallback_grade(),
            invalid_transitions: TransitionPolicy::default(),
            session_idle_seconds: default_session_idle_seconds(),
            progress: ProgressConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `genius.json` in the current directory and falls back to
    /// the default configuration when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            LessonError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `genius.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::ConfigParseError` if the file cannot be read or
    /// holds invalid JSON, and `LessonError::ConfigValidationError` if the
    /// values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(LessonError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LessonError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::ConfigValidationError` on the first failing check.
    pub fn validate(&self) -> Result<()> {
        if self.fallback_grade > MAX_GRADE {
            return Err(LessonError::config_validation(
                format!("fallbackGrade must be between 0 and {MAX_GRADE}"),
                "Set fallbackGrade to a grade that has built-in lessons (0-12) in your genius.json",
            ));
        }

        if self.lessons_dir.trim().is_empty() {
            return Err(LessonError::config_validation(
                "lessonsDir must not be empty",
                "Provide the directory holding grade-<n>.json lesson banks in your genius.json",
            ));
        }

        if self.session_idle_seconds == 0 {
            return Err(LessonError::config_validation(
                "sessionIdleSeconds must be greater than 0",
                "Set sessionIdleSeconds to how long an unused session is kept, e.g. 1800",
            ));
        }

        self.progress.validate()
    }
}

/// How the phase controller treats an event that matches no transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Silently ignore the event (default).
    #[default]
    Ignore,
    /// Reject the event with `LessonError::InvalidTransition`.
    Reject,
}

impl TransitionPolicy {
    /// Parses a string into a `TransitionPolicy`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ignore" => Some(Self::Ignore),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for TransitionPolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid transition policy '{s}': expected one of 'ignore', 'reject'"
            ))
        })
    }
}

impl Serialize for TransitionPolicy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Ignore => "ignore",
            Self::Reject => "reject",
        };
        serializer.serialize_str(s)
    }
}

/// Which progress sink receives completion records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressSinkKind {
    /// Completion records are only logged.
    None,
    /// Append to a JSON-lines file (default).
    #[default]
    File,
    /// Upsert into a REST table.
    Rest,
}

impl ProgressSinkKind {
    /// Parses a string into a `ProgressSinkKind`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "file" => Some(Self::File),
            "rest" => Some(Self::Rest),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ProgressSinkKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid progress sink '{s}': expected one of 'none', 'file', 'rest'"
            ))
        })
    }
}

impl Serialize for ProgressSinkKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::None => "none",
            Self::File => "file",
            Self::Rest => "rest",
        };
        serializer.serialize_str(s)
    }
}

/// Progress persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressConfig {
    /// Which sink receives completion records.
    #[serde(default)]
    pub sink: ProgressSinkKind,

    /// JSON-lines file used by the file sink.
    #[serde(default = "default_progress_file")]
    pub file: String,

    /// Base URL of the REST endpoint (required for the REST sink).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_url: Option<String>,

    /// Name of the environment variable holding the REST API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// REST table receiving the records.
    #[serde(default = "default_table")]
    pub table: String,

    /// REST request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            sink: ProgressSinkKind::default(),
            file: default_progress_file(),
            rest_url: None,
            api_key_env: default_api_key_env(),
            table: default_table(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl ProgressConfig {
    /// Validates the settings required by the selected sink.
    pub fn validate(&self) -> Result<()> {
        match self.sink {
            ProgressSinkKind::None => Ok(()),
            ProgressSinkKind::File => {
                if self.file.trim().is_empty() {
                    return Err(LessonError::config_validation(
                        "progress.file must not be empty",
                        "Provide a file path for completion records or set progress.sink to 'none'",
                    ));
                }
                Ok(())
            }
            ProgressSinkKind::Rest => {
                if self.rest_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(LessonError::config_validation(
                        "progress.restUrl is required when progress.sink is 'rest'",
                        "Set progress.restUrl to the base URL of your REST backend",
                    ));
                }
                if self.table.trim().is_empty() {
                    return Err(LessonError::config_validation(
                        "progress.table must not be empty",
                        "Set progress.table to the table receiving completion records",
                    ));
                }
                if self.timeout_seconds == 0 {
                    return Err(LessonError::config_validation(
                        "progress.timeoutSeconds must be greater than 0",
                        "Set progress.timeoutSeconds to at least 1 second in your genius.json",
                    ));
                }
                Ok(())
            }
        }
    }
}
