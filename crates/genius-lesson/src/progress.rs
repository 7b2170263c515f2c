//! Progress persistence for completed lessons.
//!
//! When a session reaches the `complete` phase it hands a
//! [`CompletionRecord`] to a [`ProgressReporter`], which writes it through a
//! [`ProgressSink`] on a detached task. The write outcome is only logged; the
//! phase controller never waits for it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ProgressConfig, ProgressSinkKind};
use crate::error::{LessonError, Result};
use crate::lesson::Subject;

// ============================================================================
// CompletionRecord
// ============================================================================

/// The final result of one completed lesson run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// The learner.
    pub child_id: String,
    /// Subject the lesson belongs to.
    pub subject: Subject,
    /// Lesson identifier.
    pub skill_id: String,
    /// Challenges passed.
    pub score: usize,
    /// Challenges in the lesson.
    pub total: usize,
    /// When the lesson was completed.
    pub completed_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        child_id: impl Into<String>,
        subject: Subject,
        skill_id: impl Into<String>,
        score: usize,
        total: usize,
    ) -> Self {
        Self {
            child_id: child_id.into(),
            subject,
            skill_id: skill_id.into(),
            score,
            total,
            completed_at: Utc::now(),
        }
    }

    /// Returns `true` if every challenge was passed.
    #[must_use]
    pub const fn is_perfect(&self) -> bool {
        self.score == self.total
    }
}

// ============================================================================
// ProgressSink
// ============================================================================

/// Write-only destination for completion records.
#[async_trait]
pub trait ProgressSink: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Persists one completion record.
    async fn record_completion(&self, record: &CompletionRecord) -> Result<()>;
}

/// Appends records as JSON lines to a local file.
#[derive(Debug, Clone)]
pub struct JsonlFileSink {
    path: PathBuf,
}

impl JsonlFileSink {
    /// Creates a sink writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file records are appended to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ProgressSink for JsonlFileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn record_completion(&self, record: &CompletionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Upserts records into a PostgREST-style table.
#[derive(Debug, Clone)]
pub struct RestProgressSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RestProgressSink {
    /// Creates a sink posting to `{base_url}/rest/v1/{table}`.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::Http` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        table: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{table}", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// The full URL records are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ProgressSink for RestProgressSink {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn record_completion(&self, record: &CompletionRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates")
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(LessonError::progress_write(
            self.name(),
            format!("{status}: {body}"),
        ))
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CompletionRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record received so far.
    pub async fn records(&self) -> Vec<CompletionRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl ProgressSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn record_completion(&self, record: &CompletionRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

/// Builds the sink selected by configuration, or `None` when persistence is off.
///
/// # Errors
///
/// Returns `LessonError::ConfigValidationError` if the REST sink is selected
/// without a URL or without the API key environment variable set.
pub fn sink_from_config(config: &ProgressConfig) -> Result<Option<Arc<dyn ProgressSink>>> {
    match config.sink {
        ProgressSinkKind::None => Ok(None),
        ProgressSinkKind::File => Ok(Some(Arc::new(JsonlFileSink::new(&config.file)))),
        ProgressSinkKind::Rest => {
            let url = config.rest_url.as_deref().ok_or_else(|| {
                LessonError::config_validation(
                    "progress.restUrl is required for the rest sink",
                    "Set progress.restUrl in genius.json",
                )
            })?;
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                LessonError::config_validation(
                    format!("environment variable {} is not set", config.api_key_env),
                    format!("Export {} with the progress API key", config.api_key_env),
                )
            })?;
            let sink = RestProgressSink::new(
                url,
                &config.table,
                api_key,
                Duration::from_secs(u64::from(config.timeout_seconds)),
            )?;
            Ok(Some(Arc::new(sink)))
        }
    }
}

// ============================================================================
// ProgressReporter
// ============================================================================

/// Dispatches completion records to a sink without blocking the caller.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    /// Creates a reporter for the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    /// Name of the underlying sink.
    #[must_use]
    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Spawns the write on the current tokio runtime.
    ///
    /// Returns the task handle so callers that must not exit early (the CLI,
    /// tests) can wait for it. Returns `None` when no runtime is running; the
    /// record is then logged as not persisted.
    pub fn dispatch(&self, record: CompletionRecord) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                child_id = %record.child_id,
                skill_id = %record.skill_id,
                "No async runtime, completion not persisted"
            );
            return None;
        };

        let sink = Arc::clone(&self.sink);
        debug!(sink = sink.name(), skill_id = %record.skill_id, "Dispatching completion");

        Some(runtime.spawn(async move {
            match sink.record_completion(&record).await {
                Ok(()) => info!(
                    sink = sink.name(),
                    child_id = %record.child_id,
                    skill_id = %record.skill_id,
                    score = record.score,
                    total = record.total,
                    "Progress recorded"
                ),
                Err(e) => warn!(
                    sink = sink.name(),
                    child_id = %record.child_id,
                    skill_id = %record.skill_id,
                    error = %e,
                    "Failed to record progress"
                ),
            }
        }))
    }
}
