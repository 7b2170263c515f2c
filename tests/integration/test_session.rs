//! Integration tests for resolving and playing whole lessons.
//!
//! These tests run the library end to end against the fixture lesson banks:
//! configuration, content resolution with fallback, the phase controller and
//! the file progress sink.

use std::path::PathBuf;
use std::sync::Arc;

use genius_lesson::{
    grade, Answer, ChallengeProblem, CompletionRecord, Config, ContentOrigin, JsonlFileSink,
    LessonError, LessonResolution, LessonResolver, LessonSession, MemorySink, Phase,
    ProgressReporter, SessionEvent, Subject, TransitionPolicy,
};

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Loads the fixture config with the lessons directory made absolute.
fn fixture_config() -> Config {
    let mut config =
        Config::load_from_file(&fixture_path().join("genius.json")).expect("Failed to load config");
    config.lessons_dir = fixture_path()
        .join(&config.lessons_dir)
        .to_string_lossy()
        .into_owned();
    config
}

fn unique_temp_file(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("genius_it_{name}_{}", std::process::id()))
        .join("progress.jsonl")
}

/// Builds the answer that solves a challenge.
fn correct_answer(problem: &ChallengeProblem) -> Answer {
    match problem {
        ChallengeProblem::Blocks {
            correct_sequence, ..
        } => Answer::Blocks(correct_sequence.clone()),
        ChallengeProblem::Text { solution, .. } => Answer::Text(solution.clone()),
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_fixture_config_loads() {
    let config = fixture_config();

    assert_eq!(config.subject, Subject::Coding);
    assert_eq!(config.fallback_grade, 5);
    assert_eq!(config.invalid_transitions, TransitionPolicy::Reject);
    assert!(config.lessons_dir.ends_with("lessons"));
}

// ============================================================================
// Content Resolution
// ============================================================================

#[tokio::test]
async fn test_seeded_grade_served_from_primary() {
    let resolver = LessonResolver::from_config(&fixture_config()).expect("resolver");

    let resolution = resolver.resolve(1, None).await;

    assert_eq!(resolution.origin(), Some(ContentOrigin::Primary));
    let lesson = resolution.into_lesson().expect("lesson");
    assert_eq!(lesson.id, "g1-robot-path-1");
    assert_eq!(lesson.total_challenges(), 2);
}

#[tokio::test]
async fn test_broken_bank_falls_back_to_builtin() {
    let resolver = LessonResolver::from_config(&fixture_config()).expect("resolver");

    let resolution = resolver.resolve(2, None).await;

    assert!(matches!(resolution, LessonResolution::FromFallback(_)));
    let lesson = resolution.into_lesson().expect("lesson");
    assert_eq!(lesson.grade, 2);
    assert_eq!(lesson.topic, "Loops - Repeat Actions");
}

#[tokio::test]
async fn test_missing_bank_falls_back_to_builtin() {
    let resolver = LessonResolver::from_config(&fixture_config()).expect("resolver");

    let (origin, lessons) = resolver.list(7).await;

    assert_eq!(origin, Some(ContentOrigin::Fallback));
    assert!(!lessons.is_empty());
    assert!(lessons.iter().all(|lesson| lesson.grade == 7));
}

#[tokio::test]
async fn test_grade_out_of_range_has_no_lesson() {
    let resolver = LessonResolver::from_config(&fixture_config()).expect("resolver");

    let resolution = resolver.resolve(40, None).await;

    assert!(matches!(resolution, LessonResolution::NotFound { grade: 40 }));
    assert!(matches!(
        resolution.into_lesson(),
        Err(LessonError::NoLessonAvailable { .. })
    ));
}

// ============================================================================
// Full Lessons
// ============================================================================

/// Plays the fixture lesson with correct answers and checks the file record.
#[tokio::test]
async fn test_perfect_run_writes_progress_file() {
    let config = fixture_config();
    let resolver = LessonResolver::from_config(&config).expect("resolver");
    let lesson = resolver.resolve(1, None).await.into_lesson().expect("lesson");

    let progress_file = unique_temp_file("perfect");
    let _ = std::fs::remove_file(&progress_file);
    let reporter = ProgressReporter::new(Arc::new(JsonlFileSink::new(&progress_file)));

    let mut session = LessonSession::new(lesson, "kid-42", config.subject)
        .expect("session")
        .with_policy(config.invalid_transitions)
        .with_reporter(reporter);

    session.handle(SessionEvent::Advance).expect("advance");
    session.handle(SessionEvent::Advance).expect("advance");
    assert_eq!(session.phase(), Phase::Practice);

    while session.phase() == Phase::Practice {
        let challenge = session.current_challenge().expect("challenge").clone();
        let success = grade(&challenge.problem, &correct_answer(&challenge.problem));
        assert!(success, "reference answer should pass: {}", challenge.instruction);
        session
            .handle(SessionEvent::ChallengeResult { success })
            .expect("result");
    }

    assert_eq!(session.phase(), Phase::Complete);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.score, 2);
    assert!(snapshot.result.as_ref().is_some_and(|result| result.perfect));

    let pending = session.take_pending_persists();
    assert_eq!(pending.len(), 1, "completion should be dispatched");
    for handle in pending {
        handle.await.expect("persist task");
    }

    let contents = std::fs::read_to_string(&progress_file).expect("progress file");
    let records: Vec<CompletionRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("record"))
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].child_id, "kid-42");
    assert_eq!(records[0].skill_id, "g1-robot-path-1");
    assert_eq!(records[0].subject, Subject::Coding);
    assert_eq!(records[0].score, 2);
    assert_eq!(records[0].total, 2);

    let _ = std::fs::remove_file(&progress_file);
}

/// Skips the rules, fails everything, retries, and checks one record per run.
#[tokio::test]
async fn test_retry_records_each_completion() {
    let resolver = LessonResolver::from_config(&fixture_config()).expect("resolver");
    let lesson = resolver.resolve(1, None).await.into_lesson().expect("lesson");

    let sink = Arc::new(MemorySink::new());
    let mut session = LessonSession::new(lesson, "kid-7", Subject::Coding)
        .expect("session")
        .with_reporter(ProgressReporter::new(sink.clone()));

    session.handle(SessionEvent::Skip).expect("skip");
    assert_eq!(session.phase(), Phase::Demo);
    session.handle(SessionEvent::Advance).expect("advance");

    for _ in 0..2 {
        session
            .handle(SessionEvent::ChallengeResult { success: false })
            .expect("result");
    }
    assert_eq!(session.phase(), Phase::Complete);
    for handle in session.take_pending_persists() {
        handle.await.expect("task");
    }

    session.handle(SessionEvent::Retry).expect("retry");
    assert_eq!(session.phase(), Phase::Rules);
    assert_eq!(session.state().score, 0);

    session.handle(SessionEvent::Skip).expect("skip");
    session.handle(SessionEvent::Advance).expect("advance");
    session
        .handle(SessionEvent::ChallengeResult { success: true })
        .expect("result");
    session
        .handle(SessionEvent::ChallengeResult { success: false })
        .expect("result");
    for handle in session.take_pending_persists() {
        handle.await.expect("task");
    }

    let records = sink.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].score, 0);
    assert_eq!(records[1].score, 1);
    assert!(records.iter().all(|record| record.total == 2));
}

/// The fixture config rejects events with no transition.
#[tokio::test]
async fn test_strict_policy_rejects_out_of_phase_events() {
    let config = fixture_config();
    let resolver = LessonResolver::from_config(&config).expect("resolver");
    let lesson = resolver.resolve(1, None).await.into_lesson().expect("lesson");

    let mut session = LessonSession::new(lesson, "kid-1", config.subject)
        .expect("session")
        .with_policy(config.invalid_transitions);

    let result = session.handle(SessionEvent::ChallengeResult { success: true });

    assert!(matches!(result, Err(LessonError::InvalidTransition { .. })));
    assert_eq!(session.phase(), Phase::Rules);
    assert_eq!(session.state().score, 0);
}

/// Hints reveal in order for a fallback lesson and stop at the last tier.
#[tokio::test]
async fn test_hints_on_builtin_lesson() {
    let resolver = LessonResolver::from_config(&fixture_config()).expect("resolver");
    let lesson = resolver.resolve(0, None).await.into_lesson().expect("lesson");
    let hints = lesson.challenges[0].hints.clone();
    assert!(!hints.is_empty());

    let mut session = LessonSession::new(lesson, "kid-3", Subject::Coding).expect("session");
    session.handle(SessionEvent::Skip).expect("skip");
    session.handle(SessionEvent::Advance).expect("advance");

    for (tier, hint) in hints.iter().enumerate() {
        session.handle(SessionEvent::RequestHint).expect("hint");
        assert_eq!(session.state().hint_tier, tier + 1);
        assert_eq!(session.current_hint(), Some(hint.as_str()));
    }

    session.handle(SessionEvent::RequestHint).expect("hint");
    assert_eq!(session.state().hint_tier, hints.len());
}
