//! Answer grading for practice challenges.
//!
//! Grading sits outside the phase controller: a rendering layer grades the
//! learner's answer and feeds the verdict back as a challenge result.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lesson::ChallengeProblem;

static WHITESPACE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());
static NON_ALNUM: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[^a-z0-9]").ok());

/// Solution lines with fewer alphanumeric characters are ignored.
const MIN_KEY_LEN: usize = 3;

/// A learner's answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Block ids in the order the learner arranged them.
    Blocks(Vec<String>),
    /// Code the learner typed.
    Text(String),
}

/// Grades an answer against a challenge problem.
///
/// An answer of the wrong shape for the problem is wrong.
#[must_use]
pub fn grade(problem: &ChallengeProblem, answer: &Answer) -> bool {
    match (problem, answer) {
        (
            ChallengeProblem::Blocks {
                correct_sequence, ..
            },
            Answer::Blocks(sequence),
        ) => sequence == correct_sequence,
        (
            ChallengeProblem::Text {
                solution,
                expected_output,
                ..
            },
            Answer::Text(code),
        ) => grade_text(code, solution, expected_output),
        _ => false,
    }
}

/// Lowercases and collapses runs of whitespace to one space.
fn normalize(text: &str) -> String {
    let Some(re) = WHITESPACE.as_ref() else {
        return text.trim().to_lowercase();
    };
    re.replace_all(text.trim(), " ").to_lowercase()
}

/// Keeps only lowercase alphanumerics.
fn alphanumeric_key(text: &str) -> String {
    let lowered = text.to_lowercase();
    let Some(re) = NON_ALNUM.as_ref() else {
        return lowered;
    };
    re.replace_all(&lowered, "").into_owned()
}

fn grade_text(code: &str, solution: &str, expected_output: &str) -> bool {
    let answer = normalize(code);
    if answer.is_empty() {
        return false;
    }

    let expected = normalize(expected_output);
    if !expected.is_empty() && answer.contains(&expected) {
        return true;
    }

    let answer_key = alphanumeric_key(&answer);
    let mut keys = solution
        .lines()
        .map(alphanumeric_key)
        .filter(|key| key.len() >= MIN_KEY_LEN)
        .peekable();

    keys.peek().is_some() && keys.all(|key| answer_key.contains(&key))
}
