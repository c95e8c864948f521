//! Classifies worker termination from output + exit code (C6).

use crate::types::Outcome;

/// The literal completion token workers emit on success.
pub const COMPLETION_SIGNAL: &str = "<promise>COMPLETE</promise>";

/// Phrases that mark a request for human clarification. First match wins;
/// the remainder of the line (or the whole line if no separator is found)
/// becomes the captured question.
const DECISION_MARKERS: &[&str] = &[
    "I need clarification on",
    "I need a decision on",
    "need human input",
    "requesting clarification",
];

/// Recognized failure patterns, checked over the last `FAILURE_WINDOW_LINES`
/// lines of output.
const FAILURE_PATTERNS: &[&str] = &["Traceback", "Error:", "Aborting"];

const FAILURE_WINDOW_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeResult {
    pub outcome: Outcome,
    pub confidence: f64,
    pub reason: String,
    pub decision_question: Option<String>,
}

impl OutcomeResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_failure()
    }
}

/// Classify the concatenated stdout+stderr of a worker session together
/// with its exit code, per the signal priority of SPEC_FULL.md §4.6.
pub fn classify(output: &str, exit_code: Option<i32>) -> OutcomeResult {
    // 1. Exact promise token.
    if output.contains(COMPLETION_SIGNAL) {
        return OutcomeResult {
            outcome: Outcome::Success,
            confidence: 1.0,
            reason: "completion signal present".into(),
            decision_question: None,
        };
    }

    // 2. Decision-request markers.
    if let Some(question) = find_decision_question(output) {
        return OutcomeResult {
            outcome: Outcome::NeedsDecision,
            confidence: 0.9,
            reason: "decision marker present".into(),
            decision_question: Some(question),
        };
    }

    let tail: Vec<&str> = output.lines().rev().take(FAILURE_WINDOW_LINES).collect();
    let has_failure_pattern = tail
        .iter()
        .any(|line| FAILURE_PATTERNS.iter().any(|p| line.contains(p)));

    // 3. Exit code 0, no failure pattern in the tail.
    if exit_code == Some(0) && !has_failure_pattern {
        return OutcomeResult {
            outcome: Outcome::Success,
            confidence: 0.7,
            reason: "clean exit, no completion signal".into(),
            decision_question: None,
        };
    }

    // 4. Non-zero exit or recognized failure pattern.
    if exit_code.map(|c| c != 0).unwrap_or(false) || has_failure_pattern {
        return OutcomeResult {
            outcome: Outcome::Failure,
            confidence: 0.8,
            reason: if has_failure_pattern {
                "failure pattern detected".into()
            } else {
                "non-zero exit code".into()
            },
            decision_question: None,
        };
    }

    // 5. Fallback.
    OutcomeResult {
        outcome: Outcome::Failure,
        confidence: 0.3,
        reason: "no completion signal".into(),
        decision_question: None,
    }
}

fn find_decision_question(output: &str) -> Option<String> {
    for line in output.lines() {
        for marker in DECISION_MARKERS {
            if let Some(pos) = line.find(marker) {
                let question = line[pos..].trim();
                return Some(question.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promise_token_is_success_with_full_confidence() {
        let result = classify("doing work\n<promise>COMPLETE</promise>\n", Some(0));
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn decision_marker_captures_question() {
        let result = classify(
            "some output\nI need clarification on which database to use\n",
            Some(0),
        );
        assert_eq!(result.outcome, Outcome::NeedsDecision);
        assert!(result.decision_question.unwrap().contains("database"));
    }

    #[test]
    fn clean_exit_without_signal_is_moderate_confidence_success() {
        let result = classify("did some stuff, looks fine", Some(0));
        assert_eq!(result.outcome, Outcome::Success);
        assert!((result.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn traceback_is_failure_even_with_zero_exit() {
        let result = classify("Traceback (most recent call last):\n...", Some(0));
        assert_eq!(result.outcome, Outcome::Failure);
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let result = classify("nothing obviously wrong", Some(1));
        assert_eq!(result.outcome, Outcome::Failure);
    }

    #[test]
    fn no_signal_no_exit_code_is_low_confidence_failure() {
        let result = classify("still thinking...", None);
        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.confidence < 0.5);
        assert_eq!(result.reason, "no completion signal");
    }
}
