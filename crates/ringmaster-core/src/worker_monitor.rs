//! Per-(worker, task) liveness and degradation monitor (C7).
//!
//! Tracks last-output age, consecutive-duplicate-line repetition, and
//! error-pattern burst rate over a bounded recent-output window, and turns
//! those signals into a recommended recovery action for the executor to
//! act on.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const DEFAULT_WINDOW_SIZE: usize = 200;
const REPETITION_THRESHOLD: usize = 5;
const ERROR_BURST_THRESHOLD: usize = 10;
const ERROR_BURST_WINDOW: usize = 20;
const DEFAULT_LIVENESS_WINDOW_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionKind {
    None,
    LogWarning,
    Interrupt,
    CheckpointRestart,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub action: RecoveryActionKind,
    pub reason: String,
}

impl RecoveryAction {
    fn none() -> Self {
        Self {
            action: RecoveryActionKind::None,
            reason: String::new(),
        }
    }
}

/// Monitors a single running (worker, task) attempt.
pub struct WorkerMonitor {
    liveness_window: Duration,
    recent_lines: VecDeque<String>,
    window_size: usize,
    last_output_at: Instant,
    consecutive_duplicates: usize,
    error_line_count: usize,
    lines_since_last_error_check: usize,
    escalated: bool,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self::with_liveness_window(Duration::from_secs(DEFAULT_LIVENESS_WINDOW_SECS))
    }

    pub fn with_liveness_window(liveness_window: Duration) -> Self {
        Self {
            liveness_window,
            recent_lines: VecDeque::with_capacity(DEFAULT_WINDOW_SIZE),
            window_size: DEFAULT_WINDOW_SIZE,
            last_output_at: Instant::now(),
            consecutive_duplicates: 0,
            error_line_count: 0,
            lines_since_last_error_check: 0,
            escalated: false,
        }
    }

    /// Record one streamed output line, updating liveness and degradation
    /// state.
    pub fn record_output(&mut self, line: &str) {
        self.last_output_at = Instant::now();

        if self.recent_lines.back().map(|s| s.as_str()) == Some(line) && !line.is_empty() {
            self.consecutive_duplicates += 1;
        } else {
            self.consecutive_duplicates = 0;
        }

        if is_error_line(line) {
            self.error_line_count += 1;
        }
        self.lines_since_last_error_check += 1;
        if self.lines_since_last_error_check > ERROR_BURST_WINDOW {
            // slide the burst window: decay the count proportionally
            self.error_line_count = self.error_line_count.saturating_sub(1);
            self.lines_since_last_error_check = ERROR_BURST_WINDOW;
        }

        self.recent_lines.push_back(line.to_string());
        while self.recent_lines.len() > self.window_size {
            self.recent_lines.pop_front();
        }
    }

    fn is_live(&self) -> bool {
        self.last_output_at.elapsed() < self.liveness_window
    }

    /// Recommend a recovery action from current degradation signals. Once
    /// `escalate` has fired, further calls keep returning `escalate` until
    /// [`WorkerMonitor::reset`] is called — escalation is a one-way signal
    /// to the operator.
    pub fn recommend_recovery(&mut self) -> RecoveryAction {
        if self.escalated {
            return RecoveryAction {
                action: RecoveryActionKind::Escalate,
                reason: "previously escalated".into(),
            };
        }

        if !self.is_live() {
            return RecoveryAction {
                action: RecoveryActionKind::Interrupt,
                reason: format!(
                    "no output for {}s (liveness window {}s)",
                    self.last_output_at.elapsed().as_secs(),
                    self.liveness_window.as_secs()
                ),
            };
        }

        if self.error_line_count >= ERROR_BURST_THRESHOLD {
            self.escalated = true;
            return RecoveryAction {
                action: RecoveryActionKind::Escalate,
                reason: format!(
                    "error burst: {} error-pattern lines in last {} lines",
                    self.error_line_count, ERROR_BURST_WINDOW
                ),
            };
        }

        if self.consecutive_duplicates >= REPETITION_THRESHOLD {
            return RecoveryAction {
                action: RecoveryActionKind::CheckpointRestart,
                reason: format!(
                    "{} consecutive duplicate output lines",
                    self.consecutive_duplicates
                ),
            };
        }

        if self.consecutive_duplicates >= REPETITION_THRESHOLD / 2 {
            return RecoveryAction {
                action: RecoveryActionKind::LogWarning,
                reason: format!(
                    "{} consecutive duplicate output lines, approaching repetition threshold",
                    self.consecutive_duplicates
                ),
            };
        }

        RecoveryAction::none()
    }

    pub fn reset(&mut self) {
        self.recent_lines.clear();
        self.last_output_at = Instant::now();
        self.consecutive_duplicates = 0;
        self.error_line_count = 0;
        self.lines_since_last_error_check = 0;
        self.escalated = false;
    }
}

impl Default for WorkerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_error_line(line: &str) -> bool {
    const PATTERNS: &[&str] = &["Traceback", "Error:", "Exception", "panicked at"];
    PATTERNS.iter().any(|p| line.contains(p))
}

// ---------------------------------------------------------------------------
// StuckDetector — loop/timeout/budget-exhaustion detector used alongside the
// monitor (kept from the RLM toolkit; used by the executor's retry logic).
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckDetector {
    pub timeout_secs: u64,
    pub max_repeats: usize,
    recent_outputs: VecDeque<String>,
    #[serde(skip, default = "chrono::Utc::now")]
    last_progress: chrono::DateTime<chrono::Utc>,
    tokens_consumed: usize,
    token_budget: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckReason {
    Timeout,
    OutputLoop,
    BudgetExhausted,
}

impl StuckDetector {
    pub fn new(timeout_secs: u64, token_budget: usize) -> Self {
        Self {
            timeout_secs,
            max_repeats: 3,
            recent_outputs: VecDeque::new(),
            last_progress: chrono::Utc::now(),
            tokens_consumed: 0,
            token_budget,
        }
    }

    pub fn record_output(&mut self, output: &str, tokens: usize) {
        self.tokens_consumed += tokens;
        self.recent_outputs.push_back(output.to_string());
        if self.recent_outputs.len() > self.max_repeats + 1 {
            self.recent_outputs.pop_front();
        }
        if self.recent_outputs.len() < 2
            || self.recent_outputs.back() != self.recent_outputs.get(self.recent_outputs.len() - 2)
        {
            self.last_progress = chrono::Utc::now();
        }
    }

    pub fn check(&self) -> Option<StuckReason> {
        let elapsed = chrono::Utc::now()
            .signed_duration_since(self.last_progress)
            .num_seconds() as u64;
        if elapsed > self.timeout_secs {
            return Some(StuckReason::Timeout);
        }
        if self.recent_outputs.len() >= self.max_repeats {
            let last = &self.recent_outputs[self.recent_outputs.len() - 1];
            let all_same = self
                .recent_outputs
                .iter()
                .rev()
                .take(self.max_repeats)
                .all(|o| o == last);
            if all_same && !last.is_empty() {
                return Some(StuckReason::OutputLoop);
            }
        }
        if self.tokens_consumed >= self.token_budget {
            return Some(StuckReason::BudgetExhausted);
        }
        None
    }

    pub fn reset(&mut self) {
        self.recent_outputs.clear();
        self.last_progress = chrono::Utc::now();
        self.tokens_consumed = 0;
    }

    pub fn tokens_remaining(&self) -> usize {
        self.token_budget.saturating_sub(self.tokens_consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_output_yet_recommends_none() {
        let mut mon = WorkerMonitor::new();
        assert_eq!(mon.recommend_recovery().action, RecoveryActionKind::None);
    }

    #[test]
    fn repeated_lines_trigger_checkpoint_restart() {
        let mut mon = WorkerMonitor::new();
        for _ in 0..6 {
            mon.record_output("stuck in a loop");
        }
        assert_eq!(
            mon.recommend_recovery().action,
            RecoveryActionKind::CheckpointRestart
        );
    }

    #[test]
    fn near_repetition_warns_only() {
        let mut mon = WorkerMonitor::new();
        for _ in 0..3 {
            mon.record_output("almost looping");
        }
        assert_eq!(
            mon.recommend_recovery().action,
            RecoveryActionKind::LogWarning
        );
    }

    #[test]
    fn error_burst_escalates_and_stays_escalated() {
        let mut mon = WorkerMonitor::new();
        for i in 0..12 {
            mon.record_output(&format!("Error: failure #{i}"));
        }
        assert_eq!(mon.recommend_recovery().action, RecoveryActionKind::Escalate);
        mon.record_output("all clear now");
        assert_eq!(mon.recommend_recovery().action, RecoveryActionKind::Escalate);
    }

    #[test]
    fn liveness_timeout_recommends_interrupt() {
        let mut mon = WorkerMonitor::with_liveness_window(Duration::from_millis(1));
        mon.record_output("hello");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mon.recommend_recovery().action, RecoveryActionKind::Interrupt);
    }

    #[test]
    fn reset_clears_degradation_state() {
        let mut mon = WorkerMonitor::new();
        for _ in 0..6 {
            mon.record_output("loop");
        }
        mon.reset();
        assert_eq!(mon.recommend_recovery().action, RecoveryActionKind::None);
    }

    #[test]
    fn stuck_detector_output_loop() {
        let mut det = StuckDetector::new(300, 100000);
        det.record_output("same output", 10);
        det.record_output("same output", 10);
        det.record_output("same output", 10);
        assert_eq!(det.check(), Some(StuckReason::OutputLoop));
    }

    #[test]
    fn stuck_detector_budget_exhausted() {
        let mut det = StuckDetector::new(300, 100);
        det.record_output("big output", 50);
        assert!(det.check().is_none());
        det.record_output("more output", 60);
        assert_eq!(det.check(), Some(StuckReason::BudgetExhausted));
    }
}
