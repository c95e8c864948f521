//! Outcome similarity index (C11).
//!
//! Every task outcome the executor records (§4.8 step 11) is appended here.
//! `find_similar` answers "what happened last time something like this ran"
//! with a composite score dominated by keyword-set Jaccard similarity, used
//! by the routing layer's capability-matched-worker tie-break (§4.9) and by
//! the executor's reflection text.

use std::collections::BTreeSet;

use tokio::sync::RwLock;

use crate::types::{BeadKind, TaskOutcome, WorkerType};

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSuccessRate {
    pub total: u32,
    pub success: u32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReasoningBankStats {
    pub total_outcomes: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub needs_decision_count: u32,
    pub mean_duration_seconds: f64,
    pub mean_iterations: f64,
}

/// Jaccard similarity of two keyword sets; `1.0` for two empty sets (they
/// trivially agree on "no keywords"), `0.0` if exactly one is empty.
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// `1 − |Δ|/max(1, base)` — closer file counts score higher; never negative.
fn file_count_similarity(a: u32, b: u32) -> f64 {
    let base = a.max(b).max(1) as f64;
    let delta = (a as i64 - b as i64).unsigned_abs() as f64;
    (1.0 - delta / base).max(0.0)
}

/// In-memory outcome index. A durable implementation would back this with
/// the same `TaskOutcome` rows the Store persists; this workspace's Store
/// already owns that table (`OutcomeRepository::list_outcomes`), so the
/// bank here is a read-through cache rebuilt from `record()` calls, not a
/// second source of truth.
pub struct ReasoningBank {
    outcomes: RwLock<Vec<TaskOutcome>>,
}

impl ReasoningBank {
    pub fn new() -> Self {
        Self {
            outcomes: RwLock::new(Vec::new()),
        }
    }

    pub async fn record(&self, outcome: TaskOutcome) {
        self.outcomes.write().await.push(outcome);
    }

    /// Composite score: keyword Jaccard (dominant, weight 0.7), file-count
    /// similarity (weight 0.3 when supplied), bead-type match is a hard
    /// filter. Only outcomes scoring `>= min_similarity` are returned,
    /// ordered highest-first.
    pub async fn find_similar(
        &self,
        keywords: &BTreeSet<String>,
        bead_kind: BeadKind,
        file_count: Option<u32>,
        min_similarity: f64,
    ) -> Vec<(TaskOutcome, f64)> {
        let outcomes = self.outcomes.read().await;
        let mut scored: Vec<(TaskOutcome, f64)> = outcomes
            .iter()
            .filter(|o| o.bead_kind == bead_kind)
            .map(|o| {
                let kw_score = jaccard(keywords, &o.keywords);
                let score = match file_count {
                    Some(fc) => kw_score * 0.7 + file_count_similarity(fc, o.file_count) * 0.3,
                    None => kw_score,
                };
                (o.clone(), score)
            })
            .filter(|(_, score)| *score >= min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// `{model: {total, success, success_rate}}`, restricted to models with
    /// at least `min_samples` recorded outcomes.
    pub async fn get_model_success_rates(
        &self,
        min_samples: u32,
    ) -> std::collections::BTreeMap<String, ModelSuccessRate> {
        let outcomes = self.outcomes.read().await;
        let mut rates: std::collections::BTreeMap<String, ModelSuccessRate> = Default::default();
        for outcome in outcomes.iter() {
            let entry = rates.entry(outcome.model_used.clone()).or_default();
            entry.total += 1;
            if outcome.success {
                entry.success += 1;
            }
        }
        rates.retain(|_, rate| rate.total >= min_samples);
        for rate in rates.values_mut() {
            rate.success_rate = rate.success as f64 / rate.total as f64;
        }
        rates
    }

    /// `{worker_type: success_rate}`, restricted to types with at least
    /// `min_samples` recorded outcomes. Used by the scheduler's
    /// capability-matched tie-break (§4.9: "prefer those with higher
    /// historical success rate from the reasoning bank, fall back to
    /// `tasks_completed DESC`").
    pub async fn get_worker_type_success_rates(
        &self,
        min_samples: u32,
    ) -> std::collections::BTreeMap<WorkerType, f64> {
        let outcomes = self.outcomes.read().await;
        let mut rates: std::collections::BTreeMap<WorkerType, ModelSuccessRate> =
            Default::default();
        for outcome in outcomes.iter() {
            let entry = rates.entry(outcome.worker_type).or_default();
            entry.total += 1;
            if outcome.success {
                entry.success += 1;
            }
        }
        rates
            .into_iter()
            .filter(|(_, rate)| rate.total >= min_samples)
            .map(|(worker_type, rate)| (worker_type, rate.success as f64 / rate.total as f64))
            .collect()
    }

    pub async fn get_stats(&self) -> ReasoningBankStats {
        let outcomes = self.outcomes.read().await;
        let total = outcomes.len() as u32;
        if total == 0 {
            return ReasoningBankStats::default();
        }
        let success_count = outcomes.iter().filter(|o| o.success).count() as u32;
        let needs_decision_count = outcomes
            .iter()
            .filter(|o| matches!(o.outcome, crate::types::Outcome::NeedsDecision))
            .count() as u32;
        let failure_count = total - success_count - needs_decision_count;
        let mean_duration_seconds =
            outcomes.iter().map(|o| o.duration_seconds).sum::<f64>() / total as f64;
        let mean_iterations =
            outcomes.iter().map(|o| o.iterations as f64).sum::<f64>() / total as f64;
        ReasoningBankStats {
            total_outcomes: total,
            success_count,
            failure_count,
            needs_decision_count,
            mean_duration_seconds,
            mean_iterations,
        }
    }
}

impl Default for ReasoningBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts lower-cased CamelCase/snake_case-ish technical keywords from
/// free text, the same token shapes `enrichment`'s stage 3 scores against.
/// Shared here so routing and the reasoning bank agree on what a "keyword"
/// is with the enrichment pipeline.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "and", "for", "with", "this", "that", "from", "into", "when", "then", "than",
    ];
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}
