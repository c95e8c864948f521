//! Queue / routing, non-graph half (C9): capability-matched worker
//! selection and deterministic model-tier routing. The graph half (PageRank,
//! betweenness, critical path, combined priority) lives in `priority_graph`.

use crate::types::{Bead, BeadKind, Worker};

// ---------------------------------------------------------------------------
// Capability-matched worker selection
// ---------------------------------------------------------------------------

/// Among `eligible` (already capability-filtered, IDLE) workers, prefer the
/// one with the highest historical success rate for the bead's keywords;
/// fall back to `tasks_completed DESC` when no success-rate data applies to
/// every candidate equally (or the reasoning bank has nothing on any of
/// them).
pub fn prefer_worker<'a>(
    eligible: &'a [Worker],
    success_rates: &std::collections::BTreeMap<uuid::Uuid, f64>,
) -> Option<&'a Worker> {
    eligible.iter().max_by(|a, b| {
        let rate_a = success_rates.get(&a.id).copied();
        let rate_b = success_rates.get(&b.id).copied();
        match (rate_a, rate_b) {
            (Some(ra), Some(rb)) => ra
                .partial_cmp(&rb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.tasks_completed.cmp(&b.tasks_completed)),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => a.tasks_completed.cmp(&b.tasks_completed),
        }
    })
}

// ---------------------------------------------------------------------------
// Model routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ModelTier {
    Fast,
    Balanced,
    Powerful,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingDecision {
    pub complexity: Complexity,
    pub tier: ModelTier,
    pub reasoning: String,
    /// Candidate model names, worker-type-specific entries (if any) moved
    /// to the front.
    pub suggested_models: Vec<String>,
}

const SIMPLE_KEYWORDS: &[&str] = &[
    "typo", "rename", "comment", "format", "lint", "doc", "readme", "bump",
];
const COMPLEX_KEYWORDS: &[&str] = &[
    "architecture", "migrate", "refactor", "distributed", "concurrency", "security", "race",
    "deadlock", "performance", "scalability",
];

/// Per-tier model name pools, generic by design — a worker-type-specific
/// name gets re-ordered to the front by `request_model_for_worker_type`
/// rather than replacing this table.
fn default_models(tier: ModelTier) -> Vec<String> {
    match tier {
        ModelTier::Fast => vec!["fast-model".into(), "balanced-model".into()],
        ModelTier::Balanced => vec!["balanced-model".into(), "powerful-model".into()],
        ModelTier::Powerful => vec!["powerful-model".into(), "balanced-model".into()],
    }
}

/// Deterministic complexity scoring from heuristic signals (SPEC_FULL.md
/// §4.9): file count, dependency count, description length, keyword
/// matches, bead kind, and critical-path membership.
pub fn score_complexity(
    bead: &Bead,
    file_count: u32,
    dependency_count: u32,
) -> (Complexity, String) {
    let mut score: i32 = 0;
    let mut reasons = Vec::new();

    if file_count > 10 {
        score += 2;
        reasons.push(format!("touches {file_count} files"));
    } else if file_count > 3 {
        score += 1;
    }

    if dependency_count > 3 {
        score += 2;
        reasons.push(format!("{dependency_count} dependencies"));
    } else if dependency_count > 0 {
        score += 1;
    }

    let desc_len = bead.description.len();
    if desc_len > 2000 {
        score += 2;
        reasons.push("long description".into());
    } else if desc_len > 500 {
        score += 1;
    }

    let text = format!("{} {}", bead.title, bead.description).to_lowercase();
    let simple_hits = SIMPLE_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
    let complex_hits = COMPLEX_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
    score -= simple_hits as i32;
    if complex_hits > 0 {
        score += complex_hits as i32 * 2;
        reasons.push(format!("{complex_hits} complexity keyword(s)"));
    }

    if bead.kind == BeadKind::Epic {
        score += 2;
        reasons.push("epic-level bead".into());
    }
    if bead.kind == BeadKind::Subtask {
        score -= 1;
    }
    if let Some(task) = &bead.task {
        if task.on_critical_path {
            score += 1;
            reasons.push("on critical path".into());
        }
    }

    let complexity = match score {
        s if s <= 1 => Complexity::Simple,
        s if s <= 4 => Complexity::Moderate,
        _ => Complexity::Complex,
    };
    let reasoning = if reasons.is_empty() {
        "no notable complexity signals".to_string()
    } else {
        reasons.join("; ")
    };
    (complexity, reasoning)
}

fn tier_for(complexity: Complexity) -> ModelTier {
    match complexity {
        Complexity::Simple => ModelTier::Fast,
        Complexity::Moderate => ModelTier::Balanced,
        Complexity::Complex => ModelTier::Powerful,
    }
}

/// Full routing decision for one bead.
pub fn route(bead: &Bead, file_count: u32, dependency_count: u32) -> RoutingDecision {
    let (complexity, reasoning) = score_complexity(bead, file_count, dependency_count);
    let tier = tier_for(complexity);
    RoutingDecision {
        complexity,
        tier,
        reasoning,
        suggested_models: default_models(tier),
    }
}

/// Re-orders `decision.suggested_models` so a worker-type-specific model
/// name (when the caller has one) comes first.
pub fn request_model_for_worker_type(decision: &mut RoutingDecision, preferred: Option<&str>) {
    if let Some(preferred) = preferred {
        decision.suggested_models.retain(|m| m != preferred);
        decision.suggested_models.insert(0, preferred.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeadStatus, PLevel, TaskFields};
    use chrono::Utc;
    use uuid::Uuid;

    fn bead(title: &str, description: &str) -> Bead {
        Bead {
            id: Bead::new_id(),
            kind: BeadKind::Task,
            project_id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.to_string(),
            priority: PLevel::P2,
            status: BeadStatus::Ready,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            prompt_path: None,
            output_path: None,
            context_hash: None,
            task: Some(TaskFields::default()),
            epic: None,
        }
    }

    #[test]
    fn simple_typo_fix_routes_fast() {
        let b = bead("Fix typo in README", "rename variable, fix comment");
        let decision = route(&b, 1, 0);
        assert_eq!(decision.complexity, Complexity::Simple);
        assert_eq!(decision.tier, ModelTier::Fast);
    }

    #[test]
    fn architecture_refactor_routes_powerful() {
        let b = bead(
            "Refactor distributed scheduler architecture",
            "Migrate the concurrency model to avoid deadlock under high load",
        );
        let decision = route(&b, 15, 5);
        assert_eq!(decision.complexity, Complexity::Complex);
        assert_eq!(decision.tier, ModelTier::Powerful);
    }

    #[test]
    fn worker_type_model_moves_to_front() {
        let b = bead("Implement feature", "");
        let mut decision = route(&b, 1, 0);
        request_model_for_worker_type(&mut decision, Some("claude-opus"));
        assert_eq!(decision.suggested_models[0], "claude-opus");
    }
}
