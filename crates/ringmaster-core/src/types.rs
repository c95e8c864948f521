//! Shared data model for the Ringmaster orchestration engine.
//!
//! Every entity the Store (`crate::store`) persists and every message the
//! rest of the workspace exchanges is defined here: projects, beads
//! (epics/tasks/subtasks), dependencies, workers, chat history, summaries,
//! the undo log, outcomes, metrics, and assembly logs.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A free-form worker/task capability tag (`"python"`, `"fastapi"`, …).
///
/// Kept as a newtype over a lower-cased string rather than a closed enum:
/// capability names are project-defined, not fixed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

pub type CapabilitySet = BTreeSet<Capability>;

/// `required ⊆ available` — the worker is eligible iff its capability set
/// is a superset of the task's required set.
pub fn capabilities_satisfy(available: &CapabilitySet, required: &CapabilitySet) -> bool {
    required.is_subset(available)
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub tech_stack: Vec<String>,
    pub repo_path: Option<String>,
    pub settings: ProjectSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Branch merges/rebases target. Default `"main"`.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Whether the executor should use per-worker git worktree isolation.
    #[serde(default = "default_true")]
    pub worktrees_enabled: bool,
    /// Free-form extra settings not promoted to a first-class field yet.
    #[serde(default)]
    pub extra: std::collections::BTreeMap<String, serde_json::Value>,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            worktrees_enabled: true,
            extra: Default::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bead
// ---------------------------------------------------------------------------

/// Coarse priority class. `P0` is highest, `P4` lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PLevel {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl PLevel {
    /// Numeric weight used by the combined-priority mix in `priority_graph`;
    /// higher is more urgent.
    pub fn weight(&self) -> f64 {
        match self {
            PLevel::P0 => 1.0,
            PLevel::P1 => 0.8,
            PLevel::P2 => 0.6,
            PLevel::P3 => 0.4,
            PLevel::P4 => 0.2,
        }
    }
}

/// The status-transition state machine of SPEC_FULL.md §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeadStatus {
    Draft,
    Ready,
    Assigned,
    InProgress,
    Blocked,
    NeedsDecomposition,
    Review,
    Done,
    Failed,
}

impl BeadStatus {
    /// Whether `self -> next` is a legal transition per the status machine.
    pub fn can_transition_to(self, next: BeadStatus) -> bool {
        use BeadStatus::*;
        match (self, next) {
            (Draft, Ready) => true,
            (Ready, Assigned) => true,
            (Assigned, InProgress) => true,
            (Assigned, Ready) => true, // assignment reverted
            (InProgress, Review) | (InProgress, Failed) | (InProgress, Blocked) => true,
            (Review, Done) | (Review, Ready) => true,
            (Failed, Ready) => true,
            (Blocked, Ready) => true,
            (_, NeedsDecomposition) => true,
            (NeedsDecomposition, Ready) => true,
            _ => false,
        }
    }
}

/// Discriminates the three bead variants. Stored as an explicit enum field
/// rather than derived from Rust type identity (see DESIGN.md Open
/// Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadKind {
    Epic,
    Task,
    Subtask,
}

/// Variant-specific fields carried by task/subtask beads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFields {
    pub worker_id: Option<Uuid>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub retry_after: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
    /// Non-null for subtasks; the parent task/epic id.
    pub parent_id: Option<String>,

    // Priority-graph scores, recomputed by `priority_graph` (C9).
    #[serde(default)]
    pub pagerank: f64,
    #[serde(default)]
    pub betweenness: f64,
    #[serde(default)]
    pub on_critical_path: bool,
    #[serde(default)]
    pub combined_priority: f64,
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for TaskFields {
    /// Hand-rolled rather than derived so `max_attempts` agrees with the
    /// `#[serde(default = "default_max_attempts")]` used when a task body
    /// omits it: a derived `Default` would silently give every
    /// `..Default::default()` call site `max_attempts: 0`, failing a task
    /// permanently on its first failure.
    fn default() -> Self {
        Self {
            worker_id: None,
            attempts: 0,
            max_attempts: default_max_attempts(),
            retry_after: None,
            last_failure_reason: None,
            blocked_reason: None,
            required_capabilities: Default::default(),
            parent_id: None,
            pagerank: 0.0,
            betweenness: 0.0,
            on_critical_path: false,
            combined_priority: 0.0,
        }
    }
}

/// Variant-specific fields carried by epic beads.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EpicFields {
    pub acceptance_criteria: Vec<String>,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    /// Opaque id, always prefixed `bd-`.
    pub id: String,
    pub kind: BeadKind,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: PLevel,
    pub status: BeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub prompt_path: Option<String>,
    pub output_path: Option<String>,
    pub context_hash: Option<String>,

    /// Populated for `Task`/`Subtask`; `None` for `Epic`.
    #[serde(default)]
    pub task: Option<TaskFields>,
    /// Populated for `Epic`; `None` otherwise.
    #[serde(default)]
    pub epic: Option<EpicFields>,
}

impl Bead {
    pub fn new_id() -> String {
        format!("bd-{}", Uuid::new_v4().simple())
    }

    pub fn is_task_like(&self) -> bool {
        matches!(self.kind, BeadKind::Task | BeadKind::Subtask)
    }

    /// Validates the invariants of SPEC_FULL.md §3.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.kind {
            BeadKind::Subtask => {
                let task = self.task.as_ref().ok_or("subtask missing TaskFields")?;
                if task.parent_id.is_none() {
                    return Err("subtask has null parent".into());
                }
            }
            BeadKind::Task => {
                if self.task.is_none() {
                    return Err("task missing TaskFields".into());
                }
            }
            BeadKind::Epic => {
                if self.epic.is_none() {
                    return Err("epic missing EpicFields".into());
                }
            }
        }
        if self.status == BeadStatus::Assigned {
            let worker_id = self.task.as_ref().and_then(|t| t.worker_id);
            if worker_id.is_none() {
                return Err("ASSIGNED requires worker_id".into());
            }
        }
        if self.status == BeadStatus::InProgress {
            let worker_id = self.task.as_ref().and_then(|t| t.worker_id);
            if worker_id.is_none() || self.started_at.is_none() {
                return Err("IN_PROGRESS requires worker_id and started_at".into());
            }
        }
        if self.status == BeadStatus::Done && self.completed_at.is_none() {
            return Err("DONE requires completed_at".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// Ordered pair: `child` cannot run until `parent` is `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub child_id: String,
    pub parent_id: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    ClaudeCode,
    Aider,
    Codex,
    Goose,
    Generic,
}

impl WorkerType {
    /// Default session timeout in seconds for this worker type (see
    /// SPEC_FULL.md §3 supplemental defaults, grounded on
    /// `original_source/src/ringmaster/worker/executor.py`).
    pub fn default_timeout_seconds(&self) -> u64 {
        match self {
            WorkerType::ClaudeCode | WorkerType::Codex | WorkerType::Goose => 1800,
            WorkerType::Aider => 900,
            WorkerType::Generic => 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchTemplate {
    pub command: String,
    pub args: Vec<String>,
    pub prompt_flag: Option<String>,
    pub working_dir: Option<String>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub worker_type: WorkerType,
    pub status: WorkerStatus,
    pub current_task_id: Option<String>,
    pub launch_template: LaunchTemplate,
    pub capabilities: CapabilitySet,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub mean_completion_seconds: f64,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// `BUSY ⇔ current_task_id ≠ null`.
    pub fn invariant_holds(&self) -> bool {
        (self.status == WorkerStatus::Busy) == self.current_task_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Worker session execution (C8)
// ---------------------------------------------------------------------------

/// Parameters for one worker session invocation, built by the executor from
/// the assigned bead's assembled prompt and the worker's launch template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub working_dir: String,
    pub prompt: String,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub env_vars: std::collections::BTreeMap<String, String>,
    pub completion_signal: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    TimedOut,
    Interrupted,
}

/// Terminal result of a worker session: the variant's raw verdict, classified
/// downstream by `outcome_detector::classify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub output: String,
}

// ---------------------------------------------------------------------------
// Chat / Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Monotonically assigned within a project, used by the summarizer.
    pub id: u64,
    pub project_id: Uuid,
    pub task_id: Option<String>,
    pub role: ChatRole,
    pub content: String,
    pub media_ref: Option<String>,
    pub token_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_id: Option<String>,
    /// Inclusive message-id range this summary covers.
    pub start_message_id: u64,
    pub end_message_id: u64,
    pub text: String,
    pub key_decisions: Vec<String>,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Action (undo log)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Worker,
    Dependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Assign,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub action_type: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub project_id: Option<Uuid>,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub undone: bool,
}

// ---------------------------------------------------------------------------
// Outcomes / metrics / assembly logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
    NeedsDecision,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub project_id: Uuid,
    pub file_count: u32,
    pub keywords: BTreeSet<String>,
    pub bead_kind: BeadKind,
    pub has_dependencies: bool,
    pub model_used: String,
    pub worker_type: WorkerType,
    pub iterations: u32,
    pub duration_seconds: f64,
    pub success: bool,
    pub outcome: Outcome,
    pub confidence: f64,
    pub failure_reason: Option<String>,
    pub reflection: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetric {
    pub task_id: String,
    pub worker_id: Uuid,
    pub iteration: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub outcome: Outcome,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAssemblyLog {
    pub task_id: Option<String>,
    pub project_id: Uuid,
    pub sources_queried: Vec<String>,
    pub source_counts: std::collections::BTreeMap<String, u32>,
    pub tokens_used: u32,
    pub tokens_budget: u32,
    pub compression_steps: Vec<String>,
    pub stages_applied: Vec<String>,
    pub assembly_ms: u64,
    /// Always exactly 16 hex characters.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub worker_id: Uuid,
    /// Strictly increasing per worker; reset only by an explicit clear.
    pub line_number: u64,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Hot-reload subsystem (optional, §4.13)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadRecord {
    pub trigger: String,
    pub files_changed: Vec<String>,
    pub applied: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
