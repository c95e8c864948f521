//! Context-enrichment pipeline (C5): assembles a token-budgeted prompt for
//! a worker out of nine ordered stages.
//!
//! Generalizes the teacher's progressive-disclosure context graph and
//! relevance scoring (`context_engine`/`context_steering`) into a fixed,
//! task-driven pipeline rather than a general-purpose queryable graph.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::rlm;
use crate::types::{Bead, ChatMessage, ContextAssemblyLog, Project, Summary};

const DEFAULT_MAX_CONTEXT_TOKENS: usize = 100_000;
const DEFAULT_MAX_FILES: usize = 10;
const DEFAULT_MAX_FILE_LINES: usize = 500;

const SKIPPED_DIRS: &[&str] = &[
    ".git", "__pycache__", "node_modules", ".venv", "target", "dist", "build", ".next", "coverage",
];

const SOURCE_SUFFIXES: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "rb", "c", "cpp", "h", "hpp",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "have", "has",
];

const DEBUG_KEYWORDS: &[&str] = &[
    "fix", "debug", "investigate", "error", "bug", "crash", "fail", "broken", "exception",
    "performance",
];

const API_KEYWORDS: &[&str] = &["api", "endpoint", "rest", "graphql", "route", "openapi"];
const ARCHITECTURE_KEYWORDS: &[&str] = &["architecture", "design", "adr", "system", "component"];

const DEPLOYMENT_STRONG_KEYWORDS: &[&str] = &["deploy", "kubernetes", "k8s", "helm", "docker", "ci/cd", "pipeline"];
const DEPLOYMENT_MEDIUM_KEYWORDS: &[&str] = &["infra", "container", "release", "environment"];

const SECRET_KEY_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "api_key",
    "apikey",
    "access_key",
    "private_key",
    "token",
    "credential",
    "auth",
    "bearer",
    "jwt",
    "connection_string",
    "database_url",
];

#[derive(Debug, Clone)]
pub struct StageResult {
    pub content: String,
    pub tokens_estimate: usize,
    pub sources: Vec<String>,
}

impl StageResult {
    fn new(content: impl Into<String>, sources: Vec<String>) -> Self {
        let content = content.into();
        let tokens_estimate = estimate_tokens(&content);
        Self {
            content,
            tokens_estimate,
            sources,
        }
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyMetrics {
    pub estimated_tokens: usize,
    pub stages_applied: Vec<String>,
    pub compression_applied: bool,
    pub assembly_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    pub context_hash: String,
    pub metrics: AssemblyMetrics,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_file_lines")]
    pub max_file_lines: usize,
    #[serde(default = "default_log_assembly")]
    pub log_assembly: bool,
}

fn default_max_context_tokens() -> usize {
    DEFAULT_MAX_CONTEXT_TOKENS
}
fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}
fn default_max_file_lines() -> usize {
    DEFAULT_MAX_FILE_LINES
}
fn default_log_assembly() -> bool {
    true
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            max_files: DEFAULT_MAX_FILES,
            max_file_lines: DEFAULT_MAX_FILE_LINES,
            log_assembly: true,
        }
    }
}

/// Everything the pipeline can optionally draw from besides the task and
/// project themselves. All fields are pre-fetched by the caller (the
/// executor, which owns the Store handle) so this module stays free of any
/// async/IO dependency on the Store trait.
#[derive(Default)]
pub struct EnrichmentInputs {
    pub chat_messages: Vec<ChatMessage>,
    pub existing_summaries: Vec<Summary>,
    pub completed_tasks: Vec<Bead>,
    pub task_scoped_logs: Vec<String>,
    pub project_error_logs_24h: Vec<String>,
    pub gh_ci_status: Option<String>,
}

pub fn assemble_prompt(
    project: &Project,
    task: &Bead,
    attempt_count: u32,
    inputs: &EnrichmentInputs,
    config: &EnrichmentConfig,
) -> (AssembledPrompt, Vec<(String, StageResult)>) {
    let start = std::time::Instant::now();
    let mut budget = config.max_context_tokens;
    let mut applied = Vec::new();
    let mut sections: Vec<(String, StageResult)> = Vec::new();

    macro_rules! apply_stage {
        ($name:expr, $result:expr) => {
            if let Some(result) = $result {
                if result.tokens_estimate <= budget || budget == 0 {
                    budget = budget.saturating_sub(result.tokens_estimate.min(budget));
                    applied.push($name.to_string());
                    sections.push(($name.to_string(), result));
                }
            }
        };
    }

    apply_stage!("task_context", stage_task_context(task, attempt_count));
    apply_stage!("project_context", stage_project_context(project));
    apply_stage!(
        "code_context",
        stage_code_context(project, task, config.max_files, config.max_file_lines, budget)
    );
    apply_stage!("documentation_context", stage_documentation_context(project, task));
    apply_stage!("deployment_context", stage_deployment_context(project, task));
    apply_stage!("history_context", stage_history_context(inputs));
    apply_stage!("logs_context", stage_logs_context(task, inputs));
    apply_stage!("research_context", stage_research_context(task, &inputs.completed_tasks));
    apply_stage!("refinement_context", stage_refinement_context());

    let system_prompt = sections
        .iter()
        .filter(|(name, _)| name != "task_context")
        .map(|(_, r)| r.content.clone())
        .collect::<Vec<_>>()
        .join("\n\n");
    let user_prompt = sections
        .iter()
        .find(|(name, _)| name == "task_context")
        .map(|(_, r)| r.content.clone())
        .unwrap_or_default();

    let context_hash = hash_context(&system_prompt, &user_prompt);
    let estimated_tokens = estimate_tokens(&system_prompt) + estimate_tokens(&user_prompt);
    let compression_applied = estimated_tokens > config.max_context_tokens;

    let prompt = AssembledPrompt {
        system_prompt,
        user_prompt,
        context_hash,
        metrics: AssemblyMetrics {
            estimated_tokens,
            stages_applied: applied,
            compression_applied,
            assembly_ms: start.elapsed().as_millis() as u64,
        },
    };
    (prompt, sections)
}

pub fn build_assembly_log(
    project_id: uuid::Uuid,
    task: &Bead,
    prompt: &AssembledPrompt,
    sections: &[(String, StageResult)],
    tokens_budget: u32,
) -> ContextAssemblyLog {
    let mut source_counts = std::collections::BTreeMap::new();
    let mut sources_queried = Vec::new();
    for (stage, result) in sections {
        source_counts.insert(stage.clone(), result.sources.len() as u32);
        sources_queried.extend(result.sources.clone());
    }
    let compression_steps = if prompt.metrics.compression_applied {
        vec!["greedy-pack-by-relevance".to_string()]
    } else {
        Vec::new()
    };

    ContextAssemblyLog {
        task_id: Some(task.id.clone()),
        project_id,
        sources_queried,
        source_counts,
        tokens_used: prompt.metrics.estimated_tokens as u32,
        tokens_budget,
        compression_steps,
        stages_applied: prompt.metrics.stages_applied.clone(),
        assembly_ms: prompt.metrics.assembly_ms,
        content_hash: prompt.context_hash.clone(),
        created_at: chrono::Utc::now(),
    }
}

fn hash_context(system_prompt: &str, user_prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system_prompt.as_bytes());
    hasher.update(b"\n---\n");
    hasher.update(user_prompt.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Stage 1: task_context
// ---------------------------------------------------------------------------

fn stage_task_context(task: &Bead, attempt_count: u32) -> Option<StageResult> {
    let content = format!(
        "# Task\n\nID: {}\nTitle: {}\nState: {:?}\nPriority: {:?}\nAttempt: {}\n\n{}",
        task.id, task.title, task.status, task.priority, attempt_count, task.description
    );
    Some(StageResult::new(content, vec![task.id.clone()]))
}

// ---------------------------------------------------------------------------
// Stage 2: project_context
// ---------------------------------------------------------------------------

fn stage_project_context(project: &Project) -> Option<StageResult> {
    let content = format!(
        "## Project\n\nName: {}\nDescription: {}\nTech stack: {}\nRepo path: {}",
        project.name,
        project.description,
        project.tech_stack.join(", "),
        project.repo_path.as_deref().unwrap_or("n/a")
    );
    Some(StageResult::new(content, vec![project.id.to_string()]))
}

// ---------------------------------------------------------------------------
// Stage 3: code_context
// ---------------------------------------------------------------------------

struct ScoredFile {
    path: PathBuf,
    relevance: f64,
    reason: &'static str,
}

fn task_keywords(task: &Bead) -> Vec<String> {
    let text = format!("{} {}", task.title, task.description);
    let camel_re = Regex::new(r"\b[a-z]+[A-Z][A-Za-z]*\b").unwrap();
    let snake_re = Regex::new(r"\b[a-z]+_[a-z_]+\b").unwrap();

    let mut keywords = HashSet::new();
    for m in camel_re.find_iter(&text) {
        if m.as_str().len() > 2 {
            keywords.insert(m.as_str().to_lowercase());
        }
    }
    for m in snake_re.find_iter(&text) {
        keywords.insert(m.as_str().to_string());
    }
    keywords.retain(|k| !STOP_WORDS.contains(&k.as_str()));
    keywords.into_iter().collect()
}

fn explicit_mentions(task: &Bead, repo_root: &Path) -> Vec<PathBuf> {
    let text = format!("{} {}", task.title, task.description);
    let path_re = Regex::new(r"[\w./-]+\.\w+").unwrap();
    path_re
        .find_iter(&text)
        .filter_map(|m| {
            let candidate = repo_root.join(m.as_str());
            candidate.exists().then_some(candidate)
        })
        .collect()
}

fn stage_code_context(
    project: &Project,
    task: &Bead,
    max_files: usize,
    max_file_lines: usize,
    token_budget: usize,
) -> Option<StageResult> {
    let repo_root = PathBuf::from(project.repo_path.as_ref()?);
    if !repo_root.exists() {
        return None;
    }

    let keywords = task_keywords(task);
    let explicit = explicit_mentions(task, &repo_root);
    let explicit_set: HashSet<PathBuf> = explicit.iter().cloned().collect();

    let mut scored: Vec<ScoredFile> = Vec::new();
    for entry in WalkDir::new(&repo_root)
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|n| !SKIPPED_DIRS.contains(&n))
                .unwrap_or(true)
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SOURCE_SUFFIXES.contains(&ext) {
            continue;
        }

        if explicit_set.contains(&path) {
            scored.push(ScoredFile {
                path,
                relevance: 1.0,
                reason: "explicit_mention",
            });
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let content_lower = content.to_lowercase();

        let mut relevance = 0.0f64;
        let mut matched = false;
        for kw in &keywords {
            let occurrences = content_lower.matches(kw.as_str()).count();
            if occurrences > 0 {
                matched = true;
                relevance = relevance.max((0.3 + 0.1 * occurrences as f64).min(0.9));
                if stem.contains(kw.as_str()) {
                    relevance = relevance.max(0.95).min(0.95);
                }
            }
        }
        if matched {
            scored.push(ScoredFile {
                path,
                relevance,
                reason: "keyword_match",
            });
        }
    }

    // Trace imports for the top-3 explicit files.
    let mut explicit_ranked: Vec<&ScoredFile> = scored.iter().filter(|f| f.reason == "explicit_mention").collect();
    explicit_ranked.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap());
    let import_paths: Vec<PathBuf> = explicit_ranked
        .iter()
        .take(3)
        .filter_map(|f| std::fs::read_to_string(&f.path).ok().map(|c| (f.path.clone(), c)))
        .flat_map(|(path, content)| trace_imports(&path, &content, &repo_root))
        .collect();

    for import_path in import_paths {
        if !scored.iter().any(|f| f.path == import_path) && import_path.exists() {
            scored.push(ScoredFile {
                path: import_path,
                relevance: 0.7,
                reason: "import_dependency",
            });
        }
    }

    if scored.is_empty() {
        return None;
    }

    scored.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap());
    scored.truncate(max_files);

    let mut content = String::from("## Code Context\n\n");
    let mut sources = Vec::new();
    let mut remaining_budget = token_budget;
    for file in &scored {
        let Ok(text) = std::fs::read_to_string(&file.path) else {
            continue;
        };
        let lines: Vec<&str> = text.lines().collect();
        let mut body: String;
        let truncated = lines.len() > max_file_lines;
        if truncated {
            body = lines[..max_file_lines].join("\n");
            body.push_str("\n… (truncated)\n");
        } else {
            body = text.clone();
        }

        let rel_path = file.path.strip_prefix(&repo_root).unwrap_or(&file.path);
        let snippet_tokens = estimate_tokens(&body);
        if snippet_tokens >= 500 && snippet_tokens > remaining_budget && remaining_budget > 0 {
            let keep_chars = remaining_budget * 4;
            body.truncate(keep_chars.min(body.len()));
            body.push_str("\n… (truncated to fit budget)\n");
        }
        remaining_budget = remaining_budget.saturating_sub(estimate_tokens(&body));

        content.push_str(&format!(
            "### {} (relevance={:.2}, reason={})\n```\n{}\n```\n\n",
            rel_path.display(),
            file.relevance,
            file.reason,
            body
        ));
        sources.push(rel_path.display().to_string());

        if remaining_budget == 0 {
            break;
        }
    }

    Some(StageResult::new(content, sources))
}

fn trace_imports(path: &Path, content: &str, repo_root: &Path) -> Vec<PathBuf> {
    let mut results = Vec::new();
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => {
            let re = Regex::new(r"^from\s+([\w.]+)\s+import").unwrap();
            for line in content.lines() {
                if let Some(caps) = re.captures(line) {
                    let module = caps.get(1).unwrap().as_str().replace('.', "/");
                    let candidate = repo_root.join(format!("{module}.py"));
                    results.push(candidate);
                }
            }
        }
        Some("ts") | Some("tsx") | Some("js") | Some("jsx") => {
            let re = Regex::new(r#"import\s+.*from\s+['"](\./[^'"]+|\.\./[^'"]+)['"]"#).unwrap();
            for caps in re.captures_iter(content) {
                let spec = caps.get(1).unwrap().as_str();
                let base = path.parent().unwrap_or(repo_root);
                for ext in ["ts", "tsx", "js", "jsx"] {
                    results.push(base.join(format!("{spec}.{ext}")));
                }
            }
        }
        _ => {}
    }
    results
}

// ---------------------------------------------------------------------------
// Stage 4: documentation_context
// ---------------------------------------------------------------------------

const README_CANDIDATES: &[&str] = &["README.md", "README.rst", "README"];
const CONVENTIONS_CANDIDATES: &[&str] = &["CONVENTIONS.md", "STYLE.md", "CONTRIBUTING.md"];
const ADR_DIRS: &[&str] = &["docs/adr", "docs/decisions", "adr"];

fn stage_documentation_context(project: &Project, task: &Bead) -> Option<StageResult> {
    let repo_root = PathBuf::from(project.repo_path.as_ref()?);
    let mut content = String::from("## Documentation\n\n");
    let mut sources = Vec::new();
    let mut found_any = false;

    for candidate in README_CANDIDATES.iter().chain(CONVENTIONS_CANDIDATES.iter()) {
        let path = repo_root.join(candidate);
        if let Ok(text) = std::fs::read_to_string(&path) {
            content.push_str(&format!("### {candidate}\n{text}\n\n"));
            sources.push(candidate.to_string());
            found_any = true;
        }
    }

    let task_words: HashSet<String> = format!("{} {}", task.title, task.description)
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    for dir in ADR_DIRS {
        let dir_path = repo_root.join(dir);
        if !dir_path.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir_path).max_depth(2).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let stem = entry.path().file_stem().and_then(|s| s.to_str()).unwrap_or("");
            let relevance = adr_relevance(stem, &text, &task_words);
            if relevance >= 0.3 {
                content.push_str(&format!("### ADR: {stem}\n{text}\n\n"));
                sources.push(entry.path().display().to_string());
                found_any = true;
            }
        }
    }

    let task_text_lower = format!("{} {}", task.title, task.description).to_lowercase();
    if API_KEYWORDS.iter().any(|k| task_text_lower.contains(k)) {
        for spec_name in ["openapi.yaml", "openapi.json", "api.md"] {
            if let Ok(text) = std::fs::read_to_string(repo_root.join(spec_name)) {
                content.push_str(&format!("### {spec_name}\n{text}\n\n"));
                sources.push(spec_name.to_string());
                found_any = true;
            }
        }
    }
    if ARCHITECTURE_KEYWORDS.iter().any(|k| task_text_lower.contains(k)) {
        for arch_name in ["ARCHITECTURE.md", "docs/architecture.md"] {
            if let Ok(text) = std::fs::read_to_string(repo_root.join(arch_name)) {
                content.push_str(&format!("### {arch_name}\n{text}\n\n"));
                sources.push(arch_name.to_string());
                found_any = true;
            }
        }
    }

    found_any.then(|| StageResult::new(content, sources))
}

fn adr_relevance(filename: &str, content: &str, task_words: &HashSet<String>) -> f64 {
    let filename_words: HashSet<String> = filename
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    let filename_overlap = overlap_ratio(&filename_words, task_words);

    let content_words: HashSet<String> = content
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    let content_overlap = overlap_ratio(&content_words, task_words);

    let title_line = content.lines().next().unwrap_or("");
    let title_words: HashSet<String> = title_line
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    let title_overlap = overlap_ratio(&title_words, task_words);

    (filename_overlap + content_overlap + title_overlap) / 3.0
}

fn overlap_ratio(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / a.len().min(b.len()) as f64
}

// ---------------------------------------------------------------------------
// Stage 5: deployment_context
// ---------------------------------------------------------------------------

fn deployment_relevance(task: &Bead) -> f64 {
    let text = format!("{} {}", task.title, task.description).to_lowercase();
    let strong = DEPLOYMENT_STRONG_KEYWORDS.iter().filter(|k| text.contains(**k)).count();
    let medium = DEPLOYMENT_MEDIUM_KEYWORDS.iter().filter(|k| text.contains(**k)).count();
    (strong as f64 * 0.5 + medium as f64 * 0.2).min(1.0)
}

fn redact_secrets_kv(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim().to_lowercase();
            if is_secret_key(&key) {
                out.push_str(&line[..eq_pos]);
                out.push_str("=<REDACTED>\n");
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn redact_secrets_yaml(content: &str) -> String {
    match serde_yaml::from_str::<serde_yaml::Value>(content) {
        Ok(value) => {
            let redacted = redact_yaml_value(value);
            serde_yaml::to_string(&redacted).unwrap_or_else(|_| redact_secrets_line_by_line(content))
        }
        Err(_) => redact_secrets_line_by_line(content),
    }
}

fn redact_yaml_value(value: serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                let key_str = k.as_str().unwrap_or("").to_lowercase();
                if is_secret_key(&key_str) {
                    out.insert(k, serde_yaml::Value::String("<REDACTED>".into()));
                } else {
                    out.insert(k, redact_yaml_value(v));
                }
            }
            serde_yaml::Value::Mapping(out)
        }
        serde_yaml::Value::Sequence(seq) => {
            serde_yaml::Value::Sequence(seq.into_iter().map(redact_yaml_value).collect())
        }
        other => other,
    }
}

fn redact_secrets_line_by_line(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            if let Some(colon_pos) = line.find(':') {
                let key = line[..colon_pos].trim().trim_start_matches('-').trim().to_lowercase();
                if is_secret_key(&key) {
                    return format!("{}: <REDACTED>", &line[..colon_pos]);
                }
            }
            line.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_secret_key(key: &str) -> bool {
    SECRET_KEY_PATTERNS.iter().any(|pattern| {
        let pat = pattern.replace('_', "[_-]?");
        Regex::new(&pat).map(|re| re.is_match(key)).unwrap_or(false)
    })
}

fn stage_deployment_context(project: &Project, task: &Bead) -> Option<StageResult> {
    if deployment_relevance(task) < 0.3 {
        return None;
    }
    let repo_root = PathBuf::from(project.repo_path.as_ref()?);
    let mut content = String::from("## Deployment Context\n\n");
    let mut sources = Vec::new();
    let mut found_any = false;

    for entry in WalkDir::new(repo_root).max_depth(3).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_str().unwrap_or("");
        let is_env = name.starts_with(".env");
        let is_compose = name.contains("docker-compose");
        let is_helm_values = name.starts_with("values") && (name.ends_with(".yaml") || name.ends_with(".yml"));
        let is_ci = entry.path().to_string_lossy().contains(".github/workflows");

        if !(is_env || is_compose || is_helm_values || is_ci) {
            continue;
        }

        let Ok(raw) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let redacted = if is_env {
            redact_secrets_kv(&raw)
        } else {
            redact_secrets_yaml(&raw)
        };
        content.push_str(&format!("### {}\n```\n{}\n```\n\n", entry.path().display(), redacted));
        sources.push(entry.path().display().to_string());
        found_any = true;
    }

    for entry in WalkDir::new(repo_root).max_depth(4).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if raw.contains("kind:") && raw.contains("apiVersion:") {
            let redacted = redact_secrets_yaml(&raw);
            content.push_str(&format!("### {} (k8s manifest)\n```\n{}\n```\n\n", entry.path().display(), redacted));
            sources.push(entry.path().display().to_string());
            found_any = true;
        }
    }

    found_any.then(|| StageResult::new(content, sources))
}

// ---------------------------------------------------------------------------
// Stage 6: history_context
// ---------------------------------------------------------------------------

fn stage_history_context(inputs: &EnrichmentInputs) -> Option<StageResult> {
    if inputs.chat_messages.is_empty() {
        return None;
    }
    let markdown = rlm::render_history_markdown(&inputs.chat_messages, &inputs.existing_summaries)?;
    Some(StageResult::new(markdown, vec!["chat_history".into()]))
}

// ---------------------------------------------------------------------------
// Stage 7: logs_context
// ---------------------------------------------------------------------------

fn is_debugging_task(task: &Bead) -> bool {
    let text = format!("{} {}", task.title, task.description).to_lowercase();
    DEBUG_KEYWORDS.iter().any(|k| text.contains(k))
}

fn stage_logs_context(task: &Bead, inputs: &EnrichmentInputs) -> Option<StageResult> {
    if !is_debugging_task(task) {
        return None;
    }
    let mut lines: Vec<String> = Vec::new();
    lines.extend(inputs.task_scoped_logs.iter().cloned());
    lines.extend(inputs.project_error_logs_24h.iter().cloned());

    let mut seen = HashSet::new();
    lines.retain(|line| seen.insert(line.clone()));

    if lines.is_empty() {
        return None;
    }
    let content = format!("## Logs\n\n```\n{}\n```", lines.join("\n"));
    Some(StageResult::new(content, vec!["logs".into()]))
}

// ---------------------------------------------------------------------------
// Stage 8: research_context
// ---------------------------------------------------------------------------

fn stage_research_context(task: &Bead, completed: &[Bead]) -> Option<StageResult> {
    if completed.is_empty() {
        return None;
    }
    let task_keywords: HashSet<String> = task_keywords(task).into_iter().collect();
    let task_title_words: HashSet<String> = task
        .title
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    let mut scored: Vec<(f64, &Bead)> = completed
        .iter()
        .map(|other| {
            let other_keywords: HashSet<String> = task_keywords_of_text(&other.title, &other.description);
            let keyword_overlap = overlap_ratio(&task_keywords, &other_keywords);
            let title_words: HashSet<String> = other
                .title
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect();
            let title_overlap = overlap_ratio(&task_title_words, &title_words);
            ((keyword_overlap + title_overlap) / 2.0, other)
        })
        .filter(|(score, _)| *score >= 0.3)
        .collect();

    if scored.is_empty() {
        return None;
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    scored.truncate(3);

    let mut content = String::from("## Related Completed Work\n\n");
    let mut sources = Vec::new();
    for (score, bead) in &scored {
        content.push_str(&format!(
            "- **{}** ({:.0}% relevant): {}\n",
            bead.title,
            score * 100.0,
            bead.description
        ));
        sources.push(bead.id.clone());
    }
    Some(StageResult::new(content, sources))
}

fn task_keywords_of_text(title: &str, description: &str) -> HashSet<String> {
    let fake = Bead {
        id: String::new(),
        kind: crate::types::BeadKind::Task,
        project_id: uuid::Uuid::nil(),
        title: title.to_string(),
        description: description.to_string(),
        priority: crate::types::PLevel::P2,
        status: crate::types::BeadStatus::Done,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
        prompt_path: None,
        output_path: None,
        context_hash: None,
        task: None,
        epic: None,
    };
    task_keywords(&fake).into_iter().collect()
}

// ---------------------------------------------------------------------------
// Stage 9: refinement_context
// ---------------------------------------------------------------------------

fn stage_refinement_context() -> Option<StageResult> {
    let content = "## Guardrails\n\n\
When you have completed the task, emit the literal line `<promise>COMPLETE</promise>` on its \
own. If you need a human decision before proceeding, say so explicitly (e.g. \"I need a decision \
on ...\") rather than guessing. Follow the project's existing code style and conventions; prefer \
small, reviewable changes.";
    Some(StageResult::new(content, vec![]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeadKind, BeadStatus, PLevel, ProjectSettings};

    fn project(repo_path: Option<String>) -> Project {
        Project {
            id: uuid::Uuid::new_v4(),
            name: "demo".into(),
            description: "a demo project".into(),
            tech_stack: vec!["rust".into()],
            repo_path,
            settings: ProjectSettings::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn task(title: &str, description: &str) -> Bead {
        Bead {
            id: Bead::new_id(),
            kind: BeadKind::Task,
            project_id: uuid::Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            priority: PLevel::P2,
            status: BeadStatus::Ready,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            prompt_path: None,
            output_path: None,
            context_hash: None,
            task: Some(Default::default()),
            epic: None,
        }
    }

    #[test]
    fn task_context_always_present() {
        let result = stage_task_context(&task("t", "d"), 0).unwrap();
        assert!(result.content.contains("Title: t"));
    }

    #[test]
    fn deployment_gated_below_threshold() {
        let t = task("add a feature", "nothing special here");
        assert!(deployment_relevance(&t) < 0.3);
        assert!(stage_deployment_context(&project(None), &t).is_none());
    }

    #[test]
    fn deployment_relevance_triggers_on_strong_keyword() {
        let t = task("deploy to kubernetes", "set up the helm chart");
        assert!(deployment_relevance(&t) >= 0.3);
    }

    #[test]
    fn secret_redaction_in_kv_file() {
        let redacted = redact_secrets_kv("DATABASE_URL=postgres://user:pw@host/db\nPORT=8080");
        assert!(redacted.contains("DATABASE_URL=<REDACTED>"));
        assert!(redacted.contains("PORT=8080"));
    }

    #[test]
    fn secret_redaction_in_yaml() {
        let redacted = redact_secrets_yaml("api_key: abc123\nreplicas: 3\n");
        assert!(redacted.contains("<REDACTED>"));
        assert!(redacted.contains("replicas: 3"));
    }

    #[test]
    fn is_debugging_task_matches_keywords() {
        assert!(is_debugging_task(&task("fix the crash", "investigate root cause")));
        assert!(!is_debugging_task(&task("add a new button", "styling only")));
    }

    #[test]
    fn refinement_context_mentions_completion_signal() {
        let result = stage_refinement_context().unwrap();
        assert!(result.content.contains("<promise>COMPLETE</promise>"));
    }

    #[test]
    fn assemble_prompt_produces_stable_hash_for_same_inputs() {
        let proj = project(None);
        let t = task("demo task", "demo description");
        let inputs = EnrichmentInputs::default();
        let config = EnrichmentConfig::default();
        let (prompt_a, _) = assemble_prompt(&proj, &t, 0, &inputs, &config);
        let (prompt_b, _) = assemble_prompt(&proj, &t, 0, &inputs, &config);
        assert_eq!(prompt_a.context_hash, prompt_b.context_hash);
        assert_eq!(prompt_a.context_hash.len(), 16);
    }

    #[test]
    fn assemble_prompt_always_applies_mandatory_stages() {
        let proj = project(None);
        let t = task("demo task", "demo description");
        let inputs = EnrichmentInputs::default();
        let config = EnrichmentConfig::default();
        let (prompt, _) = assemble_prompt(&proj, &t, 0, &inputs, &config);
        assert!(prompt.metrics.stages_applied.contains(&"task_context".to_string()));
        assert!(prompt.metrics.stages_applied.contains(&"project_context".to_string()));
        assert!(prompt.metrics.stages_applied.contains(&"refinement_context".to_string()));
    }
}
