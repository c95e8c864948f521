//! Recursive-language-model summarizer for chat history (C5.1).
//!
//! Keeps recent messages verbatim and collapses older ranges into
//! hierarchical summaries, the way a human reviewer skims a long thread:
//! read the last few messages in full, skim a digest of what came before.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::{ChatMessage, ChatRole, Summary};

pub const RECENT_VERBATIM: usize = 10;
pub const SUMMARY_THRESHOLD: usize = 20;
pub const CHUNK_SIZE: usize = 10;
pub const MAX_CONTEXT_TOKENS: usize = 4000;
const MAX_KEY_DECISIONS: usize = 15;
const KEY_DECISION_MAX_LEN: usize = 150;

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[\w./\\-]+\.(?:rs|toml|md|py|js|ts|tsx|jsx|json|yaml|yml|sh|go|java|rb)\b")
            .unwrap()
    })
}

fn action_verb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:created|updated|modified|deleted|added|removed)\s+(\S+)|\b(?:fixed|implemented|resolved)\s+(\w+)").unwrap()
    })
}

fn key_decision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(decided to .+|we('ll| will) use .+|going with .+|choice: .+|decision: .+)")
            .unwrap()
    })
}

/// Summarize one chunk of messages into a [`Summary`] covering
/// `[start_id, end_id]` inclusive.
fn summarize_chunk(chunk: &[ChatMessage]) -> Summary {
    let start_message_id = chunk.first().map(|m| m.id).unwrap_or(0);
    let end_message_id = chunk.last().map(|m| m.id).unwrap_or(0);
    let project_id = chunk.first().map(|m| m.project_id).unwrap_or_default();
    let task_id = chunk.first().and_then(|m| m.task_id.clone());

    let mut file_paths: Vec<String> = Vec::new();
    let mut questions: Vec<String> = Vec::new();
    let mut actions: Vec<String> = Vec::new();
    let mut key_decisions: Vec<String> = Vec::new();

    for msg in chunk {
        for m in file_path_re().find_iter(&msg.content) {
            let path = m.as_str().to_string();
            if !file_paths.contains(&path) {
                file_paths.push(path);
            }
        }

        if msg.role == ChatRole::User {
            for sentence in msg.content.split(['.', '\n']) {
                let trimmed = sentence.trim();
                if trimmed.ends_with('?') {
                    questions.push(trimmed.to_string());
                }
            }
        }

        if msg.role == ChatRole::Assistant {
            for caps in action_verb_re().captures_iter(&msg.content) {
                let verb_phrase = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                if !verb_phrase.is_empty() {
                    actions.push(caps.get(0).unwrap().as_str().to_string());
                }
            }
        }

        for caps in key_decision_re().captures_iter(&msg.content) {
            let mut decision = caps.get(1).unwrap().as_str().trim().to_string();
            if decision.len() > KEY_DECISION_MAX_LEN {
                decision.truncate(KEY_DECISION_MAX_LEN);
            }
            if !key_decisions.contains(&decision) {
                key_decisions.push(decision);
            }
        }
    }
    key_decisions.truncate(MAX_KEY_DECISIONS);

    let mut text = String::new();
    if !file_paths.is_empty() {
        text.push_str(&format!("Files touched: {}. ", file_paths.join(", ")));
    }
    if !actions.is_empty() {
        text.push_str(&format!("Actions: {}. ", actions.join("; ")));
    }
    if !questions.is_empty() {
        text.push_str(&format!("Questions raised: {}. ", questions.join(" / ")));
    }
    if text.is_empty() {
        text.push_str(&format!("{} messages with no extractable signal.", chunk.len()));
    }

    let token_count = (text.len() as u32).div_ceil(4);

    Summary {
        id: uuid::Uuid::new_v4(),
        project_id,
        task_id,
        start_message_id,
        end_message_id,
        text,
        key_decisions,
        token_count,
        created_at: chrono::Utc::now(),
    }
}

/// Given the full ordered message history and any summaries already
/// produced, compute the summaries that still need to be created to cover
/// the uncovered range, chunked by `CHUNK_SIZE`.
pub fn summarize_new_ranges(messages: &[ChatMessage], existing: &[Summary]) -> Vec<Summary> {
    if messages.len() <= SUMMARY_THRESHOLD {
        return Vec::new();
    }

    let recent_cutoff = messages.len().saturating_sub(RECENT_VERBATIM);
    let covered_end = existing.iter().map(|s| s.end_message_id).max().unwrap_or(0);

    let uncovered: Vec<&ChatMessage> = messages[..recent_cutoff]
        .iter()
        .filter(|m| m.id > covered_end)
        .collect();

    uncovered
        .chunks(CHUNK_SIZE)
        .map(|chunk| {
            let owned: Vec<ChatMessage> = chunk.iter().map(|&m| m.clone()).collect();
            summarize_chunk(&owned)
        })
        .collect()
}

/// Render the history stage's markdown block: recent messages verbatim,
/// preceded by key decisions and a summary of earlier discussion.
pub fn render_history_markdown(messages: &[ChatMessage], summaries: &[Summary]) -> Option<String> {
    if messages.is_empty() {
        return None;
    }

    let recent_cutoff = messages.len().saturating_sub(RECENT_VERBATIM);
    let recent = &messages[recent_cutoff..];

    let mut key_decisions: Vec<String> = Vec::new();
    for s in summaries {
        for d in &s.key_decisions {
            if !key_decisions.contains(d) {
                key_decisions.push(d.clone());
            }
        }
    }
    key_decisions.truncate(MAX_KEY_DECISIONS);

    let mut out = String::from("## Conversation History\n\n");

    if !key_decisions.is_empty() {
        out.push_str("### Key Decisions\n");
        for d in &key_decisions {
            out.push_str(&format!("- {d}\n"));
        }
        out.push('\n');
    }

    if !summaries.is_empty() {
        out.push_str("### Summary of Earlier Discussion\n");
        let mut ordered = summaries.to_vec();
        ordered.sort_by_key(|s| s.start_message_id);
        for s in &ordered {
            out.push_str(&format!("- {}\n", s.text));
        }
        out.push('\n');
    }

    out.push_str("### Recent Messages\n");
    for msg in recent {
        let role = match msg.role {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
            ChatRole::System => "System",
        };
        out.push_str(&format!("**{role}:** {}\n\n", msg.content));
    }

    Some(out)
}

/// Char/4 token estimate, consistent with the rest of the enrichment
/// pipeline.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn msg(id: u64, role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage {
            id,
            project_id: Uuid::new_v4(),
            task_id: None,
            role,
            content: content.to_string(),
            media_ref: None,
            token_count: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_summaries_below_threshold() {
        let messages: Vec<ChatMessage> = (0..5)
            .map(|i| msg(i, ChatRole::User, "hi"))
            .collect();
        assert!(summarize_new_ranges(&messages, &[]).is_empty());
    }

    #[test]
    fn extracts_file_paths_and_decisions() {
        let seed = vec![
            msg(0, ChatRole::User, "can you fix src/main.rs?"),
            msg(1, ChatRole::Assistant, "updated src/main.rs. decided to use tokio for this."),
        ];
        let messages: Vec<ChatMessage> = (0..25)
            .map(|i| {
                if (i as usize) < seed.len() {
                    seed[i as usize].clone()
                } else {
                    msg(i, ChatRole::User, "noise")
                }
            })
            .collect();
        let summaries = summarize_new_ranges(&messages, &[]);
        assert!(!summaries.is_empty());
        let first = &summaries[0];
        assert!(first.text.contains("main.rs"));
        assert!(first.key_decisions.iter().any(|d| d.contains("tokio")));
    }

    #[test]
    fn render_includes_recent_verbatim_messages() {
        let messages: Vec<ChatMessage> = (0..5)
            .map(|i| msg(i, ChatRole::User, &format!("message {i}")))
            .collect();
        let rendered = render_history_markdown(&messages, &[]).unwrap();
        assert!(rendered.contains("message 4"));
        assert!(rendered.contains("Recent Messages"));
    }

    #[test]
    fn empty_history_renders_nothing() {
        assert!(render_history_markdown(&[], &[]).is_none());
    }
}
