//! PTY-backed worker sessions for ringmaster's coding-agent processes.
//!
//! This crate owns the pooled pseudo-terminal machinery a worker session runs
//! inside, and the per-CLI adapters ([`worker_variant`]) that know how to turn
//! a [`ringmaster_core::types::SessionConfig`] into the right binary and
//! argument list for `claude-code`, `aider`, `codex`, `goose`, or a fully
//! templated generic CLI.
//!
//! Key components:
//! - PTY pool for efficient terminal allocation
//! - Worker variant adapters for bridging agent commands to shell execution

pub mod pty_pool;
pub mod worker_variant;
