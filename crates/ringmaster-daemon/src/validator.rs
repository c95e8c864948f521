//! REVIEW -> DONE validator (SPEC_FULL.md §4.8, closing paragraph).
//!
//! The real validator is an external collaborator: it auto-detects and runs
//! a project's test/lint/type-check commands and reports pass/fail. That
//! collaborator lives outside this core (§1 scope), so it is modeled here as
//! a trait with one trivial always-pass implementation, matching §4.8's
//! "external collaborator" framing and the open-question resolution in §9
//! (REVIEW -> DONE is automatic via `Validator::validate`; manual override is
//! left to the external CLI/HTTP layer).

use async_trait::async_trait;
use ringmaster_core::types::Bead;

/// Outcome of validating a `REVIEW` bead before promoting it to `DONE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub passed: bool,
    pub details: String,
}

impl ValidationResult {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, bead: &Bead) -> ValidationResult;
}

/// Trivial always-pass implementation. Used as the default so that
/// `REVIEW -> DONE` promotion happens automatically (per §9's resolution)
/// until a real test/lint/type-check runner is wired in by the external
/// collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysPassValidator;

#[async_trait]
impl Validator for AlwaysPassValidator {
    async fn validate(&self, _bead: &Bead) -> ValidationResult {
        ValidationResult::pass("no validation commands configured")
    }
}
