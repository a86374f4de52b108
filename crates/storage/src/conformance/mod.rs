//! Conformance test suite for `WorkflowStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `WorkflowStore` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Contracts**: insert/read, duplicate detection, status CAS,
//!   forward-only transitions, targeted document patches
//! - **Tokens**: single-use compare-and-set redemption, supersession
//! - **Jobs**: one-active-per-contract, FIFO lease claims, attempt counting
//! - **Audit**: per-contract timestamp ordering, append-only reads
//! - **Reminders**: due selection, logical cancellation, send marking
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function
//! that creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use firma_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod audit;
mod contracts;
mod jobs;
mod reminders;
mod tokens;

use std::fmt;
use std::future::Future;

use crate::record::{
    AuditEntryRecord, AuditKind, AuditPayload, ClientEvidence, ContractRecord, ContractStatus,
    DocumentJobRecord, JobStatus, ReminderOffset, ReminderRecord, TokenRecord,
};
use crate::WorkflowStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "contracts", "tokens").
    pub category: String,
    /// Test name (e.g. "mark_used_is_single_shot").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                category: category.to_string(),
                name: name.to_string(),
                passed: true,
                message: None,
            },
            Err(msg) => Self {
                category: category.to_string(),
                name: name.to_string(),
                passed: false,
                message: Some(msg),
            },
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(contracts::run_contract_tests(&factory).await);
    results.extend(tokens::run_token_tests(&factory).await);
    results.extend(jobs::run_job_tests(&factory).await);
    results.extend(audit::run_audit_tests(&factory).await);
    results.extend(reminders::run_reminder_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_contract(id: &str) -> ContractRecord {
    ContractRecord {
        id: id.to_string(),
        title: "Supply agreement".to_string(),
        body: "Between {{signer_name}} and the company.".to_string(),
        signer_name: "Alex Doe".to_string(),
        signer_email: "alex@example.com".to_string(),
        signer_national_id: "00000000A".to_string(),
        status: ContractStatus::PendingInternalSignature,
        created_at: "2026-01-01T00:00:00Z".to_string(),
        finalized_at: None,
        document_url: None,
        document_sha256: None,
    }
}

fn make_token(id: &str, contract_id: &str, code: &str) -> TokenRecord {
    TokenRecord {
        id: id.to_string(),
        contract_id: contract_id.to_string(),
        email: "alex@example.com".to_string(),
        code: code.to_string(),
        issued_at: "2026-01-01T10:00:00Z".to_string(),
        valid_until: "2026-01-02T10:00:00Z".to_string(),
        used_at: None,
        used_ip: None,
        used_user_agent: None,
    }
}

fn make_job(id: &str, contract_id: &str, created_at: &str) -> DocumentJobRecord {
    DocumentJobRecord {
        id: id.to_string(),
        contract_id: contract_id.to_string(),
        status: JobStatus::Pending,
        attempts: 0,
        max_attempts: DocumentJobRecord::DEFAULT_MAX_ATTEMPTS,
        error: None,
        document_url: None,
        document_sha256: None,
        created_at: created_at.to_string(),
        updated_at: created_at.to_string(),
        processed_at: None,
        lease_until: None,
    }
}

fn make_audit_entry(id: &str, contract_id: &str, occurred_at: &str) -> AuditEntryRecord {
    AuditEntryRecord {
        id: id.to_string(),
        contract_id: contract_id.to_string(),
        kind: AuditKind::AccessAttempt,
        description: "conformance event".to_string(),
        payload: AuditPayload::AccessAttempt {
            resource: "contract".to_string(),
            granted: true,
        },
        evidence: ClientEvidence {
            ip: "127.0.0.1".to_string(),
            user_agent: "conformance".to_string(),
            timestamp: occurred_at.to_string(),
            timezone: "UTC".to_string(),
            geolocation: None,
        },
        actor_id: None,
        occurred_at: occurred_at.to_string(),
    }
}

fn make_reminder(
    id: &str,
    contract_id: &str,
    offset: ReminderOffset,
    due_at: &str,
) -> ReminderRecord {
    ReminderRecord {
        id: id.to_string(),
        contract_id: contract_id.to_string(),
        offset,
        due_at: due_at.to_string(),
        sent: false,
        sent_at: None,
        cancelled: false,
        attempts: 0,
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}
