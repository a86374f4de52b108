//! In-memory reference backend.
//!
//! `MemoryStore` keeps every table in a single mutex-guarded struct, which
//! gives each method the per-row atomicity the trait requires (including
//! the compare-and-set paths) for free. It backs the engine's tests and
//! serves as the reference implementation for the conformance suite.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    parse_rfc3339, AuditEntryRecord, ContractRecord, ContractStatus, DocumentJobRecord,
    EvidenceRecordRow, JobStatus, ReminderRecord, SignatureRecord, SignerRole, TokenRecord,
};
use crate::traits::WorkflowStore;

#[derive(Default)]
struct Inner {
    contracts: Vec<ContractRecord>,
    signatures: Vec<SignatureRecord>,
    tokens: Vec<TokenRecord>,
    audit: Vec<AuditEntryRecord>,
    evidence: Vec<EvidenceRecordRow>,
    jobs: Vec<DocumentJobRecord>,
    reminders: Vec<ReminderRecord>,
}

/// Mutex-guarded in-memory implementation of [`WorkflowStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Recover data even if the mutex was poisoned by a panicking test.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Total number of audit entries across all contracts. Test hook.
    pub fn audit_len(&self) -> usize {
        self.lock().audit.len()
    }
}

/// Parse a stored timestamp for comparison, treating malformed values as
/// the epoch so they sort first instead of breaking queries.
fn ts(s: &str) -> OffsetDateTime {
    parse_rfc3339(s).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    // ── Contracts ────────────────────────────────────────────────────────

    async fn insert_contract(&self, contract: ContractRecord) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.contracts.iter().any(|c| c.id == contract.id) {
            return Err(StorageError::ContractExists {
                contract_id: contract.id,
            });
        }
        inner.contracts.push(contract);
        Ok(())
    }

    async fn get_contract(&self, contract_id: &str) -> Result<ContractRecord, StorageError> {
        self.lock()
            .contracts
            .iter()
            .find(|c| c.id == contract_id)
            .cloned()
            .ok_or_else(|| StorageError::ContractNotFound {
                contract_id: contract_id.to_string(),
            })
    }

    async fn advance_status(
        &self,
        contract_id: &str,
        expected: ContractStatus,
        to: ContractStatus,
        finalized_at: Option<&str>,
    ) -> Result<(), StorageError> {
        if to.rank() <= expected.rank() {
            return Err(StorageError::BackwardTransition {
                contract_id: contract_id.to_string(),
                from: expected.to_string(),
                to: to.to_string(),
            });
        }
        let mut inner = self.lock();
        let contract = inner
            .contracts
            .iter_mut()
            .find(|c| c.id == contract_id)
            .ok_or_else(|| StorageError::ContractNotFound {
                contract_id: contract_id.to_string(),
            })?;
        if contract.status != expected {
            return Err(StorageError::StatusConflict {
                contract_id: contract_id.to_string(),
                expected: expected.to_string(),
                found: contract.status.to_string(),
            });
        }
        contract.status = to;
        if let Some(t) = finalized_at {
            contract.finalized_at = Some(t.to_string());
        }
        Ok(())
    }

    async fn set_document(
        &self,
        contract_id: &str,
        url: &str,
        sha256: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let contract = inner
            .contracts
            .iter_mut()
            .find(|c| c.id == contract_id)
            .ok_or_else(|| StorageError::ContractNotFound {
                contract_id: contract_id.to_string(),
            })?;
        contract.document_url = Some(url.to_string());
        contract.document_sha256 = Some(sha256.to_string());
        Ok(())
    }

    // ── Signatures ───────────────────────────────────────────────────────

    async fn insert_signature(&self, signature: SignatureRecord) -> Result<(), StorageError> {
        self.lock().signatures.push(signature);
        Ok(())
    }

    async fn find_signature(
        &self,
        contract_id: &str,
        role: SignerRole,
    ) -> Result<Option<SignatureRecord>, StorageError> {
        Ok(self
            .lock()
            .signatures
            .iter()
            .find(|s| s.contract_id == contract_id && s.role == role)
            .cloned())
    }

    async fn list_signatures(
        &self,
        contract_id: &str,
    ) -> Result<Vec<SignatureRecord>, StorageError> {
        Ok(self
            .lock()
            .signatures
            .iter()
            .filter(|s| s.contract_id == contract_id)
            .cloned()
            .collect())
    }

    // ── Verification tokens ──────────────────────────────────────────────

    async fn insert_token(&self, token: TokenRecord) -> Result<(), StorageError> {
        self.lock().tokens.push(token);
        Ok(())
    }

    async fn find_token(
        &self,
        contract_id: &str,
        code: &str,
    ) -> Result<Option<TokenRecord>, StorageError> {
        // Prefer an unused row when a contract has seen the same code
        // twice across supersessions.
        let inner = self.lock();
        let matching = || {
            inner
                .tokens
                .iter()
                .filter(|t| t.contract_id == contract_id && t.code == code)
        };
        Ok(matching()
            .find(|t| t.used_at.is_none())
            .or_else(|| matching().next())
            .cloned())
    }

    async fn supersede_open_tokens(
        &self,
        contract_id: &str,
        superseded_at: &str,
    ) -> Result<usize, StorageError> {
        let mut inner = self.lock();
        let mut count = 0;
        for token in inner
            .tokens
            .iter_mut()
            .filter(|t| t.contract_id == contract_id && t.used_at.is_none())
        {
            token.used_at = Some(superseded_at.to_string());
            count += 1;
        }
        Ok(count)
    }

    async fn mark_token_used(
        &self,
        token_id: &str,
        used_at: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let token = inner
            .tokens
            .iter_mut()
            .find(|t| t.id == token_id)
            .ok_or_else(|| StorageError::TokenNotFound {
                token_id: token_id.to_string(),
            })?;
        if token.used_at.is_some() {
            return Err(StorageError::TokenAlreadyUsed {
                token_id: token_id.to_string(),
            });
        }
        token.used_at = Some(used_at.to_string());
        token.used_ip = Some(ip.to_string());
        token.used_user_agent = Some(user_agent.to_string());
        Ok(())
    }

    // ── Audit ledger ─────────────────────────────────────────────────────

    async fn append_audit(&self, entry: AuditEntryRecord) -> Result<(), StorageError> {
        self.lock().audit.push(entry);
        Ok(())
    }

    async fn list_audit(&self, contract_id: &str) -> Result<Vec<AuditEntryRecord>, StorageError> {
        let mut entries: Vec<AuditEntryRecord> = self
            .lock()
            .audit
            .iter()
            .filter(|e| e.contract_id == contract_id)
            .cloned()
            .collect();
        // Stable sort: entries with equal timestamps keep insertion order.
        entries.sort_by_key(|e| ts(&e.occurred_at));
        Ok(entries)
    }

    // ── Evidence records ─────────────────────────────────────────────────

    async fn insert_evidence(&self, record: EvidenceRecordRow) -> Result<(), StorageError> {
        self.lock().evidence.push(record);
        Ok(())
    }

    async fn list_evidence(
        &self,
        contract_id: &str,
    ) -> Result<Vec<EvidenceRecordRow>, StorageError> {
        Ok(self
            .lock()
            .evidence
            .iter()
            .filter(|e| e.contract_id == contract_id)
            .cloned()
            .collect())
    }

    // ── Document jobs ────────────────────────────────────────────────────

    async fn insert_job_if_none_active(
        &self,
        job: DocumentJobRecord,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        if inner
            .jobs
            .iter()
            .any(|j| j.contract_id == job.contract_id && j.is_active())
        {
            return Ok(false);
        }
        inner.jobs.push(job);
        Ok(true)
    }

    async fn claim_due_jobs(
        &self,
        limit: usize,
        now: &str,
        lease_until: &str,
    ) -> Result<Vec<DocumentJobRecord>, StorageError> {
        let now_ts = ts(now);
        let mut inner = self.lock();
        inner.jobs.sort_by_key(|j| ts(&j.created_at));

        let mut claimed = Vec::new();
        for job in inner.jobs.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            let due = match job.status {
                JobStatus::Pending => {
                    job.attempts < job.max_attempts
                        && job.lease_until.as_deref().map_or(true, |l| ts(l) <= now_ts)
                }
                // A processing job whose lease ran out was abandoned by a
                // crashed or aborted worker; reclaim it even at the
                // attempt limit so the next claim drives it to a terminal
                // state instead of leaving it stuck.
                JobStatus::Processing => {
                    job.lease_until.as_deref().is_some_and(|l| ts(l) <= now_ts)
                }
                JobStatus::Completed | JobStatus::Error => false,
            };
            if due {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.lease_until = Some(lease_until.to_string());
                job.updated_at = now.to_string();
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn get_job(&self, job_id: &str) -> Result<DocumentJobRecord, StorageError> {
        self.lock()
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
            .ok_or_else(|| StorageError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn update_job(&self, job: DocumentJobRecord) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let slot = inner
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| StorageError::JobNotFound {
                job_id: job.id.clone(),
            })?;
        *slot = job;
        Ok(())
    }

    async fn list_jobs(&self, contract_id: &str) -> Result<Vec<DocumentJobRecord>, StorageError> {
        let mut jobs: Vec<DocumentJobRecord> = self
            .lock()
            .jobs
            .iter()
            .filter(|j| j.contract_id == contract_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| ts(&j.created_at));
        Ok(jobs)
    }

    // ── Reminder schedules ───────────────────────────────────────────────

    async fn insert_reminders(&self, reminders: Vec<ReminderRecord>) -> Result<(), StorageError> {
        self.lock().reminders.extend(reminders);
        Ok(())
    }

    async fn cancel_open_reminders(&self, contract_id: &str) -> Result<usize, StorageError> {
        let mut inner = self.lock();
        let mut count = 0;
        for reminder in inner
            .reminders
            .iter_mut()
            .filter(|r| r.contract_id == contract_id && r.is_open())
        {
            reminder.cancelled = true;
            count += 1;
        }
        Ok(count)
    }

    async fn due_reminders(&self, now: &str) -> Result<Vec<ReminderRecord>, StorageError> {
        let now_ts = ts(now);
        let mut due: Vec<ReminderRecord> = self
            .lock()
            .reminders
            .iter()
            .filter(|r| r.is_open() && ts(&r.due_at) <= now_ts)
            .cloned()
            .collect();
        due.sort_by_key(|r| ts(&r.due_at));
        Ok(due)
    }

    async fn mark_reminder_sent(
        &self,
        reminder_id: &str,
        sent_at: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let reminder = inner
            .reminders
            .iter_mut()
            .find(|r| r.id == reminder_id)
            .ok_or_else(|| StorageError::ReminderNotFound {
                reminder_id: reminder_id.to_string(),
            })?;
        reminder.sent = true;
        reminder.sent_at = Some(sent_at.to_string());
        Ok(())
    }

    async fn bump_reminder_attempts(&self, reminder_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let reminder = inner
            .reminders
            .iter_mut()
            .find(|r| r.id == reminder_id)
            .ok_or_else(|| StorageError::ReminderNotFound {
                reminder_id: reminder_id.to_string(),
            })?;
        reminder.attempts += 1;
        Ok(())
    }

    async fn cancel_reminder(&self, reminder_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let reminder = inner
            .reminders
            .iter_mut()
            .find(|r| r.id == reminder_id)
            .ok_or_else(|| StorageError::ReminderNotFound {
                reminder_id: reminder_id.to_string(),
            })?;
        reminder.cancelled = true;
        Ok(())
    }

    async fn list_reminders(
        &self,
        contract_id: &str,
    ) -> Result<Vec<ReminderRecord>, StorageError> {
        Ok(self
            .lock()
            .reminders
            .iter()
            .filter(|r| r.contract_id == contract_id)
            .cloned()
            .collect())
    }
}
