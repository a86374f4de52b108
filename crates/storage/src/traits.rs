use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    AuditEntryRecord, ContractRecord, ContractStatus, DocumentJobRecord, EvidenceRecordRow,
    ReminderRecord, SignatureRecord, SignerRole, TokenRecord,
};

/// The storage trait for firma workflow backends.
///
/// A `WorkflowStore` implementation provides durable storage for contracts,
/// signatures, verification tokens, the audit ledger, evidence records,
/// document jobs, and reminder schedules.
///
/// ## Conditional updates
///
/// Three methods are compare-and-set operations and carry the engine's
/// correctness load:
///
/// - `advance_status`: `UPDATE WHERE status = expected`. A mismatch
///   returns `Err(StorageError::StatusConflict)`. Backward transitions
///   (by status rank) are rejected outright.
/// - `mark_token_used`: `UPDATE WHERE used_at IS NULL`. Two concurrent
///   redemptions of the same token must yield exactly one success and one
///   `Err(StorageError::TokenAlreadyUsed)`.
/// - `claim_due_jobs`: atomically marks selected jobs `processing`, bumps
///   their attempt counter, and sets a claim lease so no other worker can
///   claim them until the lease expires.
///
/// ## Append-only tables
///
/// Audit entries, evidence records, signatures, and tokens are never
/// updated in place (tokens flip `used_at` exactly once; nothing else on
/// the row changes). No method exists to delete or rewrite them.
///
/// ## Thread safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across
/// async task boundaries.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // ── Contracts ────────────────────────────────────────────────────────

    /// Insert a new contract. Returns `Err(StorageError::ContractExists)`
    /// if the id is already present.
    async fn insert_contract(&self, contract: ContractRecord) -> Result<(), StorageError>;

    /// Read a contract by id.
    async fn get_contract(&self, contract_id: &str) -> Result<ContractRecord, StorageError>;

    /// Compare-and-set status transition.
    ///
    /// The update is conditional on `status = expected`; a mismatch returns
    /// `Err(StorageError::StatusConflict)` and leaves the row untouched.
    /// `to` must rank strictly above `expected` -- there is no transition
    /// that reverts a contract to an earlier state.
    ///
    /// `finalized_at` is patched only when provided (the `Finalized`
    /// transition); all other contract fields are left alone.
    async fn advance_status(
        &self,
        contract_id: &str,
        expected: ContractStatus,
        to: ContractStatus,
        finalized_at: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Targeted patch of the contract's document reference and hash.
    ///
    /// Touches only `document_url` and `document_sha256`, so a concurrent
    /// status transition is never clobbered.
    async fn set_document(
        &self,
        contract_id: &str,
        url: &str,
        sha256: &str,
    ) -> Result<(), StorageError>;

    // ── Signatures ───────────────────────────────────────────────────────

    /// Append a signature. Signatures are immutable once written.
    async fn insert_signature(&self, signature: SignatureRecord) -> Result<(), StorageError>;

    /// Find the signature for a (contract, role) pair, if any.
    async fn find_signature(
        &self,
        contract_id: &str,
        role: SignerRole,
    ) -> Result<Option<SignatureRecord>, StorageError>;

    /// List all signatures for a contract.
    async fn list_signatures(&self, contract_id: &str)
        -> Result<Vec<SignatureRecord>, StorageError>;

    // ── Verification tokens ──────────────────────────────────────────────

    /// Persist a freshly issued token.
    async fn insert_token(&self, token: TokenRecord) -> Result<(), StorageError>;

    /// Find a token by contract and code. Codes are only ever looked up
    /// scoped by contract, so cross-contract collisions are harmless.
    async fn find_token(
        &self,
        contract_id: &str,
        code: &str,
    ) -> Result<Option<TokenRecord>, StorageError>;

    /// Mark all unused tokens for a contract as used at `superseded_at`,
    /// without `used_ip`/`used_user_agent` (superseded, not redeemed).
    /// Returns the number of tokens invalidated.
    async fn supersede_open_tokens(
        &self,
        contract_id: &str,
        superseded_at: &str,
    ) -> Result<usize, StorageError>;

    /// Compare-and-set redemption: conditional on `used_at IS NULL`.
    /// Returns `Err(StorageError::TokenAlreadyUsed)` if the token was
    /// already consumed or superseded.
    async fn mark_token_used(
        &self,
        token_id: &str,
        used_at: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<(), StorageError>;

    // ── Audit ledger ─────────────────────────────────────────────────────

    /// Append one audit entry. Entries are immutable once written.
    async fn append_audit(&self, entry: AuditEntryRecord) -> Result<(), StorageError>;

    /// List a contract's audit entries in non-decreasing `occurred_at`
    /// order. No cross-contract ordering is guaranteed.
    async fn list_audit(&self, contract_id: &str) -> Result<Vec<AuditEntryRecord>, StorageError>;

    // ── Evidence records ─────────────────────────────────────────────────

    /// Append one evidence record. Records are immutable once written.
    async fn insert_evidence(&self, record: EvidenceRecordRow) -> Result<(), StorageError>;

    /// List all evidence records for a contract.
    async fn list_evidence(
        &self,
        contract_id: &str,
    ) -> Result<Vec<EvidenceRecordRow>, StorageError>;

    // ── Document jobs ────────────────────────────────────────────────────

    /// Insert the job unless the contract already has an active
    /// (pending or processing) job. Returns whether the job was inserted.
    async fn insert_job_if_none_active(
        &self,
        job: DocumentJobRecord,
    ) -> Result<bool, StorageError>;

    /// Claim up to `limit` due jobs, FIFO by creation time.
    ///
    /// A job is due when it is `pending`, `attempts < max_attempts`, and
    /// its `lease_until` is absent or `<= now` -- or when it is
    /// `processing` with `lease_until <= now` (an abandoned claim whose
    /// worker died; such jobs are reclaimable even at the attempt limit,
    /// so the next processing pass drives them to a terminal state).
    /// Claimed jobs are marked `processing` with `attempts + 1` and
    /// `lease_until` set, all in one atomic step per job, and returned in
    /// their claimed form.
    async fn claim_due_jobs(
        &self,
        limit: usize,
        now: &str,
        lease_until: &str,
    ) -> Result<Vec<DocumentJobRecord>, StorageError>;

    /// Read a job by id.
    async fn get_job(&self, job_id: &str) -> Result<DocumentJobRecord, StorageError>;

    /// Write back a job's processing outcome (status, error, document
    /// fields, timestamps, lease).
    async fn update_job(&self, job: DocumentJobRecord) -> Result<(), StorageError>;

    /// List all jobs for a contract, FIFO by creation time.
    async fn list_jobs(&self, contract_id: &str) -> Result<Vec<DocumentJobRecord>, StorageError>;

    // ── Reminder schedules ───────────────────────────────────────────────

    /// Insert a batch of reminder rows.
    async fn insert_reminders(&self, reminders: Vec<ReminderRecord>) -> Result<(), StorageError>;

    /// Logically cancel all open (unsent, uncancelled) reminders for a
    /// contract. Returns the number cancelled. Rows are never deleted.
    async fn cancel_open_reminders(&self, contract_id: &str) -> Result<usize, StorageError>;

    /// List open reminders with `due_at <= now`, across all contracts.
    async fn due_reminders(&self, now: &str) -> Result<Vec<ReminderRecord>, StorageError>;

    /// Mark one reminder sent.
    async fn mark_reminder_sent(
        &self,
        reminder_id: &str,
        sent_at: &str,
    ) -> Result<(), StorageError>;

    /// Increment a reminder's attempt counter after a failed send.
    async fn bump_reminder_attempts(&self, reminder_id: &str) -> Result<(), StorageError>;

    /// Logically cancel a single reminder.
    async fn cancel_reminder(&self, reminder_id: &str) -> Result<(), StorageError>;

    /// List all reminder rows for a contract.
    async fn list_reminders(&self, contract_id: &str)
        -> Result<Vec<ReminderRecord>, StorageError>;
}
