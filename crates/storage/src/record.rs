use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Parse an RFC 3339 timestamp string. Returns `None` for malformed input
/// rather than erroring -- callers decide whether a bad timestamp is fatal.
pub fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).ok()
}

/// Format a timestamp as RFC 3339. Formatting a UTC `OffsetDateTime` only
/// fails for out-of-range years, which never occur in this engine.
pub fn format_rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

// ──────────────────────────────────────────────
// Contract
// ──────────────────────────────────────────────

/// Lifecycle status of a contract. Transitions only move forward:
/// `Draft → PendingInternalSignature → PendingExternalSignature → Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    PendingInternalSignature,
    PendingExternalSignature,
    Finalized,
}

impl ContractStatus {
    /// Ordinal used to reject backward transitions at the storage boundary.
    pub fn rank(&self) -> u8 {
        match self {
            ContractStatus::Draft => 0,
            ContractStatus::PendingInternalSignature => 1,
            ContractStatus::PendingExternalSignature => 2,
            ContractStatus::Finalized => 3,
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContractStatus::Draft => "draft",
            ContractStatus::PendingInternalSignature => "pending_internal_signature",
            ContractStatus::PendingExternalSignature => "pending_external_signature",
            ContractStatus::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// A contract row. Owned by the lifecycle state machine; mutated only
/// through `advance_status` and `set_document` (targeted field patches,
/// never whole-row overwrites, so a status transition and a document-hash
/// write cannot clobber each other).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: String,
    pub title: String,
    /// Free-text body; `{{placeholder}}` variables are substituted by the
    /// document renderer.
    pub body: String,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_national_id: String,
    pub status: ContractStatus,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// RFC 3339 timestamp string. Set exactly once, on finalization.
    pub finalized_at: Option<String>,
    /// Last-known canonical document reference.
    pub document_url: Option<String>,
    /// SHA-256 hex digest of the last rendered document.
    pub document_sha256: Option<String>,
}

// ──────────────────────────────────────────────
// Signature
// ──────────────────────────────────────────────

/// Signer role. One signature per role per contract, created once and
/// never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    /// The company-side signature, backed by certificate metadata.
    InternalQualified,
    /// The counter-party signature, authenticated by token redemption.
    ExternalSimple,
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignerRole::InternalQualified => "internal_qualified",
            SignerRole::ExternalSimple => "external_simple",
        };
        f.write_str(s)
    }
}

/// Certificate metadata recorded as evidence for the qualified signature.
/// The engine records it; it does not validate certificate chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub issuer: String,
    pub subject: String,
    /// RFC 3339 timestamp string.
    pub valid_from: String,
    /// RFC 3339 timestamp string.
    pub valid_to: String,
    pub thumbprint: String,
}

/// An applied signature. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: String,
    pub contract_id: String,
    pub role: SignerRole,
    pub signer_name: String,
    pub signer_email: String,
    pub ip: String,
    pub user_agent: String,
    /// RFC 3339 timestamp string.
    pub signed_at: String,
    /// Present for `InternalQualified` only.
    pub certificate: Option<CertificateMetadata>,
}

// ──────────────────────────────────────────────
// Verification token
// ──────────────────────────────────────────────

/// Why a token validation attempt was refused. Non-fatal, surfaced to the
/// caller as a typed reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRefusal {
    NotFound,
    AlreadyUsed,
    Expired,
}

impl fmt::Display for TokenRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenRefusal::NotFound => "not_found",
            TokenRefusal::AlreadyUsed => "already_used",
            TokenRefusal::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A single-use, time-boxed verification token. Transitions exactly once
/// from unused to used; never deleted. A token marked used without
/// `used_ip`/`used_user_agent` was superseded by a later issue, not redeemed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: String,
    pub contract_id: String,
    /// Destination email the token was dispatched to.
    pub email: String,
    /// 6-digit numeric code.
    pub code: String,
    /// RFC 3339 timestamp string.
    pub issued_at: String,
    /// RFC 3339 timestamp string, `issued_at + 24h`.
    pub valid_until: String,
    pub used_at: Option<String>,
    pub used_ip: Option<String>,
    pub used_user_agent: Option<String>,
}

impl TokenRecord {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

// ──────────────────────────────────────────────
// Audit ledger
// ──────────────────────────────────────────────

/// Audit event kinds. One per `AuditPayload` variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    ContractCreated,
    ContractUpdated,
    StatusChanged,
    SignatureApplied,
    TokenIssued,
    TokenValidated,
    TokenRejected,
    DocumentGenerated,
    EvidenceRecorded,
    AccessAttempt,
    ReminderSent,
    RemindersCancelled,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditKind::ContractCreated => "contract_created",
            AuditKind::ContractUpdated => "contract_updated",
            AuditKind::StatusChanged => "status_changed",
            AuditKind::SignatureApplied => "signature_applied",
            AuditKind::TokenIssued => "token_issued",
            AuditKind::TokenValidated => "token_validated",
            AuditKind::TokenRejected => "token_rejected",
            AuditKind::DocumentGenerated => "document_generated",
            AuditKind::EvidenceRecorded => "evidence_recorded",
            AuditKind::AccessAttempt => "access_attempt",
            AuditKind::ReminderSent => "reminder_sent",
            AuditKind::RemindersCancelled => "reminders_cancelled",
        };
        f.write_str(s)
    }
}

/// Structured audit event payload. Each kind carries a fixed shape, so
/// consumers match exhaustively instead of probing key-value bags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditPayload {
    ContractCreated {
        title: String,
    },
    /// A pre-signature edit to the contract's fields. The workflow engine
    /// never mutates a contract's content itself; host applications that
    /// edit drafts record these through the ledger.
    ContractUpdated {
        fields: Vec<String>,
    },
    StatusChanged {
        from: ContractStatus,
        to: ContractStatus,
    },
    SignatureApplied {
        role: SignerRole,
        signer_email: String,
    },
    TokenIssued {
        token_id: String,
        valid_until: String,
    },
    TokenValidated {
        token_id: String,
    },
    TokenRejected {
        reason: TokenRefusal,
    },
    DocumentGenerated {
        sha256: String,
        url: String,
        stored_locally: bool,
    },
    EvidenceRecorded {
        evidence_id: String,
        evidence_kind: EvidenceKind,
        content_sha256: String,
    },
    AccessAttempt {
        resource: String,
        granted: bool,
    },
    ReminderSent {
        /// `None` for an out-of-band manual reminder.
        offset: Option<ReminderOffset>,
    },
    RemindersCancelled {
        reason: String,
        cancelled: usize,
    },
}

impl AuditPayload {
    pub fn kind(&self) -> AuditKind {
        match self {
            AuditPayload::ContractCreated { .. } => AuditKind::ContractCreated,
            AuditPayload::ContractUpdated { .. } => AuditKind::ContractUpdated,
            AuditPayload::StatusChanged { .. } => AuditKind::StatusChanged,
            AuditPayload::SignatureApplied { .. } => AuditKind::SignatureApplied,
            AuditPayload::TokenIssued { .. } => AuditKind::TokenIssued,
            AuditPayload::TokenValidated { .. } => AuditKind::TokenValidated,
            AuditPayload::TokenRejected { .. } => AuditKind::TokenRejected,
            AuditPayload::DocumentGenerated { .. } => AuditKind::DocumentGenerated,
            AuditPayload::EvidenceRecorded { .. } => AuditKind::EvidenceRecorded,
            AuditPayload::AccessAttempt { .. } => AuditKind::AccessAttempt,
            AuditPayload::ReminderSent { .. } => AuditKind::ReminderSent,
            AuditPayload::RemindersCancelled { .. } => AuditKind::RemindersCancelled,
        }
    }
}

/// Best-effort geolocation point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    /// Accuracy radius in meters.
    pub accuracy_m: f64,
}

/// Technical-evidence bundle collected for every audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEvidence {
    pub ip: String,
    pub user_agent: String,
    /// RFC 3339 timestamp string.
    pub timestamp: String,
    /// IANA timezone name.
    pub timezone: String,
    pub geolocation: Option<GeoPoint>,
}

/// One append-only audit ledger entry. Immutable once written; entries
/// for a contract replay in non-decreasing `occurred_at` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryRecord {
    pub id: String,
    pub contract_id: String,
    pub kind: AuditKind,
    pub description: String,
    pub payload: AuditPayload,
    pub evidence: ClientEvidence,
    pub actor_id: Option<String>,
    /// RFC 3339 timestamp string.
    pub occurred_at: String,
}

// ──────────────────────────────────────────────
// Evidence records
// ──────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Signature,
    Token,
    Integrity,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceKind::Signature => "signature",
            EvidenceKind::Token => "token",
            EvidenceKind::Integrity => "integrity",
        };
        f.write_str(s)
    }
}

/// Structured legal-evidence payload, one fixed shape per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidencePayload {
    Signature {
        role: SignerRole,
        signer_name: String,
        signer_email: String,
        ip: String,
        user_agent: String,
        certificate: Option<CertificateMetadata>,
    },
    Token {
        token_id: String,
        token_email: String,
        /// RFC 3339 timestamp string.
        redeemed_at: String,
        ip: String,
        user_agent: String,
    },
    Integrity {
        sha256: String,
        url: String,
        /// RFC 3339 timestamp string.
        generated_at: String,
    },
}

impl EvidencePayload {
    pub fn kind(&self) -> EvidenceKind {
        match self {
            EvidencePayload::Signature { .. } => EvidenceKind::Signature,
            EvidencePayload::Token { .. } => EvidenceKind::Token,
            EvidencePayload::Integrity { .. } => EvidenceKind::Integrity,
        }
    }
}

/// A hashed, immutable snapshot of facts supporting one workflow milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecordRow {
    pub id: String,
    pub contract_id: String,
    pub kind: EvidenceKind,
    pub payload: EvidencePayload,
    /// SHA-256 hex digest of the canonical JSON payload.
    pub content_sha256: String,
    /// RFC 3339 timestamp string.
    pub collected_at: String,
    pub valid: bool,
}

// ──────────────────────────────────────────────
// Document jobs
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Unit of asynchronous work that renders, hashes, and stores the canonical
/// signed document for one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentJobRecord {
    pub id: String,
    pub contract_id: String,
    pub status: JobStatus,
    /// Incremented by `claim_due_jobs` when the job is picked up. Only
    /// ever increases, except on explicit manual reprocessing.
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: Option<String>,
    pub document_url: Option<String>,
    pub document_sha256: Option<String>,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// RFC 3339 timestamp string.
    pub updated_at: String,
    pub processed_at: Option<String>,
    /// While `processing`: the claim lease expiry. While `pending` after a
    /// failed attempt: the earliest time the job may be claimed again.
    pub lease_until: Option<String>,
}

impl DocumentJobRecord {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Active jobs block a second enqueue for the same contract.
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Processing)
    }
}

// ──────────────────────────────────────────────
// Reminder schedules
// ──────────────────────────────────────────────

/// The three fixed reminder offsets from the moment the external
/// signature becomes pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderOffset {
    H24,
    H72,
    D7,
}

impl ReminderOffset {
    pub const ALL: [ReminderOffset; 3] =
        [ReminderOffset::H24, ReminderOffset::H72, ReminderOffset::D7];

    pub fn duration(&self) -> time::Duration {
        match self {
            ReminderOffset::H24 => time::Duration::hours(24),
            ReminderOffset::H72 => time::Duration::hours(72),
            ReminderOffset::D7 => time::Duration::days(7),
        }
    }
}

impl fmt::Display for ReminderOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReminderOffset::H24 => "24h",
            ReminderOffset::H72 => "72h",
            ReminderOffset::D7 => "7d",
        };
        f.write_str(s)
    }
}

/// A scheduled, cancelable reminder notification. Cancelled logically,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub id: String,
    pub contract_id: String,
    pub offset: ReminderOffset,
    /// RFC 3339 timestamp string.
    pub due_at: String,
    pub sent: bool,
    pub sent_at: Option<String>,
    pub cancelled: bool,
    /// Incremented when a send attempt fails; the reminder stays due.
    pub attempts: u32,
    /// RFC 3339 timestamp string.
    pub created_at: String,
}

impl ReminderRecord {
    /// Open reminders are eligible for sending or cancellation.
    pub fn is_open(&self) -> bool {
        !self.sent && !self.cancelled
    }
}
