//! Storage boundary for the firma e-signature workflow engine.
//!
//! Defines the `WorkflowStore` trait (the engine's only persistence
//! dependency), the record types for all seven tables, a mutex-guarded
//! in-memory reference backend, and a backend-agnostic conformance suite.

mod error;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{
    format_rfc3339, parse_rfc3339, AuditEntryRecord, AuditKind, AuditPayload, CertificateMetadata,
    ClientEvidence, ContractRecord, ContractStatus, DocumentJobRecord, EvidenceKind,
    EvidencePayload, EvidenceRecordRow, GeoPoint, JobStatus, ReminderOffset, ReminderRecord,
    SignatureRecord, SignerRole, TokenRecord, TokenRefusal,
};
pub use traits::WorkflowStore;
