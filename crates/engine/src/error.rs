use firma_storage::{ContractStatus, SignerRole, StorageError, TokenRefusal};

/// All errors surfaced by the workflow engine.
///
/// Token refusals are deliberately a typed, non-fatal reason: callers show
/// an actionable message rather than treating them as generic failures.
/// Audit writes and notification sends never produce these -- they degrade
/// to logged no-ops.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A required input field is missing or malformed. Rejected before any
    /// state change.
    #[error("validation failed on '{field}': {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// A token validation attempt was refused with a specific reason.
    #[error("token refused: {0}")]
    Token(TokenRefusal),

    /// The contract is not in the status the operation requires.
    #[error("contract {contract_id} is {found}, expected {expected}")]
    InvalidState {
        contract_id: String,
        expected: &'static str,
        found: ContractStatus,
    },

    /// A signature for this role already exists on the contract.
    #[error("contract {contract_id} already has a {role} signature")]
    SignatureExists {
        contract_id: String,
        role: SignerRole,
    },

    /// The document renderer failed. Queued jobs capture this on the job
    /// row instead of propagating it.
    #[error("document render failed: {0}")]
    Render(String),

    /// A storage operation failed (including not-found and CAS conflicts).
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A payload could not be serialized for hashing or persistence.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this is a typed token refusal (non-fatal, user-presentable).
    pub fn token_refusal(&self) -> Option<TokenRefusal> {
        match self {
            EngineError::Token(reason) => Some(*reason),
            _ => None,
        }
    }
}
