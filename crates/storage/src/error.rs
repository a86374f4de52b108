/// All errors that can be returned by a WorkflowStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No contract with the given id.
    #[error("contract not found: {contract_id}")]
    ContractNotFound { contract_id: String },

    /// A contract with this id already exists.
    #[error("contract already exists: {contract_id}")]
    ContractExists { contract_id: String },

    /// Compare-and-set conflict on a status transition -- the contract's
    /// current status did not match the expected one.
    #[error("status conflict on contract {contract_id}: expected {expected}, found {found}")]
    StatusConflict {
        contract_id: String,
        expected: String,
        found: String,
    },

    /// A status transition attempted to move backwards.
    #[error("backward transition on contract {contract_id}: {from} -> {to}")]
    BackwardTransition {
        contract_id: String,
        from: String,
        to: String,
    },

    /// No token with the given id.
    #[error("token not found: {token_id}")]
    TokenNotFound { token_id: String },

    /// Compare-and-set conflict on token redemption -- the token was
    /// already marked used by a concurrent or earlier attempt.
    #[error("token already used: {token_id}")]
    TokenAlreadyUsed { token_id: String },

    /// No document job with the given id.
    #[error("document job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// No reminder with the given id.
    #[error("reminder not found: {reminder_id}")]
    ReminderNotFound { reminder_id: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
