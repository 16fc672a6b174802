//! Error types for GigLedger.
//!
//! All errors use the `GL_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Amount / validation errors
//! - 2xx: Wallet balance errors
//! - 3xx: Escrow errors
//! - 4xx: Ledger errors
//! - 5xx: Directory errors (users, contracts)
//! - 6xx: Authentication / authorization errors
//! - 8xx: Integrity errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{Amount, ContractId, EscrowStatus, TransactionId, TransactionStatus, UserId};

/// Central error enum for all GigLedger operations.
#[derive(Debug, Error)]
pub enum GigledgerError {
    // =================================================================
    // Amount Errors (1xx)
    // =================================================================
    /// The amount failed validation (zero, negative, too precise, too large).
    #[error("GL_ERR_100: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Arithmetic on minor units overflowed `i64`.
    #[error("GL_ERR_101: Amount overflow")]
    AmountOverflow,

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// Not enough wallet balance to perform the operation.
    #[error("GL_ERR_200: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    /// A balance operation would produce a negative value.
    #[error("GL_ERR_201: Balance underflow for user {0}")]
    BalanceUnderflow(UserId),

    // =================================================================
    // Escrow Errors (3xx)
    // =================================================================
    /// No escrow account exists for this contract.
    #[error("GL_ERR_300: Escrow not found: {0}")]
    EscrowNotFound(ContractId),

    /// Release/refund requested more than the escrow holds.
    #[error("GL_ERR_301: Escrow {contract} holds {held}, requested {requested}")]
    EscrowExceeded {
        contract: ContractId,
        requested: Amount,
        held: Amount,
    },

    /// The escrow is not in a state that allows the operation.
    #[error("GL_ERR_302: Escrow {contract} is {status}, expected {expected}")]
    EscrowWrongStatus {
        contract: ContractId,
        status: EscrowStatus,
        expected: EscrowStatus,
    },

    /// An escrow status transition was rejected.
    #[error("GL_ERR_303: Invalid escrow transition for {contract}: {from} -> {to}")]
    InvalidEscrowTransition {
        contract: ContractId,
        from: EscrowStatus,
        to: EscrowStatus,
    },

    // =================================================================
    // Ledger Errors (4xx)
    // =================================================================
    /// The requested ledger row does not exist.
    #[error("GL_ERR_400: Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// A ledger row status transition was rejected.
    #[error("GL_ERR_401: Invalid transaction transition for {id}: {from} -> {to}")]
    InvalidTransactionTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// The external reference is already attached to another ledger row.
    #[error("GL_ERR_402: Duplicate external reference: {0}")]
    DuplicateReference(String),

    /// The request key was already processed.
    #[error("GL_ERR_403: Duplicate request: {0}")]
    DuplicateRequest(String),

    /// The ledger row is not of the type the operation expects.
    #[error("GL_ERR_404: Transaction {id} has wrong type: {reason}")]
    WrongTransactionType { id: TransactionId, reason: String },

    // =================================================================
    // Directory Errors (5xx)
    // =================================================================
    /// The user does not exist.
    #[error("GL_ERR_500: User not found: {0}")]
    UserNotFound(UserId),

    /// The contract does not exist.
    #[error("GL_ERR_501: Contract not found: {0}")]
    ContractNotFound(ContractId),

    /// A user with this email (or id) already exists.
    #[error("GL_ERR_502: User already exists: {0}")]
    DuplicateUser(String),

    /// The contract record failed validation.
    #[error("GL_ERR_503: Invalid contract: {reason}")]
    InvalidContract { reason: String },

    // =================================================================
    // Auth Errors (6xx)
    // =================================================================
    /// Email/password did not match locally nor at the identity provider.
    #[error("GL_ERR_600: Invalid credentials")]
    InvalidCredentials,

    /// The actor is not allowed to perform this action.
    #[error("GL_ERR_601: User {actor} is not authorized to {action}")]
    Unauthorized { actor: UserId, action: String },

    /// The session token is malformed or its signature is invalid.
    #[error("GL_ERR_602: Invalid token: {reason}")]
    TokenInvalid { reason: String },

    /// The session token (or session) has expired.
    #[error("GL_ERR_603: Token expired")]
    TokenExpired,

    /// The session was revoked (logout) or is unknown.
    #[error("GL_ERR_604: Session revoked or unknown")]
    SessionRevoked,

    /// The password does not meet strength requirements.
    #[error("GL_ERR_605: Weak password: {reason}")]
    WeakPassword { reason: String },

    /// Too many failed login attempts for this account.
    #[error("GL_ERR_606: Too many login attempts: {attempts} in {window_ms}ms")]
    TooManyAttempts { attempts: usize, window_ms: u64 },

    /// The external identity provider could not be reached or errored.
    #[error("GL_ERR_607: Identity provider error: {reason}")]
    ProviderUnavailable { reason: String },

    /// Password hashing failed.
    #[error("GL_ERR_608: Password hashing failed: {0}")]
    PasswordHash(String),

    /// An external identity is valid but has no local account.
    #[error("GL_ERR_609: No local account for external identity {0}")]
    UnlinkedIdentity(String),

    // =================================================================
    // Integrity Errors (8xx)
    // =================================================================
    /// A ledger invariant does not hold. Critical alert.
    #[error("GL_ERR_800: Ledger invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// A staged write conflicted with the stored state (lost update).
    #[error("GL_ERR_801: Store conflict: {reason}")]
    StoreConflict { reason: String },

    /// The batch was applied, but the post-commit audit then failed. The
    /// movement is durable; the ledger needs operator attention.
    #[error("GL_ERR_802: Committed, but ledger audit failed: {reason}")]
    AuditFailedAfterCommit { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("GL_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("GL_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("GL_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("GL_ERR_903: I/O error: {0}")]
    Io(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, GigledgerError>;

impl From<std::io::Error> for GigledgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GigledgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl GigledgerError {
    /// Whether the operation's writes were applied despite the error.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::AuditFailedAfterCommit { .. })
    }

    /// Whether the error means the caller is not allowed in (as opposed to a
    /// business-rule rejection). HTTP layers map these to 401/403.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::Unauthorized { .. }
                | Self::TokenInvalid { .. }
                | Self::TokenExpired
                | Self::SessionRevoked
                | Self::TooManyAttempts { .. }
                | Self::UnlinkedIdentity(_)
        )
    }
}
