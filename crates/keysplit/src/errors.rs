use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Internal failure kinds of the custody engine.
///
/// These carry full detail for operators. They must never reach a `reveal` caller as-is; the
/// boundary converts them into [`RevealError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("wallet is not platform-managed")]
    NotPlatformManaged,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("integrity violation: stored share hash does not match content")]
    IntegrityViolation,

    #[error("consistency violation: share nonce mismatch")]
    ConsistencyViolation,

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("conflict: an active wallet already exists for this user and network")]
    Conflict,
}

impl CustodyError {
    /// Stable identifier used in logs and the audit trail.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotPlatformManaged => "not_platform_managed",
            Self::WalletNotFound => "wallet_not_found",
            Self::NotFound(_) => "not_found",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::IntegrityViolation => "integrity_violation",
            Self::ConsistencyViolation => "consistency_violation",
            Self::DecryptionError(_) => "decryption_error",
            Self::Conflict => "conflict",
        }
    }

    /// Hash and nonce failures are treated as security incidents.
    pub const fn is_security_incident(&self) -> bool {
        matches!(self, Self::IntegrityViolation | Self::ConsistencyViolation)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unavailable(e: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

/// The only error a `reveal` caller ever sees.
///
/// Every check failure collapses into `Failed`, so the caller cannot tell a hash mismatch from
/// a nonce mismatch or a missing record. Transient storage failures stay distinguishable so the
/// caller knows a retry is worthwhile.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RevealError {
    #[error("unable to reveal private key")]
    Failed,

    #[error("key storage temporarily unavailable; retry the operation")]
    Unavailable,
}

impl From<CustodyError> for RevealError {
    fn from(e: CustodyError) -> Self {
        match e {
            CustodyError::StorageUnavailable(_) => Self::Unavailable,
            CustodyError::InvalidInput(_)
            | CustodyError::NotPlatformManaged
            | CustodyError::WalletNotFound
            | CustodyError::NotFound(_)
            | CustodyError::IntegrityViolation
            | CustodyError::ConsistencyViolation
            | CustodyError::DecryptionError(_)
            | CustodyError::Conflict => Self::Failed,
        }
    }
}

/// Result shape of the public `provision_wallet` operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl ProvisionResponse {
    pub const fn ok(address: String) -> Self {
        Self {
            success: true,
            address: Some(address),
            message: None,
        }
    }

    pub fn failed(e: &CustodyError) -> Self {
        Self {
            success: false,
            address: None,
            message: Some(e.to_string()),
        }
    }
}
