//! Error types for keyshard
//!
//! Component errors (`CipherError`, `SplitError`, `StoreError`) stay local to
//! their modules. Everything surfaced to callers is a `CustodyError`, which
//! carries a class so callers can decide retryability without knowing which
//! component failed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::custodial_keys::{CipherError, SplitError};
use crate::stores::StoreError;

/// One of the two independent share stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreId {
    #[serde(rename = "store-a")]
    A,
    #[serde(rename = "store-b")]
    B,
}

impl StoreId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "store-a",
            Self::B => "store-b",
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a store could not contribute its shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Network failure or timeout. Worth retrying after backoff.
    Unreachable,
    /// The store has nothing for this user.
    NotFound,
    /// The store answered with fewer shares than the custody record lists.
    ShortRead { expected: usize, got: usize },
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => f.write_str("unreachable"),
            Self::NotFound => f.write_str("record not found"),
            Self::ShortRead { expected, got } => {
                write!(f, "returned {got} of {expected} shares")
            }
        }
    }
}

/// A store implicated in a `ShareUnavailable` failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailableStore {
    pub store: StoreId,
    pub reason: UnavailableReason,
}

impl fmt::Display for UnavailableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.store, self.reason)
    }
}

fn describe_stores(stores: &[UnavailableStore]) -> String {
    stores
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse failure category used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad (N, T) or settings. Never retried.
    Configuration,
    /// A store or the chain could not be reached.
    Availability,
    /// Corrupted storage or tampering. Surface to an operator.
    Integrity,
    /// Idempotency and state conflicts.
    Conflict,
}

/// Main error type for custody operations.
///
/// Messages name the failure kind and the stores involved, never share or
/// key contents.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("Invalid threshold: {threshold} of {total} (need 2 <= T <= N <= 255)")]
    InvalidThreshold { total: usize, threshold: usize },

    #[error("Unsafe threshold: {0}")]
    UnsafeThreshold(String),

    #[error("Insufficient shares: need {required}, have {available}")]
    InsufficientShares { required: usize, available: usize },

    #[error("Shares unavailable from {}", describe_stores(.0))]
    ShareUnavailable(Vec<UnavailableStore>),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Reconstruction mismatch: {0}")]
    ReconstructionMismatch(String),

    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Already provisioned: {0}")]
    AlreadyProvisioned(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Broadcast error: {0}")]
    Broadcast(String),

    #[error("Confirmation timeout: {0}")]
    ConfirmationTimeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CustodyError {
    /// Failure category for this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidThreshold { .. }
            | Self::UnsafeThreshold(_)
            | Self::Config(_)
            | Self::InvalidInput(_) => ErrorClass::Configuration,
            Self::InsufficientShares { .. }
            | Self::ShareUnavailable(_)
            | Self::Storage(_)
            | Self::Broadcast(_)
            | Self::ConfirmationTimeout(_) => ErrorClass::Availability,
            Self::Decryption(_) | Self::ReconstructionMismatch(_) => ErrorClass::Integrity,
            Self::Provisioning(_) | Self::AlreadyProvisioned(_) | Self::NotFound(_) => {
                ErrorClass::Conflict
            }
        }
    }

    /// Whether the same request may succeed if retried later.
    ///
    /// A confirmation timeout is not retriable here: the transaction may
    /// already be on chain and resending it is the caller's call.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ShareUnavailable(stores) => stores
                .iter()
                .any(|s| s.reason != UnavailableReason::NotFound),
            Self::ConfirmationTimeout(_) => false,
            Self::Provisioning(_) => true,
            other => other.class() == ErrorClass::Availability,
        }
    }
}

impl From<SplitError> for CustodyError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::InvalidThreshold { total, threshold } => {
                Self::InvalidThreshold { total, threshold }
            }
            SplitError::InsufficientShares { required, provided } => Self::InsufficientShares {
                required,
                available: provided,
            },
            SplitError::Mismatch(msg) => Self::ReconstructionMismatch(msg),
        }
    }
}

impl From<CipherError> for CustodyError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Encryption => Self::Provisioning("share encryption failed".into()),
            other => Self::Decryption(other.to_string()),
        }
    }
}

impl From<StoreError> for CustodyError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for custody operations
pub type Result<T> = std::result::Result<T, CustodyError>;
