//! Error types for store access and identity resolution.

use crate::model::ContactId;
use thiserror::Error;

/// Failures reported by a [`crate::store::ContactStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Data read by the transaction changed before it could commit.
    #[error("transaction conflict: concurrent modification detected")]
    Conflict,

    /// The backend is temporarily unable to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An update targeted a contact that does not exist.
    #[error("contact {0} not found")]
    NotFound(ContactId),

    /// Persisted bytes could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict | StoreError::Unavailable(_))
    }
}

/// Failures of an identify call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifyError {
    /// Neither email nor phone number was supplied.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Every attempt lost a race against a concurrent writer.
    #[error("identify aborted after {attempts} conflicting attempts")]
    Conflict { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored links do not describe a valid cluster.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl IdentifyError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, IdentifyError::Validation(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentifyError::Conflict { .. })
    }
}
