use std::sync::Arc;

use crate::store::BackingStoreError;
use crate::utils::IsTransient;

// ============================================================================
// Provider Error Taxonomy
// ============================================================================
//
// The two-tier classification the specification's bootstrap and publish
// paths both drive off: `Retryable` conditions re-arm on a fixed schedule,
// `Fatal` conditions propagate and poison the registry entry / fail the
// publish outright. Mirrors the `thiserror`-per-domain style of
// `OrderError`/`CustomerError`, generalized to infrastructure concerns.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("schema validation failed: {0}")]
    SchemaMismatch(String),

    #[error("provider initialization aborted")]
    Aborted,

    #[error("transient backing-store condition: {0}")]
    Retryable(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("subject has been disposed")]
    Disposed,

    #[error("unknown backing-store error: {0}")]
    Unknown(#[from] anyhow::Error),

    #[error("stream registry entry is poisoned by a prior fatal error: {0}")]
    Poisoned(Arc<ProviderError>),
}

impl ProviderError {
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

impl IsTransient for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Retryable(_))
    }
}

impl From<BackingStoreError> for ProviderError {
    fn from(err: BackingStoreError) -> Self {
        match err {
            BackingStoreError::ResourceNotFound(msg) => ProviderError::Retryable(msg),
            BackingStoreError::ResourceInUse(msg) => ProviderError::Retryable(msg),
            BackingStoreError::Validation(msg) => ProviderError::Retryable(msg),
            BackingStoreError::ConnectionRefused => {
                ProviderError::Retryable("connection refused".to_string())
            }
            BackingStoreError::Other(e) => ProviderError::Unknown(e),
        }
    }
}
