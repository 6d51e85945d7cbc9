// ============================================================================
// Transient Error Classification
// ============================================================================
//
// Shared by `BackingStoreError` and `ProviderError` so bootstrap and the
// publish pipeline can each drive their own retry loop off the same
// retryable/fatal distinction.
//
// ============================================================================

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}
