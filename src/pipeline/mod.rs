// ============================================================================
// Publish Pipeline
// ============================================================================
//
// Component E: the store-then-verify-then-emit dispatch that turns a raw
// `Provider::store` write into a consistency-honoring `publish`, plus the
// structural equality and matcher-correlation helpers it's built from.
//
// ============================================================================

mod deep_equal;
mod matcher;
mod publish;

pub use deep_equal::deep_equal;
pub use matcher::Matcher;
pub use publish::{publish, PublishOutcome};
