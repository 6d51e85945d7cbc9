// ============================================================================
// Cloud Subject (component F)
// ============================================================================
//
// The user-facing facade: binds a stream name to a provider handle and
// exposes publish/subscribe/dispose over the store-verify-emit pipeline.
//
// ============================================================================

mod cloud_subject;

pub use cloud_subject::{CloudSubject, Subscription};
