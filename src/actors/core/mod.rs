// ============================================================================
// Core Actor Abstractions
// ============================================================================
//
// Generic health-status types, reusable by any supervised actor.
//
// ============================================================================

mod health;

pub use health::*;
