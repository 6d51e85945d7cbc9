use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Telemetry Bootstrap
// ============================================================================
//
// Optional helper for binaries embedding this crate. Library code never
// calls this itself — only a consumer's `main` should install a global
// subscriber. Mirrors the registry/fmt-layer/EnvFilter wiring the teacher
// service sets up in its own `main.rs`.
//
// ============================================================================

/// Install a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info,cloudrx=debug`. Safe to call once per process; a second call is a
/// no-op (the underlying `set_global_default` error is swallowed).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cloudrx=debug")),
        )
        .try_init();
}
