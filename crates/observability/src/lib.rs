//! Tracing and logging setup shared by embedders of the outbox runtime.

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize process-wide tracing with an explicit output format.
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}

/// Initialize using `OUTBOX_LOG_FORMAT` (`json`, `pretty`, `compact`),
/// falling back to JSON when unset or unrecognised.
pub fn init_from_env() {
    let format = std::env::var("OUTBOX_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    tracing::init(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use crate::tracing::LogFormat;
