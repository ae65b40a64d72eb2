//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing for a test binary.
///
/// Output goes through the test harness so it only shows for failing tests.
pub fn init_test() {
    tracing::init_test();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
