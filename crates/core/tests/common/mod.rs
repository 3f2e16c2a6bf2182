//! Shared helpers for ice-core integration tests

#![allow(dead_code)]

use std::sync::Once;

use ice_core::runtime;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process
///
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=ice_core=debug cargo test`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Run `f` and assert every block it allocated was freed
pub fn assert_no_leaks<F: FnOnce()>(f: F) {
    let before = runtime::stats();
    f();
    let delta = runtime::stats().since(&before);
    assert_eq!(
        delta.allocations, delta.frees,
        "leaked {} blocks ({})",
        delta.live_blocks(),
        delta
    );
}
