//! Runs in its own test binary: `init_tracing` installs a process-global
//! subscriber, which would otherwise displace the capture subscriber used by
//! the `#[traced_test]` unit tests.

use lifeline_core::observability::init_tracing;

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}
