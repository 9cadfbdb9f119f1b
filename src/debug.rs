//! Process-wide debug toggle: a single atomic boolean initialized at
//! startup and never reconfigured once the loop begins. Gates extra
//! diagnostic logging that would otherwise be noisy in normal
//! operation — e.g. per-round lock-contention and proc-scan detail.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

pub fn set_debug_enabled(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_disabled_and_round_trips() {
        set_debug_enabled(true);
        assert!(is_debug_enabled());
        set_debug_enabled(false);
        assert!(!is_debug_enabled());
    }
}
