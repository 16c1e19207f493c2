//! Property-based tests for manager timeout derivation and member indexing
//!
//! None of these properties spawn a process; they exercise the bookkeeping
//! that has to hold for any set of members.

use std::time::Duration;

use proptest::prelude::*;

use procwarden::manager::DEFAULT_MANAGER_TIMEOUT;
use procwarden::{ProcessConfig, ProcessManager, SchedulingMode};

/// The derived manager timeout always covers every member and never drops
/// below its floor, whatever the members' own timeouts are.
proptest! {
    #[test]
    fn prop_manager_timeout_covers_every_member(
        timeouts in proptest::collection::vec(0.0f64..600.0, 0..12)
    ) {
        let mut manager = ProcessManager::new();
        for (i, secs) in timeouts.iter().enumerate() {
            manager.add(ProcessConfig::new(format!("echo {i}")).timeout_secs(*secs));
        }
        let timeout = manager.timeout();
        prop_assert!(timeout >= DEFAULT_MANAGER_TIMEOUT);
        for process in manager.processes() {
            prop_assert!(timeout >= process.config().timeout);
        }
    }
}

/// Adding members yields dense, stable indices; the first index past the
/// end is always rejected.
proptest! {
    #[test]
    fn prop_member_indices_are_dense(count in 0usize..20) {
        let mut manager = ProcessManager::with_mode(SchedulingMode::Queue);
        for i in 0..count {
            prop_assert_eq!(manager.add(ProcessConfig::new("true")), i);
        }
        prop_assert_eq!(manager.process_count(), count);
        for i in 0..count {
            prop_assert!(manager.process(i).is_ok());
        }
        prop_assert!(manager.process(count).is_err());
    }
}

/// The float-second timeout setter accepts any input without panicking;
/// garbage collapses to zero while large positive values saturate upward
/// rather than inverting into instant timeouts.
proptest! {
    #[test]
    fn prop_timeout_secs_is_total(secs in proptest::num::f64::ANY) {
        let config = ProcessConfig::new("true").timeout_secs(secs);
        prop_assert!(config.timeout >= Duration::ZERO);
        if secs >= 1.0 {
            prop_assert!(config.timeout >= Duration::from_secs(1));
        }
    }
}
