//! Process lifecycle states and status snapshots

use std::fmt;

/// Exit code synthesized when a process is terminated for exceeding its
/// timeout. Overrides whatever the OS reports for the killed process.
pub const TIMEOUT_EXIT_CODE: i32 = 2;

/// Exit code recorded when the OS reports termination by signal and has no
/// exit code of its own to offer.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Lifecycle states of a supervised process
///
/// Progression is `Created` → `Started` → `Running`, ending in exactly one
/// of `Exited`, `TimedOut` or `Stopped`. Terminal states never change
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Configured but not yet spawned
    Created,
    /// The OS accepted the spawn
    Started,
    /// Observed alive by a poll
    Running,
    /// Observed dead of natural causes
    Exited,
    /// Terminated by the supervisor after exceeding its timeout
    TimedOut,
    /// Terminated on caller request
    Stopped,
}

impl ProcessState {
    /// Whether this state ends the lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Exited | ProcessState::TimedOut | ProcessState::Stopped
        )
    }

    /// Whether the process may still be alive
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessState::Started | ProcessState::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Created => "created",
            ProcessState::Started => "started",
            ProcessState::Running => "running",
            ProcessState::Exited => "exited",
            ProcessState::TimedOut => "timed out",
            ProcessState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Point-in-time view of a supervised process, refreshed by polls
///
/// Once `running` turns false the snapshot freezes: further refreshes are
/// skipped and `exit_code` keeps the value captured at the first
/// non-running observation.
#[derive(Debug, Clone, Default)]
pub struct ProcessStatus {
    /// OS process id, known once spawned
    pub pid: Option<u32>,
    /// Result of the most recent liveness observation
    pub running: bool,
    /// Cached exit code; `None` until the process was observed non-running.
    /// See [`TIMEOUT_EXIT_CODE`] and [`SIGNAL_EXIT_CODE`] for the two
    /// synthesized values.
    pub exit_code: Option<i32>,
    /// Human-readable note about the last significant observation
    pub info: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ProcessState::Created.is_terminal());
        assert!(!ProcessState::Started.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
        assert!(ProcessState::Exited.is_terminal());
        assert!(ProcessState::TimedOut.is_terminal());
        assert!(ProcessState::Stopped.is_terminal());
    }

    #[test]
    fn test_active_states() {
        assert!(ProcessState::Started.is_active());
        assert!(ProcessState::Running.is_active());
        assert!(!ProcessState::Created.is_active());
        assert!(!ProcessState::Stopped.is_active());
    }

    #[test]
    fn test_terminal_and_active_are_disjoint() {
        for state in [
            ProcessState::Created,
            ProcessState::Started,
            ProcessState::Running,
            ProcessState::Exited,
            ProcessState::TimedOut,
            ProcessState::Stopped,
        ] {
            assert!(!(state.is_terminal() && state.is_active()));
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ProcessState::Running.to_string(), "running");
        assert_eq!(ProcessState::TimedOut.to_string(), "timed out");
    }

    #[test]
    fn test_default_status_is_unobserved() {
        let status = ProcessStatus::default();
        assert!(status.pid.is_none());
        assert!(!status.running);
        assert!(status.exit_code.is_none());
        assert!(status.info.is_empty());
    }
}
