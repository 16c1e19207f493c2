//! Error types for process supervision

use std::io;
use thiserror::Error;

/// Process supervision errors
///
/// Hard failures are returned to the caller. Soft conditions (a timeout, a
/// handle that went away, a signal that could not be delivered) are logged
/// and reflected in the process status instead of unwinding the polling
/// call that noticed them; the matching variants here are the log payloads.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The OS refused to spawn the child process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] io::Error),

    /// The launch description is unusable
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// The process exceeded its allotted wall-clock time
    #[error("Process timed out after {seconds} seconds")]
    Timeout { seconds: f64 },

    /// The OS-level handle disappeared between polls
    #[error("Process handle lost: {reason}")]
    HandleLost { reason: String },

    /// A termination signal could not be delivered
    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },

    /// The OS refused a priority change
    #[error("Priority change denied for process {pid}: {reason}")]
    PriorityChangeDenied { pid: u32, reason: String },

    /// The operation needs a spawned process
    #[error("Process has not been started")]
    NotStarted,

    /// Trace data was requested but no tracer was ever attached
    #[error("No tracer attached to this process")]
    TraceUnavailable,

    /// Reading the trace output file failed
    #[error("Failed to read trace output: {0}")]
    TraceFile(io::Error),

    /// A manager accessor was given an index past the end
    #[error("No process at index {index} (count: {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// Persisting captured output to disk failed
    #[error("Failed to persist output: {0}")]
    OutputFile(io::Error),
}

/// Convenience result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
