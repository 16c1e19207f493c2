//! # procwarden
//!
//! **Purpose**: POSIX process supervision driven entirely by the caller
//!
//! Runs external commands with piped I/O, wall-clock timeouts, optional
//! syscall tracing, priority control, and parallel or queued scheduling of
//! process groups.
//!
//! Everything happens on the calling thread: liveness checks, timeout
//! enforcement, output capture and queue advancement are all performed
//! inside `poll()` / `running()` calls. There are no background threads
//! and no async runtime; a process that is never polled is never timed
//! out.
//!
//! ## Features
//!
//! - **Cooperative Polling**: Non-blocking, bounded pipe reads on every
//!   poll; a one-shot blocking drain once the process is gone
//! - **Timeout Enforcement**: Float-second deadlines checked inside
//!   `running()`, with a synthesized exit code for expired processes
//! - **Exit Code Caching**: Read from the OS exactly once, stable forever
//! - **Syscall Tracing**: strace-style tracer attached for the process's
//!   whole observable life
//! - **Priority Control**: Absolute and relative niceness changes
//! - **Scheduling**: Parallel fan-out or strict in-order queues with a
//!   derived timeout covering every member
//!
//! ## Usage
//!
//! ```rust,no_run
//! use procwarden::{ProcessConfig, ProcessManager, SchedulingMode};
//!
//! fn main() -> procwarden::Result<()> {
//!     let mut manager = ProcessManager::with_mode(SchedulingMode::Queue);
//!     manager.add(ProcessConfig::new("make fetch").timeout_secs(30.0));
//!     manager.add(ProcessConfig::new("make build").timeout_secs(300.0));
//!     manager.run()?;
//!
//!     for process in manager.processes_mut() {
//!         println!("{:?}: {:?}", process.pid(), process.exit_code());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod manager;
mod output;
pub mod state;
pub mod supervisor;
pub mod trace;

pub use config::{PipeMode, PipeSpec, ProcessConfig};
pub use error::{ProcessError, Result};
pub use manager::{ProcessManager, SchedulingMode};
pub use state::{ProcessState, ProcessStatus, SIGNAL_EXIT_CODE, TIMEOUT_EXIT_CODE};
pub use supervisor::ManagedProcess;
pub use trace::Tracer;
