//! Coordination of multiple supervised processes
//!
//! A manager owns an ordered collection of [`ManagedProcess`] members and
//! schedules them in one of two modes: everything at once, or one at a
//! time in insertion order. Like single-process supervision, all progress
//! happens inside caller-driven [`running`](ProcessManager::running)
//! calls.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::error::{ProcessError, Result};
use crate::supervisor::ManagedProcess;

/// Floor for the derived manager timeout
pub const DEFAULT_MANAGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between polls in the manager's blocking run loop
pub const DEFAULT_MANAGER_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// How a manager schedules its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingMode {
    /// Start every member at once; run until the last one ends
    #[default]
    Parallel,
    /// Start members one at a time, in insertion order
    Queue,
}

/// Supervises an ordered collection of processes
///
/// The manager's timeout is derived: it starts at
/// [`DEFAULT_MANAGER_TIMEOUT`] and is raised to the largest member timeout
/// as members are added, so it always covers every member.
#[derive(Debug)]
pub struct ProcessManager {
    mode: SchedulingMode,
    check_interval: Duration,
    timeout: Duration,
    processes: Vec<ManagedProcess>,
    started: bool,
    cursor: usize,
}

impl ProcessManager {
    /// Parallel manager with default settings
    pub fn new() -> Self {
        Self::with_mode(SchedulingMode::Parallel)
    }

    /// Manager with an explicit scheduling mode
    pub fn with_mode(mode: SchedulingMode) -> Self {
        Self {
            mode,
            check_interval: DEFAULT_MANAGER_CHECK_INTERVAL,
            timeout: DEFAULT_MANAGER_TIMEOUT,
            processes: Vec::new(),
            started: false,
            cursor: 0,
        }
    }

    /// Set the pause between polls in the blocking run loop
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Wrap a configuration in a new member; returns its index
    pub fn add(&mut self, config: ProcessConfig) -> usize {
        self.add_process(ManagedProcess::new(config))
    }

    /// Ingest an externally built member; returns its index
    pub fn add_process(&mut self, process: ManagedProcess) -> usize {
        let member_timeout = process.config().timeout;
        if member_timeout > self.timeout {
            self.timeout = member_timeout;
        }
        self.processes.push(process);
        let index = self.processes.len() - 1;
        debug!(
            index,
            count = self.processes.len(),
            timeout_secs = self.timeout.as_secs_f64(),
            "Process added"
        );
        index
    }

    /// Start supervision
    ///
    /// Parallel mode starts every member; one member's spawn failure never
    /// prevents the rest from starting, and the first error is returned
    /// after the sweep. Queue mode starts only the first member. No-op
    /// once started.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        info!(mode = ?self.mode, count = self.processes.len(), "Manager starting");
        match self.mode {
            SchedulingMode::Parallel => {
                let mut first_err = None;
                for process in &mut self.processes {
                    if let Err(e) = process.start() {
                        warn!(error = %e, "Member failed to start");
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
            SchedulingMode::Queue => {
                self.cursor = 0;
                match self.processes.first_mut() {
                    Some(first) => first.start(),
                    None => Ok(()),
                }
            }
        }
    }

    /// Whether supervision still has live work
    ///
    /// Parallel mode polls every member (so each one keeps getting output
    /// servicing and timeout enforcement) and reports whether any is still
    /// running. Queue mode services the member at the cursor and advances
    /// the queue when it has finished.
    pub fn running(&mut self) -> bool {
        if !self.started {
            return false;
        }
        match self.mode {
            SchedulingMode::Parallel => {
                let mut any = false;
                for process in &mut self.processes {
                    if process.running() {
                        any = true;
                    }
                }
                any
            }
            SchedulingMode::Queue => self.advance_queue(),
        }
    }

    /// Start supervision and poll it to completion
    ///
    /// Blocks the calling thread, sleeping the check interval between
    /// polls. Start failures are reported after every startable member has
    /// still been supervised to the end.
    pub fn run(&mut self) -> Result<()> {
        let outcome = if self.started { Ok(()) } else { self.start() };
        while self.running() {
            thread::sleep(self.check_interval);
        }
        outcome
    }

    /// Number of members
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Borrow a member by index
    pub fn process(&self, index: usize) -> Result<&ManagedProcess> {
        let count = self.processes.len();
        self.processes
            .get(index)
            .ok_or(ProcessError::IndexOutOfRange { index, count })
    }

    /// Mutably borrow a member by index
    pub fn process_mut(&mut self, index: usize) -> Result<&mut ManagedProcess> {
        let count = self.processes.len();
        self.processes
            .get_mut(index)
            .ok_or(ProcessError::IndexOutOfRange { index, count })
    }

    /// All members, in insertion order
    pub fn processes(&self) -> &[ManagedProcess] {
        &self.processes
    }

    /// All members, mutably
    pub fn processes_mut(&mut self) -> &mut [ManagedProcess] {
        &mut self.processes
    }

    /// Derived timeout covering every member
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Scheduling mode
    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Whether supervision was started
    pub fn started(&self) -> bool {
        self.started
    }

    /// One queue-mode supervision step
    ///
    /// The cursor never moves past a member until that member has been
    /// observed out of its running phase; at most one new member is
    /// started per call. A member that fails to start counts as finished
    /// on the next call, so a single failure never wedges the queue.
    fn advance_queue(&mut self) -> bool {
        let count = self.processes.len();
        if self.cursor >= count {
            return false;
        }
        if self.processes[self.cursor].running() {
            return true;
        }
        self.cursor += 1;
        if self.cursor >= count {
            debug!("Queue exhausted");
            return false;
        }
        info!(index = self.cursor, "Queue advancing to next process");
        if let Err(e) = self.processes[self.cursor].start() {
            warn!(index = self.cursor, error = %e, "Queued process failed to start");
        }
        true
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
