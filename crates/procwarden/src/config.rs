//! Process launch and supervision configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use crate::error::{ProcessError, Result};

/// Default wall-clock timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on bytes consumed from an output pipe in one poll
pub const DEFAULT_READ_BUFFER: usize = 65_535;

/// Default stdin write buffer capacity in bytes
pub const DEFAULT_WRITE_BUFFER: usize = 1_024;

/// Default pause between polls in blocking run loops
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Default tracer program
pub const DEFAULT_TRACE_PROGRAM: &str = "strace";

/// How one of the three standard streams is wired at spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeMode {
    /// Connect a pipe whose supervisor-side end is held for reading or
    /// writing
    #[default]
    Piped,
    /// Inherit the supervising process's own stream
    Inherit,
    /// Wire the stream to the null device
    Null,
}

impl PipeMode {
    pub(crate) fn to_stdio(self) -> Stdio {
        match self {
            PipeMode::Piped => Stdio::piped(),
            PipeMode::Inherit => Stdio::inherit(),
            PipeMode::Null => Stdio::null(),
        }
    }
}

/// Wiring for the three standard streams
///
/// Defaults to a fully piped child: stdin writable by the supervisor,
/// stdout and stderr captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipeSpec {
    /// Child stdin; the supervisor holds the write end when piped
    pub stdin: PipeMode,
    /// Child stdout; captured when piped
    pub stdout: PipeMode,
    /// Child stderr; captured when piped
    pub stderr: PipeMode,
}

/// Immutable description of how to launch and supervise one process
///
/// Built once with the chained setters below and handed to
/// [`ManagedProcess::new`](crate::ManagedProcess::new); supervision never
/// mutates it.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Command line, run through `sh -c`
    pub command: String,
    /// Working directory for the child; inherited when `None`
    pub start_dir: Option<PathBuf>,
    /// Environment for the child. `None` inherits the supervisor's
    /// environment; `Some` replaces it wholesale.
    pub env: Option<HashMap<String, String>>,
    /// Standard stream wiring
    pub pipes: PipeSpec,
    /// Wall-clock timeout, enforced while the caller keeps polling
    pub timeout: Duration,
    /// Max bytes consumed from each output pipe per poll
    pub read_buffer: usize,
    /// Stdin write buffer capacity
    pub write_buffer: usize,
    /// Pause between polls in blocking run loops
    pub check_interval: Duration,
    /// Attach a syscall tracer when the process starts
    pub trace: bool,
    /// Tracer program
    pub trace_program: String,
    /// Extra arguments spliced into the tracer command line
    pub trace_args: String,
    /// Tracer output path; derived from the pid when `None`
    pub trace_file: Option<PathBuf>,
    /// Persist captured stdout to this path when the process is stopped
    pub output_file: Option<PathBuf>,
}

impl ProcessConfig {
    /// Create a configuration for a command line with default supervision
    /// settings
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            start_dir: None,
            env: None,
            pipes: PipeSpec::default(),
            timeout: DEFAULT_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
            write_buffer: DEFAULT_WRITE_BUFFER,
            check_interval: DEFAULT_CHECK_INTERVAL,
            trace: false,
            trace_program: DEFAULT_TRACE_PROGRAM.to_string(),
            trace_args: String::new(),
            trace_file: None,
            output_file: None,
        }
    }

    /// Set the working directory
    pub fn start_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.start_dir = Some(dir.into());
        self
    }

    /// Replace the child's environment wholesale
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Add one variable to the replacement environment
    ///
    /// Starts an empty replacement environment on first use; the child then
    /// sees only the variables added this way (or via [`env`](Self::env)).
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the standard stream wiring
    pub fn pipes(mut self, pipes: PipeSpec) -> Self {
        self.pipes = pipes;
        self
    }

    /// Set the wall-clock timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the wall-clock timeout in float seconds
    ///
    /// Negative and `NaN` values collapse to zero, which makes the process
    /// time out at its first poll. Values past what a [`Duration`] can
    /// hold, infinity included, saturate to the maximum instead of
    /// inverting into an instant timeout.
    pub fn timeout_secs(self, secs: f64) -> Self {
        let timeout = Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
            if secs > 0.0 {
                Duration::MAX
            } else {
                Duration::ZERO
            }
        });
        self.timeout(timeout)
    }

    /// Cap the bytes consumed from each output pipe per poll
    pub fn read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer = bytes;
        self
    }

    /// Set the stdin write buffer capacity
    pub fn write_buffer(mut self, bytes: usize) -> Self {
        self.write_buffer = bytes;
        self
    }

    /// Set the pause between polls in blocking run loops
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Attach a syscall tracer when the process starts
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Use a different tracer program
    pub fn trace_program(mut self, program: impl Into<String>) -> Self {
        self.trace_program = program.into();
        self
    }

    /// Splice extra arguments into the tracer command line
    pub fn trace_args(mut self, args: impl Into<String>) -> Self {
        self.trace_args = args.into();
        self
    }

    /// Write trace output to this path instead of the derived default
    pub fn trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_file = Some(path.into());
        self
    }

    /// Persist captured stdout to this path when the process is stopped
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    /// Check that the configuration is launchable
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(ProcessError::InvalidConfig("empty command".to_string()));
        }
        Ok(())
    }
}
