//! Supervision of a single OS process
//!
//! A [`ManagedProcess`] owns a spawned child and everything observed about
//! it. All supervision is caller-driven: liveness checks, timeout
//! enforcement and output capture happen inside [`poll`](ManagedProcess::poll)
//! and [`running`](ManagedProcess::running) on the calling thread. A
//! process that is never polled is never timed out.

use std::io;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};
use std::{fs, thread};

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::config::ProcessConfig;
use crate::error::{ProcessError, Result};
use crate::output::OutputCollector;
use crate::state::{ProcessState, ProcessStatus, SIGNAL_EXIT_CODE, TIMEOUT_EXIT_CODE};
use crate::trace::Tracer;

/// How long a stop waits for the signaled process to become reapable
const REAP_WINDOW_MS: u64 = 500;

/// Pause between reap attempts inside the stop window
const REAP_POLL_MS: u64 = 10;

/// Round to the two decimal places used for reported execution times
fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

/// One supervised OS process
///
/// Lifecycle: build with [`new`](Self::new), launch with
/// [`start`](Self::start), then keep calling [`running`](Self::running)
/// (or use the blocking [`run`](Self::run) loop) until it reports false.
/// The exit code, captured output and final state stay available
/// afterwards.
#[derive(Debug)]
pub struct ManagedProcess {
    config: ProcessConfig,
    child: Option<Child>,
    output: OutputCollector,
    state: ProcessState,
    status: ProcessStatus,
    started_at: Option<Instant>,
    last_alive: Option<Instant>,
    niceness: i32,
    tracer: Option<Tracer>,
}

impl ManagedProcess {
    /// Wrap a configuration; nothing is spawned yet
    pub fn new(config: ProcessConfig) -> Self {
        let output = OutputCollector::new(config.read_buffer);
        Self {
            config,
            child: None,
            output,
            state: ProcessState::Created,
            status: ProcessStatus::default(),
            started_at: None,
            last_alive: None,
            niceness: 0,
            tracer: None,
        }
    }

    /// Spawn the configured command
    ///
    /// The command line runs through `sh -c`. Stream wiring, working
    /// directory and environment come from the configuration; piped output
    /// ends are switched to non-blocking so later polls never stall.
    /// Attaches the syscall tracer when the configuration asks for one,
    /// then performs an initial poll (normally landing in
    /// [`ProcessState::Running`]).
    ///
    /// Calling `start` again after a successful launch is a no-op. A
    /// failed spawn leaves the process in [`ProcessState::Created`] and
    /// returns [`ProcessError::SpawnFailed`].
    pub fn start(&mut self) -> Result<()> {
        if self.started_at.is_some() || self.state != ProcessState::Created {
            return Ok(());
        }
        self.config.validate()?;

        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.config.command);
        if let Some(dir) = &self.config.start_dir {
            command.current_dir(dir);
        }
        if let Some(env) = &self.config.env {
            command.env_clear();
            command.envs(env);
        }
        command.stdin(self.config.pipes.stdin.to_stdio());
        command.stdout(self.config.pipes.stdout.to_stdio());
        command.stderr(self.config.pipes.stderr.to_stdio());

        debug!(command = %self.config.command, "Spawning process");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = ProcessError::SpawnFailed(e);
                error!(command = %self.config.command, error = %err, "Spawn failed");
                return Err(err);
            }
        };

        let pid = child.id();
        self.output.take_pipes(&mut child, &self.config);
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        self.last_alive = self.started_at;
        self.status.pid = Some(pid);
        self.status.running = true;
        self.state = ProcessState::Started;
        info!(pid = %pid, command = %self.config.command, "Process started");

        if self.config.trace {
            match Tracer::attach(&self.config, pid) {
                Ok(tracer) => self.tracer = Some(tracer),
                Err(e) => warn!(pid = %pid, error = %e, "Tracer failed to attach"),
            }
        }

        self.poll();
        Ok(())
    }

    /// One supervision step: refresh liveness, then service the pipes
    ///
    /// Does nothing before [`start`](Self::start). Never blocks while the
    /// process lives; the first poll that sees it gone performs the
    /// one-shot final output drain.
    pub fn poll(&mut self) {
        if self.started_at.is_none() {
            return;
        }
        self.refresh_status();
        self.output.read_cycle(self.status.running);
    }

    /// Liveness check with timeout enforcement
    ///
    /// Polls first. While the process is alive this refreshes the
    /// last-alive instant and, when the configured timeout is exceeded,
    /// terminates the process and synthesizes the timeout exit status
    /// ([`TIMEOUT_EXIT_CODE`]). Once non-running is observed the answer is
    /// false forever.
    pub fn running(&mut self) -> bool {
        if self.started_at.is_none() {
            return false;
        }
        self.poll();
        if !self.status.running {
            return false;
        }
        self.last_alive = Some(Instant::now());
        if self.elapsed() >= self.config.timeout {
            self.expire();
            return false;
        }
        true
    }

    /// Start the process and poll it to completion
    ///
    /// Blocks the calling thread, sleeping the configured check interval
    /// between polls.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        while self.running() {
            thread::sleep(self.config.check_interval);
        }
        Ok(())
    }

    /// Gracefully stop the process with SIGTERM
    pub fn stop(&mut self) -> Result<()> {
        self.stop_with(Signal::SIGTERM)
    }

    /// Forcefully stop the process with SIGKILL
    pub fn kill(&mut self) -> Result<()> {
        self.stop_with(Signal::SIGKILL)
    }

    /// Stop the process with a chosen signal
    ///
    /// The attached tracer is stopped first, pending output is captured,
    /// the signal is sent, then a short reap window settles the exit. The
    /// one-shot drain to EOF runs only once the exit is confirmed inside
    /// that window; a process that outlives the window keeps `None` as
    /// its exit code and has its pipes released without blocking. Signal
    /// delivery failures are logged, not returned; the stop itself
    /// succeeds once the signal was issued. No-op on a process that never
    /// started or already ended.
    pub fn stop_with(&mut self, sig: Signal) -> Result<()> {
        if self.started_at.is_none() || self.state.is_terminal() {
            return Ok(());
        }
        info!(pid = self.status.pid.unwrap_or_default(), signal = %sig, "Stopping process");
        let reaped = self.terminate(sig);
        self.status.running = false;
        if self.status.exit_code.is_none() {
            if let Some(status) = reaped {
                self.status.exit_code = Some(status.code().unwrap_or(SIGNAL_EXIT_CODE));
            }
        }
        self.last_alive = Some(Instant::now());
        self.state = ProcessState::Stopped;
        self.persist_output().map_err(|e| {
            warn!(error = %e, "Could not persist captured output");
            e
        })
    }

    /// Absolute niceness change for the supervised process
    ///
    /// Lowering the niceness of an unprivileged process is typically
    /// denied by the OS; that refusal comes back as
    /// [`ProcessError::PriorityChangeDenied`].
    pub fn renice(&mut self, level: i32) -> Result<()> {
        let Some(pid) = self.status.pid else {
            return Err(ProcessError::NotStarted);
        };
        // SAFETY: setpriority reads no memory; failure is reported via the
        // return value and errno.
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, pid as libc::id_t, level) };
        if rc == -1 {
            let err = ProcessError::PriorityChangeDenied {
                pid,
                reason: io::Error::last_os_error().to_string(),
            };
            warn!(pid = %pid, level, error = %err, "Priority change denied");
            return Err(err);
        }
        debug!(pid = %pid, level, "Priority changed");
        self.niceness = level;
        Ok(())
    }

    /// Relative niceness change, added to the last applied level
    pub fn nice(&mut self, delta: i32) -> Result<()> {
        self.renice(self.niceness + delta)
    }

    /// Write to the child's stdin through the configured write buffer
    pub fn write_stdin(&mut self, data: &[u8]) -> io::Result<usize> {
        self.output.write_stdin(data)
    }

    /// Flush and close the child's stdin, delivering EOF
    pub fn close_stdin(&mut self) -> io::Result<()> {
        self.output.close_stdin()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Refresh and borrow the status snapshot
    pub fn status(&mut self) -> &ProcessStatus {
        self.poll();
        &self.status
    }

    /// OS process id, known once spawned
    pub fn pid(&self) -> Option<u32> {
        self.status.pid
    }

    /// Whether the process was ever launched
    pub fn started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Cached exit code
    ///
    /// `None` while the process still runs (and before it ever started).
    /// Once it ended: the real OS exit code, [`SIGNAL_EXIT_CODE`] for a
    /// signal death, or [`TIMEOUT_EXIT_CODE`] when the supervisor enforced
    /// the deadline. The value is captured once and never changes.
    pub fn exit_code(&mut self) -> Option<i32> {
        if self.running() {
            return None;
        }
        self.status.exit_code
    }

    /// Wall-clock execution time in seconds, rounded to two decimals
    ///
    /// Zero before start. Grows while the process runs; freezes at the
    /// last observation of life once it has ended. Never negative and
    /// never decreasing.
    pub fn execution_time(&self) -> f64 {
        let Some(start) = self.started_at else {
            return 0.0;
        };
        let end = if self.status.running {
            Instant::now()
        } else {
            self.last_alive.unwrap_or(start)
        };
        round2((end - start).as_secs_f64())
    }

    /// Captured stdout bytes so far
    pub fn stdout(&self) -> &[u8] {
        self.output.stdout()
    }

    /// Captured stderr bytes so far
    pub fn stderr(&self) -> &[u8] {
        self.output.stderr()
    }

    /// The attached tracer, if one was requested and came up
    pub fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    /// Contents of the trace output file
    pub fn trace_data(&self) -> Result<Vec<u8>> {
        let Some(tracer) = &self.tracer else {
            return Err(ProcessError::TraceUnavailable);
        };
        fs::read(tracer.file()).map_err(ProcessError::TraceFile)
    }

    /// Last niceness level applied through [`renice`](Self::renice)
    pub fn niceness(&self) -> i32 {
        self.niceness
    }

    /// The configuration this process was built from
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Wall-clock time since start
    fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(start) => start.elapsed(),
            None => Duration::ZERO,
        }
    }

    /// Refresh the status snapshot from the OS
    ///
    /// Skipped entirely once the process is known non-running: the last
    /// observed snapshot is preserved forever, and the exit code is read
    /// from the OS exactly once. The poll that observes the end also
    /// stops and reaps the attached tracer.
    fn refresh_status(&mut self) {
        if !self.status.running {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            let err = ProcessError::HandleLost {
                reason: "child handle missing".to_string(),
            };
            warn!(pid = self.status.pid.unwrap_or_default(), error = %err, "Process went away");
            self.status.running = false;
            self.status.info = err.to_string();
            self.state = ProcessState::Exited;
            self.stop_tracer();
            return;
        };
        let pid = child.id();
        match child.try_wait() {
            Ok(Some(exit)) => {
                self.status.running = false;
                let code = exit.code().unwrap_or(SIGNAL_EXIT_CODE);
                if self.status.exit_code.is_none() {
                    self.status.exit_code = Some(code);
                }
                debug!(pid = %pid, code, "Process exited");
                if self.state.is_active() {
                    self.state = ProcessState::Exited;
                }
                if let Err(e) = self.persist_output() {
                    warn!(pid = %pid, error = %e, "Could not persist captured output");
                }
            }
            Ok(None) => {
                if self.state == ProcessState::Started {
                    debug!(pid = %pid, "Process confirmed running");
                    self.state = ProcessState::Running;
                }
            }
            Err(e) => {
                let err = ProcessError::HandleLost {
                    reason: e.to_string(),
                };
                warn!(pid = %pid, error = %err, "Process went away");
                self.status.running = false;
                self.status.info = err.to_string();
                self.state = ProcessState::Exited;
            }
        }
        if !self.status.running {
            self.stop_tracer();
        }
    }

    /// Timeout path: terminate, then synthesize the timeout exit status
    ///
    /// The synthesized code overrides whatever the OS reported for the
    /// killed process.
    fn expire(&mut self) {
        let elapsed = self.execution_time();
        let err = ProcessError::Timeout { seconds: elapsed };
        warn!(
            pid = self.status.pid.unwrap_or_default(),
            error = %err,
            "Process exceeded its timeout"
        );
        self.terminate(Signal::SIGTERM);
        self.status.running = false;
        self.status.exit_code = Some(TIMEOUT_EXIT_CODE);
        self.status.info = format!("timed out after {elapsed} seconds");
        self.state = ProcessState::TimedOut;
        if let Err(e) = self.persist_output() {
            warn!(error = %e, "Could not persist captured output");
        }
    }

    /// Shared termination machinery for stop, kill and the timeout path
    ///
    /// Ordering: tracer first, pending output, signal, then a bounded reap
    /// window. The blocking drain to EOF runs only once the reap confirms
    /// the exit; a process that survives its signal past the window gets
    /// one last bounded read and its pipes are dropped, so this never
    /// waits on a child that refuses to die. Returns the exit status when
    /// the process could be reaped inside the window.
    fn terminate(&mut self, sig: Signal) -> Option<ExitStatus> {
        self.stop_tracer();
        self.output.read_cycle(true);
        let Some(child) = self.child.as_mut() else {
            self.output.abandon();
            return None;
        };
        let pid = child.id();
        if let Err(errno) = signal::kill(Pid::from_raw(pid as i32), sig) {
            // ESRCH means it beat us to the exit; everything else is logged
            if errno != Errno::ESRCH {
                let err = ProcessError::SignalFailed {
                    pid,
                    reason: errno.to_string(),
                };
                warn!(pid = %pid, error = %err, "Signal delivery failed");
            }
        }
        let deadline = Instant::now() + Duration::from_millis(REAP_WINDOW_MS);
        let reaped = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!(pid = %pid, "Process not reapable after signal");
                        break None;
                    }
                    thread::sleep(Duration::from_millis(REAP_POLL_MS));
                }
                Err(e) => {
                    let err = ProcessError::HandleLost {
                        reason: e.to_string(),
                    };
                    warn!(pid = %pid, error = %err, "Process went away during stop");
                    break None;
                }
            }
        };
        if reaped.is_some() {
            self.output.read_cycle(false);
        } else {
            self.output.abandon();
        }
        reaped
    }

    /// Stop and reap the attached tracer, if any
    fn stop_tracer(&mut self) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.stop();
        }
    }

    /// Write captured stdout to the configured output file, if any
    fn persist_output(&self) -> Result<()> {
        let Some(path) = &self.config.output_file else {
            return Ok(());
        };
        fs::write(path, self.output.stdout()).map_err(ProcessError::OutputFile)?;
        debug!(
            path = %path.display(),
            bytes = self.output.stdout().len(),
            "Captured output persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_run_captures_stdout() {
        let mut process = ManagedProcess::new(ProcessConfig::new("echo hello").timeout_secs(5.0));
        process.run().expect("run failed");
        assert_eq!(process.state(), ProcessState::Exited);
        assert_eq!(process.exit_code(), Some(0));
        assert_eq!(process.stdout(), b"hello\n");
        assert!(process.started());
    }

    #[test]
    fn test_stderr_is_captured_separately() {
        let mut process = ManagedProcess::new(ProcessConfig::new("echo oops >&2").timeout_secs(5.0));
        process.run().expect("run failed");
        assert_eq!(process.exit_code(), Some(0));
        assert!(process.stdout().is_empty());
        assert_eq!(process.stderr(), b"oops\n");
    }

    #[test]
    fn test_timeout_synthesizes_exit_code() {
        let started = Instant::now();
        let mut process = ManagedProcess::new(ProcessConfig::new("sleep 5").timeout_secs(0.2));
        process.run().expect("run failed");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(process.state(), ProcessState::TimedOut);
        assert_eq!(process.exit_code(), Some(TIMEOUT_EXIT_CODE));
        assert!(process.status().info.contains("timed out after"));
    }

    #[test]
    fn test_kill_marks_stopped_and_records_exit() {
        let mut process = ManagedProcess::new(ProcessConfig::new("sleep 5"));
        process.start().expect("start failed");
        assert!(process.running());
        process.kill().expect("kill failed");
        assert_eq!(process.state(), ProcessState::Stopped);
        assert!(!process.running());
        assert!(process.exit_code().is_some());
    }

    #[test]
    fn test_exit_code_none_while_running() {
        let mut process = ManagedProcess::new(ProcessConfig::new("sleep 2"));
        process.start().expect("start failed");
        assert_eq!(process.exit_code(), None);
        process.kill().expect("kill failed");
    }

    #[test]
    fn test_exit_code_cached_across_calls() {
        let mut process = ManagedProcess::new(ProcessConfig::new("exit 7"));
        process.run().expect("run failed");
        let first = process.exit_code();
        assert_eq!(first, Some(7));
        assert_eq!(process.exit_code(), first);
        assert_eq!(process.exit_code(), first);
    }

    #[test]
    fn test_spawn_failure_leaves_created() {
        let mut process = ManagedProcess::new(
            ProcessConfig::new("true").start_dir("/definitely/not/a/real/dir"),
        );
        let outcome = process.start();
        assert!(matches!(outcome, Err(ProcessError::SpawnFailed(_))));
        assert_eq!(process.state(), ProcessState::Created);
        assert!(process.pid().is_none());
        assert!(!process.running());
    }

    #[test]
    fn test_empty_command_is_invalid() {
        let mut process = ManagedProcess::new(ProcessConfig::new("   "));
        assert!(matches!(
            process.start(),
            Err(ProcessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut process = ManagedProcess::new(ProcessConfig::new("echo once"));
        process.run().expect("run failed");
        process.start().expect("second start failed");
        assert_eq!(process.stdout(), b"once\n");
    }

    #[test]
    fn test_repeated_polls_never_grow_output() {
        let mut process = ManagedProcess::new(ProcessConfig::new("echo fixed"));
        process.run().expect("run failed");
        let len = process.stdout().len();
        for _ in 0..5 {
            process.poll();
        }
        assert_eq!(process.stdout().len(), len);
    }

    #[test]
    fn test_execution_time_tracks_wall_clock() {
        let mut process = ManagedProcess::new(ProcessConfig::new("sleep 0.3").timeout_secs(10.0));
        assert_eq!(process.execution_time(), 0.0);
        process.run().expect("run failed");
        let time = process.execution_time();
        assert!(time >= 0.2, "execution time {time} too small");
        assert!(time < 3.0, "execution time {time} too large");
        // Frozen after the end
        assert_eq!(process.execution_time(), time);
    }

    #[test]
    fn test_renice_requires_started_process() {
        let mut process = ManagedProcess::new(ProcessConfig::new("sleep 1"));
        assert!(matches!(process.renice(5), Err(ProcessError::NotStarted)));
    }

    #[test]
    fn test_nice_is_relative_to_last_level() {
        let mut process = ManagedProcess::new(ProcessConfig::new("sleep 2"));
        process.start().expect("start failed");
        // Raising niceness never needs privilege
        process.renice(5).expect("renice failed");
        assert_eq!(process.niceness(), 5);
        process.nice(2).expect("nice failed");
        assert_eq!(process.niceness(), 7);
        process.kill().expect("kill failed");
    }

    #[test]
    fn test_env_replacement() {
        let mut env = HashMap::new();
        env.insert("MARKER".to_string(), "present".to_string());
        let mut process =
            ManagedProcess::new(ProcessConfig::new("echo \"$MARKER:$HOME\"").env(env));
        process.run().expect("run failed");
        // HOME was not inherited, MARKER was injected
        assert_eq!(process.stdout(), b"present:\n");
    }

    #[test]
    fn test_stdin_round_trip() {
        let mut process = ManagedProcess::new(ProcessConfig::new("cat"));
        process.start().expect("start failed");
        process.write_stdin(b"ping\n").expect("write failed");
        process.close_stdin().expect("close failed");
        while process.running() {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(process.stdout(), b"ping\n");
        assert_eq!(process.exit_code(), Some(0));
    }

    #[test]
    fn test_output_persisted_on_exit() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("captured.txt");
        let mut process =
            ManagedProcess::new(ProcessConfig::new("echo saved").output_file(&path));
        process.run().expect("run failed");
        assert_eq!(fs::read(&path).expect("read failed"), b"saved\n");
    }

    #[test]
    fn test_trace_data_without_tracer() {
        let mut process = ManagedProcess::new(ProcessConfig::new("echo x"));
        process.run().expect("run failed");
        assert!(matches!(
            process.trace_data(),
            Err(ProcessError::TraceUnavailable)
        ));
    }

    #[test]
    fn test_huge_timeout_never_fires() {
        let mut process = ManagedProcess::new(ProcessConfig::new("sleep 1").timeout_secs(1e300));
        process.run().expect("run failed");
        assert_eq!(process.state(), ProcessState::Exited);
        assert_eq!(process.exit_code(), Some(0));
    }

    #[test]
    fn test_tracer_is_stopped_when_target_exits_naturally() {
        // Stand-in tracer program that would outlive the target by far;
        // the comment marker swallows the generated strace arguments
        let mut process = ManagedProcess::new(
            ProcessConfig::new("sleep 0.2")
                .timeout_secs(10.0)
                .trace(true)
                .trace_program("sleep 30 #"),
        );
        process.run().expect("run failed");
        assert_eq!(process.state(), ProcessState::Exited);
        let tracer = process.tracer().expect("tracer did not attach");
        assert!(tracer.stopped(), "tracer outlived its target");
    }

    #[test]
    fn test_tracer_attaches_under_a_saturated_timeout() {
        let mut process = ManagedProcess::new(
            ProcessConfig::new("sleep 0.2")
                .timeout_secs(f64::INFINITY)
                .trace(true)
                .trace_program("sleep 30 #"),
        );
        process.run().expect("run failed");
        assert_eq!(process.exit_code(), Some(0));
        let tracer = process.tracer().expect("tracer did not attach");
        assert!(tracer.stopped(), "tracer outlived its target");
    }
}
