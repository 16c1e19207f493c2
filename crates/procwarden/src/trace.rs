//! Syscall tracing for supervised processes
//!
//! A tracer is itself a supervised process running an strace-style tool
//! attached to the target's pid. It comes up right after the target and is
//! stopped right before the target is signaled, or as soon as the target
//! is observed to have exited on its own, so the trace covers the target's
//! whole observable life and the tracer child never lingers unreaped.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ProcessConfig;
use crate::error::Result;
use crate::supervisor::ManagedProcess;

/// Extra seconds a tracer may outlive its target's timeout, so it never
/// dies before the process it is watching
pub const TRACE_GRACE_SECS: u64 = 5;

/// Attached syscall tracer
#[derive(Debug)]
pub struct Tracer {
    process: Box<ManagedProcess>,
    file: PathBuf,
}

impl Tracer {
    /// Default trace output path for a pid
    pub fn default_file(pid: u32) -> PathBuf {
        env::temp_dir().join(format!("process_{pid}.trace"))
    }

    /// Tracer command line for a pid
    fn command_line(config: &ProcessConfig, pid: u32, file: &Path) -> String {
        let args = config.trace_args.trim();
        if args.is_empty() {
            format!(
                "{} -p {} -v -f -o {}",
                config.trace_program,
                pid,
                file.display()
            )
        } else {
            format!(
                "{} -p {} -v -f {} -o {}",
                config.trace_program,
                pid,
                args,
                file.display()
            )
        }
    }

    /// Attach a tracer to a freshly spawned target
    ///
    /// The tracer inherits nothing from the target's configuration except
    /// the trace settings and the timeout (plus grace); in particular it
    /// never traces itself.
    pub(crate) fn attach(target: &ProcessConfig, pid: u32) -> Result<Self> {
        let file = target
            .trace_file
            .clone()
            .unwrap_or_else(|| Self::default_file(pid));
        let command = Self::command_line(target, pid, &file);
        // Saturating: the target's timeout may itself be Duration::MAX
        let config = ProcessConfig::new(command)
            .timeout(target.timeout.saturating_add(Duration::from_secs(TRACE_GRACE_SECS)));
        let mut process = ManagedProcess::new(config);
        process.start()?;
        debug!(pid = %pid, file = %file.display(), "Tracer attached");
        Ok(Self {
            process: Box::new(process),
            file,
        })
    }

    /// Stop the tracer; best effort, failures are logged
    pub(crate) fn stop(&mut self) {
        if let Err(e) = self.process.stop() {
            warn!(file = %self.file.display(), error = %e, "Tracer did not stop cleanly");
        }
    }

    /// Path of the trace output file
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Pid of the tracer process itself
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Whether the tracer process has ended
    pub fn stopped(&self) -> bool {
        self.process.state().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_lands_in_temp_dir() {
        let file = Tracer::default_file(4242);
        assert!(file.starts_with(env::temp_dir()));
        assert_eq!(
            file.file_name().and_then(|n| n.to_str()),
            Some("process_4242.trace")
        );
    }

    #[test]
    fn test_command_line_layout() {
        let config = ProcessConfig::new("sleep 9");
        let line = Tracer::command_line(&config, 123, Path::new("/tmp/t.trace"));
        assert_eq!(line, "strace -p 123 -v -f -o /tmp/t.trace");
    }

    #[test]
    fn test_command_line_with_extra_args() {
        let config = ProcessConfig::new("sleep 9")
            .trace_program("ltrace")
            .trace_args("-S -tt");
        let line = Tracer::command_line(&config, 7, Path::new("/tmp/t.trace"));
        assert_eq!(line, "ltrace -p 7 -v -f -S -tt -o /tmp/t.trace");
    }
}
