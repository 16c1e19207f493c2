//! Output capture for supervised processes
//!
//! While the child lives, reads are non-blocking and bounded so a poll
//! never stalls the calling thread. Once the child is confirmed dead, a
//! single blocking drain collects whatever is left in the pipes; the
//! drain happens at most once per process. A child that outlives its
//! stop signal instead has its pipes scooped without blocking and
//! dropped, since their write ends may never close.

use std::io::{self, BufWriter, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::warn;

use crate::config::{PipeMode, ProcessConfig};

/// Toggle `O_NONBLOCK` on a pipe fd, preserving the other status flags
fn set_nonblocking(fd: RawFd, enabled: bool) -> io::Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.set(OFlag::O_NONBLOCK, enabled);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

/// One bounded read; `WouldBlock` means no data right now
fn read_bounded(pipe: &mut impl Read, into: &mut Vec<u8>, buf: &mut [u8], stream: &str) {
    match pipe.read(buf) {
        Ok(0) => {} // EOF; the final drain confirms and settles it
        Ok(n) => into.extend_from_slice(&buf[..n]),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
        Err(e) => warn!(stream, error = %e, "Pipe read failed"),
    }
}

/// Restore blocking mode and read everything up to EOF
fn drain_pipe<R: Read + AsRawFd>(mut pipe: R, into: &mut Vec<u8>, stream: &str) {
    if let Err(e) = set_nonblocking(pipe.as_raw_fd(), false) {
        warn!(stream, error = %e, "Could not restore blocking reads for drain");
    }
    if let Err(e) = pipe.read_to_end(into) {
        warn!(stream, error = %e, "Final drain failed");
    }
}

/// Captured output and the pipe ends it is read from
///
/// Owns the handles taken out of the [`Child`] so liveness checks and pipe
/// reads never contend for the same borrow.
#[derive(Debug)]
pub(crate) struct OutputCollector {
    stdout_pipe: Option<ChildStdout>,
    stderr_pipe: Option<ChildStderr>,
    stdin_pipe: Option<BufWriter<ChildStdin>>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    // Reused by every bounded read; its length is the per-poll read cap
    scratch: Vec<u8>,
    drained: bool,
}

impl OutputCollector {
    /// Collector with no pipes attached yet
    pub(crate) fn new(read_buffer: usize) -> Self {
        Self {
            stdout_pipe: None,
            stderr_pipe: None,
            stdin_pipe: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            scratch: vec![0u8; read_buffer],
            drained: false,
        }
    }

    /// Take the piped handles out of a freshly spawned child and switch the
    /// output ends to non-blocking
    pub(crate) fn take_pipes(&mut self, child: &mut Child, config: &ProcessConfig) {
        if config.pipes.stdout == PipeMode::Piped {
            self.stdout_pipe = child.stdout.take();
            if let Some(pipe) = &self.stdout_pipe {
                if let Err(e) = set_nonblocking(pipe.as_raw_fd(), true) {
                    warn!(stream = "stdout", error = %e, "Could not enable non-blocking reads");
                }
            }
        }
        if config.pipes.stderr == PipeMode::Piped {
            self.stderr_pipe = child.stderr.take();
            if let Some(pipe) = &self.stderr_pipe {
                if let Err(e) = set_nonblocking(pipe.as_raw_fd(), true) {
                    warn!(stream = "stderr", error = %e, "Could not enable non-blocking reads");
                }
            }
        }
        if config.pipes.stdin == PipeMode::Piped {
            self.stdin_pipe = child
                .stdin
                .take()
                .map(|stdin| BufWriter::with_capacity(config.write_buffer, stdin));
        }
    }

    /// One output servicing step
    ///
    /// With a live child this attempts one bounded non-blocking read per
    /// pipe. Once the child is gone it performs the one-shot blocking drain
    /// instead and every later call becomes a no-op.
    pub(crate) fn read_cycle(&mut self, still_running: bool) {
        if still_running {
            if let Some(pipe) = self.stdout_pipe.as_mut() {
                read_bounded(pipe, &mut self.stdout, &mut self.scratch, "stdout");
            }
            if let Some(pipe) = self.stderr_pipe.as_mut() {
                read_bounded(pipe, &mut self.stderr, &mut self.scratch, "stderr");
            }
        } else {
            self.final_drain();
        }
    }

    /// One-shot blocking drain of both output pipes
    ///
    /// Only called once the child's exit is confirmed; a still-open write
    /// end would block this forever.
    fn final_drain(&mut self) {
        if self.drained {
            return;
        }
        self.drained = true;
        if let Some(pipe) = self.stdout_pipe.take() {
            drain_pipe(pipe, &mut self.stdout, "stdout");
        }
        if let Some(pipe) = self.stderr_pipe.take() {
            drain_pipe(pipe, &mut self.stderr, "stderr");
        }
    }

    /// Scoop what is buffered without blocking, then drop the pipes
    ///
    /// For a child whose exit could not be confirmed after a stop signal:
    /// its write ends may never close, so the blocking drain must not run.
    /// Counts as the one-shot drain; every later cycle is a no-op.
    pub(crate) fn abandon(&mut self) {
        if self.drained {
            return;
        }
        self.read_cycle(true);
        self.drained = true;
        self.stdout_pipe = None;
        self.stderr_pipe = None;
        self.stdin_pipe = None;
    }

    /// Write to the child's stdin through the configured write buffer
    pub(crate) fn write_stdin(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.stdin_pipe.as_mut() {
            Some(pipe) => pipe.write(data),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no writable stdin pipe",
            )),
        }
    }

    /// Flush and close the child's stdin, delivering EOF
    pub(crate) fn close_stdin(&mut self) -> io::Result<()> {
        match self.stdin_pipe.take() {
            Some(mut pipe) => pipe.flush(),
            None => Ok(()),
        }
    }

    /// Captured stdout bytes so far
    pub(crate) fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Captured stderr bytes so far
    pub(crate) fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Whether the one-shot final drain already ran
    #[cfg(test)]
    pub(crate) fn drained(&self) -> bool {
        self.drained
    }
}
