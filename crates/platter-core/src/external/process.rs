//! Launching helper programs with their output on a pipe
//!
//! A [`HelperProcess`] owns the child and the read end of its stdout pipe.
//! Reading goes through [`std::io::Read`] so the same [`super::LineReader`]
//! serves the blocking library scan and the non-blocking cue exchange.

use super::{ExternalError, ExternalResult};
use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

/// How a helper process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with status 0
    Success,
    /// Non-zero exit or killed by a signal
    Failed(ExitStatus),
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            ExitOutcome::Success
        } else {
            ExitOutcome::Failed(status)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "success"),
            ExitOutcome::Failed(status) => match (status.code(), status.signal()) {
                (Some(code), _) => write!(f, "exit status {}", code),
                (None, Some(signal)) => write!(f, "killed by signal {}", signal),
                (None, None) => write!(f, "{}", status),
            },
        }
    }
}

/// A running helper program and the read end of its stdout
pub struct HelperProcess {
    program: PathBuf,
    child: Child,
    stdout: Option<ChildStdout>,
    reaped: bool,
}

/// Spawn `program` with argv `[arg0, args...]` and a blocking stdout pipe
///
/// On failure nothing is left behind: std closes both ends of the pipe and
/// no child exists.
pub fn spawn<I, S>(program: &Path, arg0: &str, args: I) -> ExternalResult<HelperProcess>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .arg0(arg0)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| ExternalError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ExternalError::NoPipe(program.to_path_buf()));
    };

    log::debug!("Spawned {:?} as pid {}", program, child.id());

    Ok(HelperProcess {
        program: program.to_path_buf(),
        child,
        stdout: Some(stdout),
        reaped: false,
    })
}

/// As [`spawn`], with the pipe switched to non-blocking for use under poll(2)
pub fn spawn_nonblocking<I, S>(program: &Path, arg0: &str, args: I) -> ExternalResult<HelperProcess>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let process = spawn(program, arg0, args)?;
    process.set_nonblocking()?;
    Ok(process)
}

impl HelperProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Descriptor of the output pipe, or `None` once the pipe was closed
    pub fn output_fd(&self) -> Option<RawFd> {
        self.stdout.as_ref().map(|s| s.as_raw_fd())
    }

    /// Put the read end of the pipe into O_NONBLOCK mode
    pub fn set_nonblocking(&self) -> ExternalResult<()> {
        let Some(fd) = self.output_fd() else {
            return Err(ExternalError::NoPipe(self.program.clone()));
        };

        // SAFETY: fd belongs to the ChildStdout owned by self and is open.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags == -1 {
            return Err(ExternalError::NonBlocking(io::Error::last_os_error()));
        }
        // SAFETY: as above; only the status flags are changed.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
            return Err(ExternalError::NonBlocking(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Ask the child to exit with SIGTERM
    ///
    /// Not idempotent in any useful sense; callers track whether they
    /// already asked.
    pub fn terminate(&self) -> ExternalResult<()> {
        log::debug!("Terminating pid {}", self.pid());
        self.signal(libc::SIGTERM)
    }

    /// Force the child down with SIGKILL
    pub fn kill(&mut self) -> ExternalResult<()> {
        log::debug!("Killing pid {}", self.pid());
        let pid = self.pid();
        self.child
            .kill()
            .map_err(|source| ExternalError::Signal { pid, source })
    }

    fn signal(&self, signal: libc::c_int) -> ExternalResult<()> {
        let pid = self.pid();
        // SAFETY: kill(2) has no memory safety requirements. The child is
        // not reaped yet, so the pid cannot have been recycled.
        if unsafe { libc::kill(pid as libc::pid_t, signal) } == -1 {
            return Err(ExternalError::Signal {
                pid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Close the pipe and block until the child has been reaped
    ///
    /// Meant to be called after the pipe reported end of stream, so the
    /// child is already on its way out.
    pub fn wait(&mut self) -> ExternalResult<ExitOutcome> {
        self.stdout = None;

        let pid = self.pid();
        log::debug!("Waiting on pid {}", pid);
        let status = self
            .child
            .wait()
            .map_err(|source| ExternalError::Wait { pid, source })?;
        self.reaped = true;

        log::debug!("Wait for pid {} returned {}", pid, status);
        Ok(ExitOutcome::from_status(status))
    }
}

impl Read for HelperProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }
}

impl fmt::Debug for HelperProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperProcess")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .field("reaped", &self.reaped)
            .finish()
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        log::warn!("Helper {:?} (pid {}) abandoned, killing it", self.program, self.pid());
        self.stdout = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{LineRead, LineReader};

    fn sh() -> &'static Path {
        Path::new("/bin/sh")
    }

    fn read_all(process: &mut HelperProcess) -> Vec<String> {
        let mut reader = LineReader::new();
        let mut lines = Vec::new();
        loop {
            match reader.read_line(process).unwrap() {
                LineRead::Line(line) => lines.push(line),
                LineRead::EndOfStream => return lines,
                LineRead::WouldBlock => std::thread::sleep(std::time::Duration::from_millis(5)),
            }
        }
    }

    #[test]
    fn test_spawn_passes_argv() {
        let mut process = spawn(sh(), "sh", ["-c", "echo \"$0\"; echo \"$1\"", "helper", "LOAD"]).unwrap();
        assert_eq!(read_all(&mut process), vec!["helper", "LOAD"]);
        assert_eq!(process.wait().unwrap(), ExitOutcome::Success);
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let mut process = spawn(sh(), "sh", ["-c", "exit 3"]).unwrap();
        assert!(read_all(&mut process).is_empty());
        let outcome = process.wait().unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.to_string(), "exit status 3");
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let err = spawn(Path::new("/nonexistent/helper"), "helper", ["LOAD"]).unwrap_err();
        assert!(matches!(err, ExternalError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/helper"));
    }

    #[test]
    fn test_nonblocking_pipe_reports_would_block() {
        let mut process = spawn_nonblocking(sh(), "sh", ["-c", "exec sleep 5"]).unwrap();
        let mut reader = LineReader::new();
        assert_eq!(reader.read_line(&mut process).unwrap(), LineRead::WouldBlock);

        process.terminate().unwrap();
        let outcome = process.wait().unwrap();
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_output_fd_closed_after_wait() {
        let mut process = spawn(sh(), "sh", ["-c", "true"]).unwrap();
        assert!(process.output_fd().is_some());
        process.wait().unwrap();
        assert!(process.output_fd().is_none());
    }
}
