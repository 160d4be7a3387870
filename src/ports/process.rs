//! Process ports: the control surface every process handle offers and the
//! seams through which processes are created.

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use crate::cassette::format::{MatchingOptions, StdioMode};
use crate::cassette::matcher::Signature;
use crate::error::{VcrError, VcrResult};

/// Signal number delivered by [`ProcessHandle::terminate`].
pub const SIGTERM: i32 = 15;
/// Signal number delivered by [`ProcessHandle::kill`].
pub const SIGKILL: i32 = 9;

/// A request to start a process.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    args: Vec<String>,
    options: MatchingOptions,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl Invocation {
    /// Invocation of a program with arguments; `args[0]` is the program.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            options: MatchingOptions::default(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Invocation of a shell command line.
    pub fn shell(command: impl Into<String>) -> Self {
        let mut invocation = Self::new([command.into()]);
        invocation.options.shell = true;
        invocation
    }

    /// Sets how stdout is wired.
    #[must_use]
    pub fn stdout(mut self, mode: StdioMode) -> Self {
        self.options.stdout = mode;
        self
    }

    /// Sets how stderr is wired.
    #[must_use]
    pub fn stderr(mut self, mode: StdioMode) -> Self {
        self.options.stderr = mode;
        self
    }

    /// Pipes both stdout and stderr.
    #[must_use]
    pub fn capture_output(self) -> Self {
        self.stdout(StdioMode::Pipe).stderr(StdioMode::Pipe)
    }

    /// Working directory for the real process. Not part of matching.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Adds an environment variable for the real process. Not part of matching.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command vector.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The matching-relevant options.
    #[must_use]
    pub fn options(&self) -> MatchingOptions {
        self.options
    }

    /// Working directory override, if any.
    #[must_use]
    pub fn cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }

    /// Extra environment variables.
    #[must_use]
    pub fn envs(&self) -> &[(String, String)] {
        &self.env
    }

    /// Comparable form used to look this invocation up in a cassette.
    #[must_use]
    pub fn signature(&self) -> Signature {
        Signature::of(&self.args, self.options)
    }
}

/// Result of a process run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    /// Command vector that was run.
    pub args: Vec<String>,
    /// Terminal returncode.
    pub returncode: i32,
    /// Captured stdout, when it was piped.
    pub stdout: Option<String>,
    /// Captured stderr, when it was piped.
    pub stderr: Option<String>,
}

/// Control surface shared by real and simulated processes.
///
/// Everything takes `&self`, so one handle can be polled and waited on from
/// several threads at once.
pub trait ProcessHandle: Send + Sync {
    /// Command vector this process was started with.
    fn args(&self) -> &[String];

    /// Process id (informational for simulated processes).
    fn pid(&self) -> u32;

    /// Terminal returncode, or `None` while running.
    fn returncode(&self) -> Option<i32>;

    /// Non-blocking status check; `None` while running.
    fn poll(&self) -> Option<i32>;

    /// Blocks until the process is terminal or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::TimeoutExpired`] when the timeout elapses first.
    fn wait(&self, timeout: Option<Duration>) -> VcrResult<i32>;

    /// Requests termination with `SIGTERM`. No-op once terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    fn terminate(&self) -> VcrResult<()> {
        self.send_signal(SIGTERM)
    }

    /// Forcefully kills the process. No-op once terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    fn kill(&self) -> VcrResult<()> {
        self.send_signal(SIGKILL)
    }

    /// Delivers `signal`. No-op once terminal; signal `0` is a liveness check.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::UnsupportedOperation`] for a negative signal
    /// number, or an error if the signal could not be delivered.
    fn send_signal(&self, signal: i32) -> VcrResult<()>;

    /// Captured stdout; `None` until terminal or when stdout was not piped.
    fn stdout(&self) -> Option<String>;

    /// Captured stderr; `None` until terminal or when stderr was not piped.
    fn stderr(&self) -> Option<String>;

    /// Waits for the process and returns its captured output.
    ///
    /// # Errors
    ///
    /// Feeding stdin is unsupported; otherwise the errors of [`ProcessHandle::wait`].
    fn communicate(
        &self,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> VcrResult<(Option<String>, Option<String>)> {
        if input.is_some() {
            let operation = "communicate with stdin input";
            return Err(VcrError::UnsupportedOperation(operation));
        }
        self.wait(timeout)?;
        Ok((self.stdout(), self.stderr()))
    }

    /// Interactive stdin exchange is not part of the supported surface.
    ///
    /// # Errors
    ///
    /// Always returns [`VcrError::UnsupportedOperation`].
    fn write_stdin(&self, _data: &[u8]) -> VcrResult<()> {
        Err(VcrError::UnsupportedOperation("interactive stdin"))
    }
}

/// Low-level control over a started OS process.
pub trait ChildControl: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Non-blocking exit check. Death by signal is reported as `-signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS status query fails.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Delivers a signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the signal.
    fn signal(&mut self, signal: i32) -> io::Result<()>;
}

/// A started OS process plus whichever output pipes were requested.
pub struct LaunchedChild {
    /// Control over the running process.
    pub control: Box<dyn ChildControl>,
    /// Readable end of the stdout pipe (also carries merged stderr).
    pub stdout: Option<Box<dyn Read + Send>>,
    /// Readable end of the stderr pipe.
    pub stderr: Option<Box<dyn Read + Send>>,
}

/// The real process-creation primitive, injected wherever real processes
/// are needed.
pub trait Launcher: Send + Sync {
    /// Starts the invocation for real.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::Spawn`] if the program cannot be started.
    fn launch(&self, invocation: &Invocation) -> VcrResult<LaunchedChild>;
}

/// The seam through which the harness creates processes.
pub trait ProcessFactory: Send + Sync {
    /// Starts a process for `invocation`.
    ///
    /// # Errors
    ///
    /// Returns an error if no process can be produced (spawn failure, or no
    /// recorded interaction in replay).
    fn spawn(&self, invocation: &Invocation) -> VcrResult<Box<dyn ProcessHandle>>;

    /// Runs `invocation` to completion. On timeout the process is killed and
    /// [`VcrError::TimeoutExpired`] is returned without waiting any further.
    ///
    /// # Errors
    ///
    /// Returns spawn errors, [`VcrError::TimeoutExpired`] and whatever
    /// [`ProcessHandle::wait`] reports.
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> VcrResult<CompletedProcess> {
        let process = self.spawn(invocation)?;
        let returncode = match process.wait(timeout) {
            Ok(code) => code,
            Err(err @ VcrError::TimeoutExpired { .. }) => {
                process.kill()?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        Ok(CompletedProcess {
            args: invocation.args().to_vec(),
            returncode,
            stdout: process.stdout(),
            stderr: process.stderr(),
        })
    }

    /// Like [`ProcessFactory::run`], but a non-zero exit is an error.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::CalledProcessError`] for a non-zero returncode.
    fn run_checked(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> VcrResult<CompletedProcess> {
        let completed = self.run(invocation, timeout)?;
        if completed.returncode != 0 {
            return Err(VcrError::CalledProcessError {
                command: completed.args,
                returncode: completed.returncode,
                stdout: completed.stdout,
                stderr: completed.stderr,
            });
        }
        Ok(completed)
    }

    /// Runs a shell command and returns its combined output without the
    /// trailing newline.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ProcessFactory::run`].
    fn output(&self, command: &str) -> VcrResult<String> {
        self.status_output(command).map(|(_, output)| output)
    }

    /// Runs a shell command and returns its returncode with its combined
    /// output, trailing newline stripped.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ProcessFactory::run`].
    fn status_output(&self, command: &str) -> VcrResult<(i32, String)> {
        let invocation = Invocation::shell(command)
            .stdout(StdioMode::Pipe)
            .stderr(StdioMode::Stdout);
        let completed = self.run(&invocation, None)?;
        let mut output = completed.stdout.unwrap_or_default();
        if output.ends_with('\n') {
            output.pop();
        }
        Ok((completed.returncode, output))
    }
}
