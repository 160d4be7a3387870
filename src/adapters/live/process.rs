//! Live launcher using `std::process::Command`.

use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::cassette::format::StdioMode;
use crate::error::{VcrError, VcrResult};
use crate::ports::process::{ChildControl, Invocation, LaunchedChild, Launcher};

/// Starts real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveLauncher;

impl Launcher for LiveLauncher {
    fn launch(&self, invocation: &Invocation) -> VcrResult<LaunchedChild> {
        let spawn_error = |source: io::Error| VcrError::Spawn {
            command: invocation.args().to_vec(),
            source,
        };

        let Some((program, rest)) = invocation.args().split_first() else {
            let empty = io::Error::new(io::ErrorKind::InvalidInput, "empty command");
            return Err(spawn_error(empty));
        };
        let mut command = if invocation.options().shell {
            let mut command = Command::new("sh");
            command.arg("-c").arg(program);
            command
        } else {
            let mut command = Command::new(program);
            command.args(rest);
            command
        };
        if let Some(dir) = invocation.cwd() {
            command.current_dir(dir);
        }
        command.envs(invocation.envs().iter().map(|(k, v)| (k, v)));
        command.stdin(Stdio::null());

        let options = invocation.options();
        let mut merged_reader = None;
        if options.stdout == StdioMode::Pipe && options.stderr == StdioMode::Stdout {
            let (reader, writer) = io::pipe().map_err(spawn_error)?;
            command.stdout(writer.try_clone().map_err(spawn_error)?);
            command.stderr(writer);
            merged_reader = Some(reader);
        } else {
            command.stdout(stdio_for(options.stdout));
            command.stderr(stdio_for(options.stderr));
        }

        let mut child = command.spawn().map_err(spawn_error)?;
        // Release the parent's copies of the merged pipe so readers see EOF.
        drop(command);

        let stdout: Option<Box<dyn io::Read + Send>> = match merged_reader {
            Some(reader) => Some(Box::new(reader)),
            None => child.stdout.take().map(boxed_reader),
        };
        let stderr = child.stderr.take().map(boxed_reader);
        tracing::debug!(command = ?invocation.args(), pid = child.id(), "spawned process");

        Ok(LaunchedChild {
            control: Box::new(LiveChild(child)),
            stdout,
            stderr,
        })
    }
}

fn boxed_reader(pipe: impl io::Read + Send + 'static) -> Box<dyn io::Read + Send> {
    Box::new(pipe)
}

fn stdio_for(mode: StdioMode) -> Stdio {
    match mode {
        StdioMode::Pipe => Stdio::piped(),
        StdioMode::Null => Stdio::null(),
        StdioMode::Inherit | StdioMode::Stdout => Stdio::inherit(),
    }
}

struct LiveChild(Child);

impl ChildControl for LiveChild {
    fn id(&self) -> u32 {
        self.0.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(exit_code))
    }

    fn signal(&mut self, signal: i32) -> io::Result<()> {
        send_signal(&mut self.0, signal)
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn send_signal(child: &mut Child, signal: i32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: `kill` has no memory-safety preconditions. Callers signal only
    // children they have not yet seen exit.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: i32) -> io::Result<()> {
    child.kill()
}
