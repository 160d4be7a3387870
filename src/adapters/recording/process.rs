//! Recording proxy around a real process.

use std::io::Read;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cassette::format::{Interaction, MatchingOptions};
use crate::cassette::matcher::normalize_args;
use crate::cassette::store::InteractionSink;
use crate::error::{VcrError, VcrResult};
use crate::ports::process::{ChildControl, Invocation, Launcher, ProcessHandle, SIGKILL};

/// How often the watcher checks whether the real process has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct Status {
    returncode: Option<i32>,
    exited_at: Option<Instant>,
    stdout: Option<String>,
    stderr: Option<String>,
    captured: bool,
    append_error: Option<String>,
}

struct Shared {
    child: Mutex<Box<dyn ChildControl>>,
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn child(&self) -> MutexGuard<'_, Box<dyn ChildControl>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking exit check against the real child; records the first
    /// observation time.
    fn check_exit(&self) -> std::io::Result<Option<i32>> {
        if let Some(code) = self.status().returncode {
            return Ok(Some(code));
        }
        let polled = self.child().try_wait()?;
        if let Some(code) = polled {
            self.record_exit(code);
        }
        Ok(polled)
    }

    fn record_exit(&self, code: i32) {
        let mut status = self.status();
        if status.returncode.is_none() {
            status.returncode = Some(code);
            status.exited_at = Some(Instant::now());
            self.changed.notify_all();
        }
    }
}

/// A real process whose interaction is appended to a cassette once it ends.
///
/// Control calls go straight to the real child. A watcher thread drains the
/// output pipes, observes the exit and hands exactly one interaction to the
/// sink.
pub struct RecordingProcess {
    args: Vec<String>,
    pid: u32,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RecordingProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingProcess")
            .field("args", &self.args)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl RecordingProcess {
    /// Launches `invocation` through `launcher` and starts capturing it.
    ///
    /// # Errors
    ///
    /// Returns the launcher's error if the process cannot be started, or an
    /// I/O error if the watcher thread cannot be spawned (the child is killed
    /// in that case).
    pub fn start(
        invocation: &Invocation,
        launcher: &dyn Launcher,
        sink: Arc<dyn InteractionSink>,
    ) -> VcrResult<Self> {
        let started = Instant::now();
        let launched = launcher.launch(invocation)?;
        let pid = launched.control.id();
        let shared = Arc::new(Shared {
            child: Mutex::new(launched.control),
            status: Mutex::new(Status::default()),
            changed: Condvar::new(),
        });

        let capture = Capture {
            args: invocation.args().to_vec(),
            options: invocation.options(),
            pid,
            started,
            stdout: launched.stdout.map(drain),
            stderr: launched.stderr.map(drain),
        };
        let watched = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("procvcr-watch-{pid}"))
            .spawn(move || capture.run(&watched, sink.as_ref()));
        if let Err(e) = spawned {
            abandon(&mut **shared.child());
            return Err(e.into());
        }

        Ok(Self {
            args: invocation.args().to_vec(),
            pid,
            shared,
        })
    }

    /// Waits for the capture hand-off of an exited process until `limit`.
    /// Returns `false` if the limit passed first.
    fn await_capture(&self, limit: Option<Instant>) -> bool {
        let mut status = self.shared.status();
        while !status.captured {
            status = match limit {
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        return false;
                    }
                    self.shared
                        .changed
                        .wait_timeout(status, limit - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .changed
                    .wait(status)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        true
    }

    /// Captured outputs; waits for the capture hand-off once the process
    /// has exited.
    fn outputs(&self) -> (Option<String>, Option<String>) {
        if self.shared.status().returncode.is_none() {
            return (None, None);
        }
        self.await_capture(None);
        let status = self.shared.status();
        (status.stdout.clone(), status.stderr.clone())
    }
}

/// Kills and reaps a child nobody will watch.
fn abandon(child: &mut dyn ChildControl) {
    if let Err(e) = child.signal(SIGKILL) {
        tracing::warn!(pid = child.id(), error = %e, "failed to kill unwatched process");
    }
    if let Err(e) = child.try_wait() {
        tracing::warn!(pid = child.id(), error = %e, "failed to reap unwatched process");
    }
}

fn drain(mut pipe: Box<dyn Read + Send>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            tracing::warn!(error = %e, "failed to read process output");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

struct Capture {
    args: Vec<String>,
    options: MatchingOptions,
    pid: u32,
    started: Instant,
    stdout: Option<thread::JoinHandle<String>>,
    stderr: Option<thread::JoinHandle<String>>,
}

impl Capture {
    fn run(self, shared: &Shared, sink: &dyn InteractionSink) {
        let returncode = loop {
            match shared.check_exit() {
                Ok(Some(code)) => break code,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(pid = self.pid, error = %e, "failed to poll real process");
                }
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        };
        let exited_at = shared.status().exited_at.unwrap_or_else(Instant::now);

        let join = |handle: Option<thread::JoinHandle<String>>| {
            handle.map(|h| h.join().unwrap_or_default())
        };
        let stdout = join(self.stdout);
        let stderr = join(self.stderr);

        let interaction = Interaction {
            normalized_args: normalize_args(&self.args, self.options),
            args: self.args,
            kwargs: self.options,
            stdout: stdout.clone().unwrap_or_default(),
            stderr: stderr.clone().unwrap_or_default(),
            returncode,
            duration: exited_at.duration_since(self.started).as_secs_f64(),
            pid: self.pid,
        };
        tracing::info!(
            command = ?interaction.args,
            returncode,
            duration = interaction.duration,
            "recorded interaction"
        );
        let append_error = sink.append(interaction).err().map(|e| {
            tracing::error!(error = %e, "failed to append recorded interaction");
            e.to_string()
        });

        let mut status = shared.status();
        status.stdout = stdout;
        status.stderr = stderr;
        status.append_error = append_error;
        status.captured = true;
        shared.changed.notify_all();
    }
}

impl ProcessHandle for RecordingProcess {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn returncode(&self) -> Option<i32> {
        self.shared.status().returncode
    }

    fn poll(&self) -> Option<i32> {
        match self.shared.check_exit() {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "failed to poll real process");
                None
            }
        }
    }

    /// Waits for the exit and for the capture hand-off. The timeout covers
    /// both, so output pipes held open by a background grandchild cannot
    /// stretch it.
    fn wait(&self, timeout: Option<Duration>) -> VcrResult<i32> {
        let limit = timeout.and_then(|t| Instant::now().checked_add(t));
        let timed_out = || VcrError::TimeoutExpired {
            command: self.args.clone(),
            timeout: timeout.unwrap_or_default(),
        };

        let mut status = self.shared.status();
        let returncode = loop {
            if let Some(code) = status.returncode {
                break code;
            }
            status = match limit {
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        return Err(timed_out());
                    }
                    self.shared
                        .changed
                        .wait_timeout(status, limit - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .changed
                    .wait(status)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        };
        drop(status);

        if !self.await_capture(limit) {
            return Err(timed_out());
        }
        match &self.shared.status().append_error {
            Some(reason) => Err(VcrError::CassetteWrite {
                command: self.args.clone(),
                reason: reason.clone(),
            }),
            None => Ok(returncode),
        }
    }

    fn send_signal(&self, signal: i32) -> VcrResult<()> {
        if signal < 0 {
            return Err(VcrError::UnsupportedOperation("negative signal number"));
        }
        if self.shared.status().returncode.is_some() {
            return Ok(());
        }
        let mut child = self.shared.child();
        // Exit check and signal share the lock, so the pid cannot be reaped
        // in between.
        if let Some(code) = child.try_wait()? {
            drop(child);
            self.shared.record_exit(code);
            return Ok(());
        }
        child.signal(signal)?;
        Ok(())
    }

    fn stdout(&self) -> Option<String> {
        self.outputs().0
    }

    fn stderr(&self) -> Option<String> {
        self.outputs().1
    }
}
