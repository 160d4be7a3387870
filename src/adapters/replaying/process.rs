//! Simulated process replaying one recorded interaction.
//!
//! Nothing is executed. The process runs for the recorded duration (capped)
//! and then completes with the recorded returncode, unless it is terminated
//! or killed first.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::timer::{CompletionScheduler, Deadline};
use crate::cassette::format::Interaction;
use crate::error::{VcrError, VcrResult};
use crate::ports::process::{ProcessHandle, SIGKILL};

/// Default ceiling on how long a replayed process may take.
pub const DEFAULT_MAX_REPLAY_DURATION: Duration = Duration::from_secs(300);

/// Lifecycle phase of a simulated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, not started.
    Pending,
    /// Waiting for its recorded duration to elapse.
    Running,
    /// Finished with the recorded returncode.
    Completed,
    /// Stopped by a non-`SIGKILL` signal.
    Terminated,
    /// Stopped by `SIGKILL`.
    Killed,
}

impl Phase {
    /// Whether no further transition can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Killed)
    }
}

/// How replayed processes reproduce recorded timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayTiming {
    /// Run for the recorded duration instead of completing immediately.
    pub preserve: bool,
    /// Upper bound on any single replayed duration.
    pub max_duration: Duration,
}

impl Default for ReplayTiming {
    fn default() -> Self {
        Self {
            preserve: true,
            max_duration: DEFAULT_MAX_REPLAY_DURATION,
        }
    }
}

impl ReplayTiming {
    /// Completes every replayed process immediately.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            preserve: false,
            ..Self::default()
        }
    }

    fn runtime_of(&self, interaction: &Interaction) -> Duration {
        if !self.preserve {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(interaction.duration)
            .unwrap_or(Duration::ZERO)
            .min(self.max_duration)
    }
}

#[derive(Debug)]
struct State {
    phase: Phase,
    returncode: Option<i32>,
}

struct Shared {
    interaction: Arc<Interaction>,
    deadline: Option<Instant>,
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut State, phase: Phase, returncode: i32) {
        if state.phase.is_terminal() {
            return;
        }
        tracing::trace!(
            command = ?self.interaction.args,
            ?phase,
            returncode,
            "simulated process finished"
        );
        state.phase = phase;
        state.returncode = Some(returncode);
        self.changed.notify_all();
    }

    /// Completes a running process whose deadline has passed. Keeps results
    /// independent of how promptly the timer thread runs.
    fn settle(&self, state: &mut State, now: Instant) {
        if state.phase == Phase::Running && self.deadline.is_none_or(|at| now >= at) {
            self.transition(state, Phase::Completed, self.interaction.returncode);
        }
    }
}

impl Deadline for Shared {
    fn fire(&self) {
        let mut state = self.lock();
        self.settle(&mut state, Instant::now());
    }
}

/// A process handle backed by a recorded interaction.
///
/// Clones share the same underlying process.
#[derive(Clone)]
pub struct SimulatedProcess {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SimulatedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedProcess")
            .field("args", &self.shared.interaction.args)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SimulatedProcess {
    /// Starts replaying `interaction`.
    ///
    /// With timing preserved the process completes after the recorded
    /// duration (capped at `timing.max_duration`); otherwise it is already
    /// complete when this returns.
    #[must_use]
    pub fn start(interaction: Arc<Interaction>, timing: &ReplayTiming) -> Self {
        let started = Instant::now();
        let runtime = timing.runtime_of(&interaction);
        let deadline = (!runtime.is_zero()).then(|| started + runtime);

        let shared = Arc::new(Shared {
            interaction,
            deadline,
            state: Mutex::new(State {
                phase: Phase::Pending,
                returncode: None,
            }),
            changed: Condvar::new(),
        });

        {
            let mut state = shared.lock();
            state.phase = Phase::Running;
            shared.settle(&mut state, started);
        }
        if let Some(at) = deadline {
            let target = Arc::downgrade(&shared);
            CompletionScheduler::global().schedule(at, target);
        }
        Self { shared }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        let mut state = self.shared.lock();
        self.shared.settle(&mut state, Instant::now());
        state.phase
    }

    /// The interaction being replayed.
    #[must_use]
    pub fn interaction(&self) -> &Interaction {
        &self.shared.interaction
    }

    fn output(&self, captured: bool, text: &str) -> Option<String> {
        let available = captured && self.phase().is_terminal();
        available.then(|| text.to_string())
    }
}

impl ProcessHandle for SimulatedProcess {
    fn args(&self) -> &[String] {
        &self.shared.interaction.args
    }

    fn pid(&self) -> u32 {
        self.shared.interaction.pid
    }

    fn returncode(&self) -> Option<i32> {
        self.poll()
    }

    fn poll(&self) -> Option<i32> {
        let mut state = self.shared.lock();
        self.shared.settle(&mut state, Instant::now());
        state.returncode
    }

    fn wait(&self, timeout: Option<Duration>) -> VcrResult<i32> {
        let started = Instant::now();
        let limit = timeout.and_then(|t| started.checked_add(t));
        let mut state = self.shared.lock();
        loop {
            let now = Instant::now();
            self.shared.settle(&mut state, now);
            if let Some(code) = state.returncode {
                return Ok(code);
            }
            if let Some(timeout) = timeout.filter(|_| limit.is_some_and(|l| now >= l)) {
                return Err(VcrError::TimeoutExpired {
                    command: self.shared.interaction.args.clone(),
                    timeout,
                });
            }

            let wake_at = match (self.shared.deadline, limit) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            state = match wake_at {
                Some(at) => {
                    self.shared
                        .changed
                        .wait_timeout(state, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn send_signal(&self, signal: i32) -> VcrResult<()> {
        // Signal 0 only checks for existence.
        match signal {
            0 => return Ok(()),
            s if s < 0 => return Err(VcrError::UnsupportedOperation("negative signal number")),
            _ => {}
        }
        let mut state = self.shared.lock();
        self.shared.settle(&mut state, Instant::now());
        let phase = if signal == SIGKILL {
            Phase::Killed
        } else {
            Phase::Terminated
        };
        self.shared.transition(&mut state, phase, -signal);
        Ok(())
    }

    fn stdout(&self) -> Option<String> {
        let interaction = &self.shared.interaction;
        self.output(interaction.kwargs.stdout.is_captured(), &interaction.stdout)
    }

    fn stderr(&self) -> Option<String> {
        let interaction = &self.shared.interaction;
        self.output(interaction.kwargs.stderr.is_captured(), &interaction.stderr)
    }
}
