//! Record/replay session: the process factory a harness installs.

use std::sync::Arc;

use crate::adapters::live::process::LiveLauncher;
use crate::adapters::recording::process::RecordingProcess;
use crate::adapters::replaying::process::{ReplayTiming, SimulatedProcess};
use crate::cassette::format::Interaction;
use crate::cassette::session::SessionIndex;
use crate::cassette::store::{CassetteStore, InteractionSink};
use crate::config::{Mode, VcrConfig};
use crate::error::{VcrError, VcrResult};
use crate::ports::process::{Invocation, Launcher, ProcessFactory, ProcessHandle};

/// Appends to the store and, once that succeeded, marks the new interaction
/// consumed so it is not replayed again within the same session.
struct SessionSink {
    store: Arc<CassetteStore>,
    index: Arc<SessionIndex>,
}

impl InteractionSink for SessionSink {
    fn append(&self, interaction: Interaction) -> VcrResult<()> {
        self.store.append(interaction.clone())?;
        self.index.push_consumed(Arc::new(interaction));
        Ok(())
    }
}

/// One record/replay session over one cassette.
///
/// Constructors wire the store, the session index and the real launcher
/// according to the [`Mode`].
pub struct Vcr {
    mode: Mode,
    timing: ReplayTiming,
    launcher: Arc<dyn Launcher>,
    store: Option<Arc<CassetteStore>>,
    index: Arc<SessionIndex>,
}

impl std::fmt::Debug for Vcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vcr")
            .field("mode", &self.mode)
            .field("timing", &self.timing)
            .field(
                "cassette",
                &self.store.as_ref().map(|s| s.path().to_path_buf()),
            )
            .finish_non_exhaustive()
    }
}

impl Vcr {
    /// Opens a session that launches real processes with [`LiveLauncher`].
    ///
    /// # Errors
    ///
    /// Returns the cassette load errors: a missing, corrupt or
    /// version-mismatched cassette in replay mode, or a corrupt or
    /// version-mismatched one in record mode.
    pub fn open(config: &VcrConfig) -> VcrResult<Self> {
        Self::with_launcher(config, Arc::new(LiveLauncher))
    }

    /// Opens a session that launches real processes through `launcher`.
    ///
    /// # Errors
    ///
    /// Same as [`Vcr::open`].
    pub fn with_launcher(config: &VcrConfig, launcher: Arc<dyn Launcher>) -> VcrResult<Self> {
        let store = match config.mode {
            Mode::Replay => Some(CassetteStore::load(&config.cassette)?),
            Mode::Record => Some(CassetteStore::open_or_create(&config.cassette)?),
            Mode::Reset => Some(CassetteStore::empty(&config.cassette)),
            Mode::Disable => None,
        };
        let index = match &store {
            Some(store) => SessionIndex::new(&store.interactions()),
            None => SessionIndex::default(),
        };
        tracing::debug!(
            mode = %config.mode,
            cassette = %config.cassette.display(),
            "opened session"
        );

        Ok(Self {
            mode: config.mode,
            timing: config.timing,
            launcher,
            store: store.map(Arc::new),
            index: Arc::new(index),
        })
    }

    /// The active mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The cassette store, unless recording is disabled.
    #[must_use]
    pub fn store(&self) -> Option<&CassetteStore> {
        self.store.as_deref()
    }

    /// Interactions of the loaded cassette that have not been replayed.
    #[must_use]
    pub fn unused_interactions(&self) -> Vec<Arc<Interaction>> {
        self.index.unused()
    }

    fn replay(&self, invocation: &Invocation) -> VcrResult<Box<dyn ProcessHandle>> {
        let interaction = self.index.next(&invocation.signature(), invocation.args())?;
        tracing::debug!(command = ?invocation.args(), "replaying recorded interaction");
        Ok(Box::new(SimulatedProcess::start(interaction, &self.timing)))
    }

    fn record(
        &self,
        invocation: &Invocation,
        store: &Arc<CassetteStore>,
    ) -> VcrResult<Box<dyn ProcessHandle>> {
        let sink = Arc::new(SessionSink {
            store: Arc::clone(store),
            index: Arc::clone(&self.index),
        });
        let process = RecordingProcess::start(invocation, self.launcher.as_ref(), sink)?;
        Ok(Box::new(process))
    }
}

impl ProcessFactory for Vcr {
    fn spawn(&self, invocation: &Invocation) -> VcrResult<Box<dyn ProcessHandle>> {
        match (self.mode, &self.store) {
            (Mode::Replay, _) => self.replay(invocation).inspect_err(|e| {
                tracing::warn!(error = %e, "replay miss");
            }),
            (Mode::Record, Some(store)) => match self.replay(invocation) {
                Err(VcrError::NoMatchingInteraction { .. }) => {
                    tracing::debug!(
                        command = ?invocation.args(),
                        "no recording, running for real"
                    );
                    self.record(invocation, store)
                }
                other => other,
            },
            (Mode::Reset, Some(store)) => self.record(invocation, store),
            (Mode::Disable | Mode::Record | Mode::Reset, _) => {
                let sink = Arc::new(Discard);
                let process = RecordingProcess::start(invocation, self.launcher.as_ref(), sink)?;
                Ok(Box::new(process))
            }
        }
    }
}

/// Sink for [`Mode::Disable`]: real processes run, nothing is kept.
struct Discard;

impl InteractionSink for Discard {
    fn append(&self, _interaction: Interaction) -> VcrResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::format::{MatchingOptions, StdioMode};
    use crate::ports::process::{ChildControl, LaunchedChild};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingLauncher {
        launches: AtomicUsize,
    }

    struct Exited(i32);

    impl ChildControl for Exited {
        fn id(&self) -> u32 {
            99
        }
        fn try_wait(&mut self) -> std::io::Result<Option<i32>> {
            Ok(Some(self.0))
        }
        fn signal(&mut self, _signal: i32) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Launcher for CountingLauncher {
        fn launch(&self, invocation: &Invocation) -> VcrResult<LaunchedChild> {
            let n = self.launches.fetch_add(1, Ordering::SeqCst);
            let stdout = invocation.options().stdout.is_captured().then(|| {
                Box::new(std::io::Cursor::new(format!("live {n}\n").into_bytes()))
                    as Box<dyn std::io::Read + Send>
            });
            Ok(LaunchedChild {
                control: Box::new(Exited(0)),
                stdout,
                stderr: None,
            })
        }
    }

    fn launcher() -> Arc<CountingLauncher> {
        Arc::new(CountingLauncher {
            launches: AtomicUsize::new(0),
        })
    }

    fn recorded(args: &[&str], stdout: &str) -> Interaction {
        Interaction {
            args: args.iter().map(ToString::to_string).collect(),
            normalized_args: Vec::new(),
            kwargs: MatchingOptions {
                stdout: StdioMode::Pipe,
                ..MatchingOptions::default()
            },
            stdout: stdout.into(),
            stderr: String::new(),
            returncode: 0,
            duration: 0.0,
            pid: 1,
        }
    }

    fn session(mode: Mode, path: &std::path::Path, live: Arc<CountingLauncher>) -> Vcr {
        Vcr::with_launcher(&VcrConfig::new(mode, path), live).unwrap()
    }

    fn seed(path: &std::path::Path, interactions: Vec<Interaction>) {
        let store = CassetteStore::empty(path);
        for interaction in interactions {
            store.append(interaction).unwrap();
        }
    }

    #[test]
    fn replay_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        seed(&path, vec![recorded(&["git", "status"], "clean\n")]);

        let live = launcher();
        let vcr = session(Mode::Replay, &path, live.clone());
        let invocation = Invocation::new(["git", "status"]).stdout(StdioMode::Pipe);
        let done = vcr.run(&invocation, None).unwrap();
        assert_eq!(done.stdout.as_deref(), Some("clean\n"));

        let err = vcr.spawn(&invocation).err().unwrap();
        assert!(matches!(err, VcrError::NoMatchingInteraction { .. }));
        assert_eq!(live.launches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replay_requires_an_existing_cassette() {
        let dir = tempfile::tempdir().unwrap();
        let config = VcrConfig::new(Mode::Replay, dir.path().join("none.yaml"));
        let err = Vcr::with_launcher(&config, launcher()).unwrap_err();
        assert!(matches!(err, VcrError::CassetteNotFound { .. }));
    }

    #[test]
    fn record_mode_replays_known_and_records_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        seed(&path, vec![recorded(&["git", "status"], "clean\n")]);

        let live = launcher();
        let vcr = session(Mode::Record, &path, live.clone());
        let status = Invocation::new(["git", "status"]).stdout(StdioMode::Pipe);

        let first = vcr.run(&status, None).unwrap();
        assert_eq!(first.stdout.as_deref(), Some("clean\n"));
        let second = vcr.run(&status, None).unwrap();
        assert_eq!(second.stdout.as_deref(), Some("live 0\n"));
        assert_eq!(live.launches.load(Ordering::SeqCst), 1);

        let stored = CassetteStore::load(&path).unwrap().interactions();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].stdout, "live 0\n");
        assert!(vcr.unused_interactions().is_empty());
    }

    #[test]
    fn reset_mode_discards_previous_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        let previous = vec![recorded(&["old"], ""), recorded(&["older"], "")];
        seed(&path, previous);

        let vcr = session(Mode::Reset, &path, launcher());
        vcr.run(&Invocation::new(["new"]), None).unwrap();

        let stored = CassetteStore::load(&path).unwrap().interactions();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].args, ["new"]);
    }

    #[test]
    fn disable_mode_runs_for_real_without_a_cassette() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.yaml");
        let live = launcher();
        let vcr = session(Mode::Disable, &path, live.clone());

        vcr.run(&Invocation::new(["ls"]), None).unwrap();
        assert_eq!(live.launches.load(Ordering::SeqCst), 1);
        assert!(vcr.store().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn unwritable_cassette_fails_the_recorded_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let path = blocker.join("c.yaml");

        let vcr = session(Mode::Reset, &path, launcher());
        let err = vcr.run(&Invocation::new(["true"]), None).unwrap_err();
        assert!(matches!(err, VcrError::CassetteWrite { .. }), "{err:?}");
        assert!(vcr.store().is_some_and(CassetteStore::is_empty));
        assert!(!path.exists());
    }

    #[test]
    fn shell_commands_sharing_a_basename_do_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        let mut read = recorded(&["cat /etc/passwd"], "root:x:0:0\n");
        read.kwargs = MatchingOptions {
            stdout: StdioMode::Pipe,
            stderr: StdioMode::Stdout,
            shell: true,
        };
        seed(&path, vec![read]);

        let vcr = session(Mode::Replay, &path, launcher());
        let err = vcr.status_output("rm -rf /home/passwd").unwrap_err();
        assert!(matches!(err, VcrError::NoMatchingInteraction { .. }));
        assert_eq!(
            vcr.status_output("cat /etc/passwd").unwrap(),
            (0, "root:x:0:0".to_string())
        );
    }

    #[test]
    fn run_kills_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        let mut slow = recorded(&["sleep", "5"], "");
        slow.duration = 5.0;
        seed(&path, vec![slow]);

        let vcr = session(Mode::Replay, &path, launcher());
        let invocation = Invocation::new(["sleep", "5"]).stdout(StdioMode::Pipe);
        let timeout = Some(Duration::from_millis(20));
        let err = vcr.run(&invocation, timeout).unwrap_err();
        assert!(matches!(err, VcrError::TimeoutExpired { .. }));
    }

    #[test]
    fn run_checked_reports_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        let mut failing = recorded(&["false"], "");
        failing.returncode = 1;
        seed(&path, vec![failing]);

        let vcr = session(Mode::Replay, &path, launcher());
        let invocation = Invocation::new(["false"]).stdout(StdioMode::Pipe);
        let err = vcr.run_checked(&invocation, None).unwrap_err();
        assert!(matches!(
            err,
            VcrError::CalledProcessError { returncode: 1, .. }
        ));
    }
}
