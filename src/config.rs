//! Record/replay configuration supplied by the harness.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::adapters::replaying::process::{ReplayTiming, DEFAULT_MAX_REPLAY_DURATION};
use crate::error::{VcrError, VcrResult};

/// Environment variable selecting the [`Mode`].
pub const MODE_ENV: &str = "PROCVCR_MODE";
/// Environment variable holding the cassette path.
pub const CASSETTE_ENV: &str = "PROCVCR_CASSETTE";
/// Environment variable toggling replay timing (`0`/`false` to disable).
pub const PRESERVE_TIMING_ENV: &str = "PROCVCR_PRESERVE_TIMING";
/// Environment variable capping replayed durations, in seconds.
pub const MAX_DURATION_ENV: &str = "PROCVCR_MAX_DURATION_SECS";

/// Cassette path used when none is configured.
pub const DEFAULT_CASSETTE: &str = "procvcr.cassette.yaml";

/// How invocations are satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Serve every invocation from the cassette; nothing runs for real.
    #[default]
    Replay,
    /// Replay what matches; run and append anything new.
    Record,
    /// Discard the cassette and record every invocation afresh.
    Reset,
    /// Run everything for real without touching a cassette.
    Disable,
}

impl FromStr for Mode {
    type Err = VcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replay" => Ok(Self::Replay),
            "record" => Ok(Self::Record),
            "reset" => Ok(Self::Reset),
            "disable" | "off" => Ok(Self::Disable),
            other => Err(VcrError::Config(format!(
                "unknown mode {other:?} (expected replay, record, reset or disable)"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Replay => "replay",
            Self::Record => "record",
            Self::Reset => "reset",
            Self::Disable => "disable",
        };
        f.write_str(name)
    }
}

/// Everything needed to open a record/replay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcrConfig {
    /// Record or replay behaviour.
    pub mode: Mode,
    /// Cassette file location.
    pub cassette: PathBuf,
    /// Timing reproduction for replayed processes.
    pub timing: ReplayTiming,
}

impl VcrConfig {
    /// Configuration for `mode` against the cassette at `cassette`, with
    /// default timing.
    pub fn new(mode: Mode, cassette: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            cassette: cassette.into(),
            timing: ReplayTiming::default(),
        }
    }

    /// Reads the configuration from the `PROCVCR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::Config`] if a variable holds an invalid value.
    pub fn from_env() -> VcrResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::Config`] if a variable holds an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VcrResult<Self> {
        let mode = lookup(MODE_ENV)
            .map(|v| v.parse::<Mode>())
            .transpose()?
            .unwrap_or_default();
        let cassette =
            lookup(CASSETTE_ENV).map_or_else(|| PathBuf::from(DEFAULT_CASSETTE), PathBuf::from);
        let preserve = lookup(PRESERVE_TIMING_ENV)
            .map(|v| parse_bool(&v))
            .transpose()?
            .unwrap_or(true);
        let max_duration = lookup(MAX_DURATION_ENV)
            .map(|v| parse_seconds(&v))
            .transpose()?
            .unwrap_or(DEFAULT_MAX_REPLAY_DURATION);

        Ok(Self {
            mode,
            cassette,
            timing: ReplayTiming {
                preserve,
                max_duration,
            },
        })
    }
}

fn parse_bool(value: &str) -> VcrResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(VcrError::Config(format!(
            "{PRESERVE_TIMING_ENV}: not a boolean: {other:?}"
        ))),
    }
}

fn parse_seconds(value: &str) -> VcrResult<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            VcrError::Config(format!("{MAX_DURATION_ENV}: not a duration: {value:?}"))
        })
}
