//! Error taxonomy shared by the cassette, matching and process layers.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the record/replay engine.
///
/// None of these are retried internally; replay never falls back to running
/// the real program when matching fails.
#[derive(Debug, thiserror::Error)]
pub enum VcrError {
    /// No unconsumed interaction matches the attempted invocation.
    #[error(
        "no matching interaction for {attempted:?}; unused interactions in cassette: {}",
        format_unused(unused)
    )]
    NoMatchingInteraction {
        /// Command vector that was attempted.
        attempted: Vec<String>,
        /// Command vectors of every interaction not yet replayed.
        unused: Vec<Vec<String>>,
    },

    /// The cassette file does not exist.
    #[error("cassette not found: {}", path.display())]
    CassetteNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The cassette file is unreadable or structurally invalid.
    #[error("cassette {} is corrupt: {reason}", path.display())]
    CassetteCorrupt {
        /// Path of the offending cassette.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The cassette declares a schema version this build cannot read.
    #[error(
        "cassette {} has schema version {found:?}, expected {expected:?}",
        path.display()
    )]
    SchemaVersionMismatch {
        /// Path of the offending cassette.
        path: PathBuf,
        /// Version found in the file.
        found: String,
        /// Version this build writes and reads.
        expected: &'static str,
    },

    /// `wait` gave up before the process reached a terminal state.
    #[error("command {command:?} timed out after {:.3}s", timeout.as_secs_f64())]
    TimeoutExpired {
        /// Command vector of the process being waited on.
        command: Vec<String>,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A control operation outside the supported surface was requested.
    #[error("unsupported process operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A checked run exited with a non-zero returncode.
    #[error("command {command:?} returned non-zero exit status {returncode}")]
    CalledProcessError {
        /// Command vector that was run.
        command: Vec<String>,
        /// Returncode it exited with.
        returncode: i32,
        /// Captured stdout, if any.
        stdout: Option<String>,
        /// Captured stderr, if any.
        stderr: Option<String>,
    },

    /// The real program could not be started.
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        /// Command vector that failed to start.
        command: Vec<String>,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A real process ran but its interaction could not be written to the
    /// cassette.
    #[error("failed to record {command:?} into the cassette: {reason}")]
    CassetteWrite {
        /// Command vector of the recorded process.
        command: Vec<String>,
        /// Why the append failed.
        reason: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem or process-control I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_unused(unused: &[Vec<String>]) -> String {
    if unused.is_empty() {
        return "(none)".to_string();
    }
    unused
        .iter()
        .map(|args| format!("{args:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the crate.
pub type VcrResult<T> = Result<T, VcrError>;
