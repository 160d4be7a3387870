//! Cassette data structures for recording and replaying process invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written to, and required from, every cassette file.
pub const SCHEMA_VERSION: &str = "1.0";

/// How one standard stream of an invocation is wired.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    /// Inherit the parent's stream.
    #[default]
    Inherit,
    /// Capture the stream through a pipe.
    Pipe,
    /// Discard the stream.
    Null,
    /// Merge into stdout. Only meaningful for stderr.
    Stdout,
}

impl StdioMode {
    /// Whether output on this stream is captured for the caller.
    #[must_use]
    pub fn is_captured(self) -> bool {
        matches!(self, Self::Pipe)
    }
}

/// The invocation options that take part in matching.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MatchingOptions {
    /// Wiring of stdout.
    #[serde(default)]
    pub stdout: StdioMode,
    /// Wiring of stderr.
    #[serde(default)]
    pub stderr: StdioMode,
    /// Whether the single argument is a shell command line.
    #[serde(default)]
    pub shell: bool,
}

/// A single recorded process invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    /// Command vector as invoked.
    pub args: Vec<String>,
    /// Basename-normalized command vector, for human inspection.
    #[serde(default)]
    pub normalized_args: Vec<String>,
    /// Matching-relevant invocation options.
    #[serde(default)]
    pub kwargs: MatchingOptions,
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
    /// Exit status; negative when the process died from a signal.
    pub returncode: i32,
    /// Wall-clock duration in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Process id at recording time. Informational only.
    #[serde(default)]
    pub pid: u32,
}

/// An ordered, versioned log of recorded interactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cassette {
    /// Schema version of this file.
    pub version: String,
    /// When this cassette was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
    /// Ordered list of interactions.
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl Default for Cassette {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            recorded_at: None,
            interactions: Vec::new(),
        }
    }
}
