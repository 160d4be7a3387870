//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Mode;

/// Top-level CLI parser for `procvcr`.
#[derive(Debug, Parser)]
#[command(
    name = "procvcr",
    version,
    about = "Record and replay external process invocations"
)]
pub struct Cli {
    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one command through the record/replay engine.
    Exec(ExecArgs),
}

/// Arguments of `procvcr exec`.
#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Record/replay mode; defaults to `PROCVCR_MODE`, then `replay`.
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Cassette file; defaults to `PROCVCR_CASSETTE`.
    #[arg(long)]
    pub cassette: Option<PathBuf>,

    /// Complete replayed processes immediately instead of reproducing timing.
    #[arg(long)]
    pub no_timing: bool,

    /// Give up (and kill the process) after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Treat the single argument as a shell command line.
    #[arg(long)]
    pub shell: bool,

    /// The command to run.
    #[arg(required = true, last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use crate::config::Mode;
    use clap::Parser;

    #[test]
    fn parses_exec_with_options() {
        let cli = Cli::parse_from([
            "procvcr", "exec", "--mode", "record", "--cassette", "c.yaml", "--no-timing", "--",
            "docker", "ps", "-a",
        ]);
        let Command::Exec(args) = cli.command;
        assert_eq!(args.mode, Some(Mode::Record));
        let cassette = std::path::Path::new("c.yaml");
        assert_eq!(args.cassette.as_deref(), Some(cassette));
        assert!(args.no_timing);
        assert_eq!(args.command, ["docker", "ps", "-a"]);
    }

    #[test]
    fn exec_requires_a_command() {
        assert!(Cli::try_parse_from(["procvcr", "exec"]).is_err());
    }

    #[test]
    fn rejects_unknown_mode() {
        let parsed = Cli::try_parse_from(["procvcr", "exec", "--mode", "rewind", "--", "ls"]);
        assert!(parsed.is_err());
    }
}
