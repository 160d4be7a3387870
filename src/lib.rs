//! Record and replay external process invocations.
//!
//! A [`vcr::Vcr`] is the process factory a test harness installs in place of
//! direct process creation. In record mode real processes run behind a
//! recording proxy and every invocation is appended to a YAML cassette. In
//! replay mode nothing runs: invocations are matched against the cassette
//! (path-like arguments by basename) and served by simulated processes that
//! reproduce the recorded output, returncode and timing.

pub mod adapters;
pub mod cassette;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod ports;
pub mod vcr;

pub use config::{Mode, VcrConfig};
pub use error::{VcrError, VcrResult};
pub use ports::process::{CompletedProcess, Invocation, ProcessFactory, ProcessHandle};
pub use vcr::Vcr;

use clap::Parser;

/// Run the CLI with the provided arguments and return the exit status.
///
/// # Errors
///
/// Returns an error string when argument parsing fails or command execution fails.
pub fn run<I, T>(args: I) -> Result<i32, String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match cli::Cli::try_parse_from(args) {
        Ok(cli) => cli,
        // --help and --version are not failures.
        Err(err) if !err.use_stderr() => {
            print!("{err}");
            return Ok(0);
        }
        Err(err) => return Err(err.to_string()),
    };
    commands::dispatch(&cli.command)
}
