//! Command dispatch and handlers.

pub mod exec;

use crate::cli::Command;

/// Dispatch a parsed command to its handler and return the exit status.
///
/// # Errors
///
/// Returns an error string if the selected command handler fails.
pub fn dispatch(command: &Command) -> Result<i32, String> {
    match command {
        Command::Exec(args) => exec::run(args),
    }
}
