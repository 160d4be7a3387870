//! `procvcr exec` command.

use std::io::Write;
use std::time::Duration;

use crate::cli::ExecArgs;
use crate::config::{VcrConfig, CASSETTE_ENV, MODE_ENV, PRESERVE_TIMING_ENV};
use crate::error::VcrResult;
use crate::ports::process::{Invocation, ProcessFactory};
use crate::vcr::Vcr;

/// Execute the `exec` command and return the process exit status.
///
/// Flags override the `PROCVCR_*` environment configuration. Captured output
/// is written to this process's stdout/stderr.
///
/// # Errors
///
/// Returns an error string if configuration, cassette loading, matching or
/// the run itself fails.
pub fn run(args: &ExecArgs) -> Result<i32, String> {
    let config = config_for(args, |key| std::env::var(key).ok())
        .map_err(|e| e.to_string())?;
    let timeout = args
        .timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| format!("invalid --timeout: {e}"))?;

    let invocation = if args.shell {
        Invocation::shell(args.command.join(" "))
    } else {
        Invocation::new(args.command.iter().cloned())
    }
    .capture_output();

    let vcr = Vcr::open(&config).map_err(|e| e.to_string())?;
    let completed = vcr.run(&invocation, timeout).map_err(|e| e.to_string())?;

    let mut out = std::io::stdout().lock();
    out.write_all(completed.stdout.unwrap_or_default().as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| format!("failed to write stdout: {e}"))?;
    let mut err = std::io::stderr().lock();
    err.write_all(completed.stderr.unwrap_or_default().as_bytes())
        .map_err(|e| format!("failed to write stderr: {e}"))?;

    Ok(exit_status(completed.returncode))
}

/// Environment configuration with the flags applied on top. Variables a flag
/// overrides are ignored, so a stale value cannot fail the command.
fn config_for(
    args: &ExecArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> VcrResult<VcrConfig> {
    let overridden = |key: &str| match key {
        MODE_ENV => args.mode.is_some(),
        CASSETTE_ENV => args.cassette.is_some(),
        PRESERVE_TIMING_ENV => args.no_timing,
        _ => false,
    };
    let mut config = VcrConfig::from_lookup(|key| lookup(key).filter(|_| !overridden(key)))?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(cassette) = &args.cassette {
        config.cassette.clone_from(cassette);
    }
    if args.no_timing {
        config.timing.preserve = false;
    }
    Ok(config)
}

/// Shell-style exit status: signal deaths become `128 + signal`.
fn exit_status(returncode: i32) -> i32 {
    if returncode < 0 {
        128 - returncode
    } else {
        returncode
    }
}
