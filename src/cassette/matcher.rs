//! Signature derivation and basename-aware command matching.
//!
//! Path-like arguments (anything containing a path separator) compare by
//! their final component only, so commands built from throwaway temporary
//! directories still match across runs. Every other argument must be
//! byte-for-byte equal. A shell command line is a single opaque argument and
//! is always compared exactly.

use std::fmt;

use super::format::{Interaction, MatchingOptions};

#[cfg(windows)]
const SEPARATORS: &[char] = &['/', '\\'];
#[cfg(not(windows))]
const SEPARATORS: &[char] = &['/'];

/// One element of a command vector in comparable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgForm {
    /// Non-path argument, compared exactly.
    Literal(String),
    /// Path-like argument, compared by basename.
    Path(String),
}

/// The comparable form of an invocation.
///
/// Two signatures are equal exactly when their invocations match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    args: Vec<ArgForm>,
    options: MatchingOptions,
}

impl Signature {
    /// Derives the signature of a command vector and its matching options.
    #[must_use]
    pub fn of<S: AsRef<str>>(args: &[S], options: MatchingOptions) -> Self {
        let args = args
            .iter()
            .map(|arg| {
                let arg = arg.as_ref();
                if !options.shell && is_path_like(arg) {
                    ArgForm::Path(basename(arg).to_string())
                } else {
                    ArgForm::Literal(arg.to_string())
                }
            })
            .collect();
        Self { args, options }
    }

    /// Derives the signature of a recorded interaction.
    #[must_use]
    pub fn of_interaction(interaction: &Interaction) -> Self {
        Self::of(&interaction.args, interaction.kwargs)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .args
            .iter()
            .map(|arg| match arg {
                ArgForm::Literal(s) | ArgForm::Path(s) => s.as_str(),
            })
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// Returns `true` if the argument contains a path separator of the host
/// platform (`/`, plus `\` on Windows).
#[must_use]
pub fn is_path_like(arg: &str) -> bool {
    arg.contains(SEPARATORS)
}

/// Final non-empty path component of `arg`; trailing separators are ignored.
#[must_use]
pub fn basename(arg: &str) -> &str {
    let trimmed = arg.trim_end_matches(SEPARATORS);
    if trimmed.is_empty() {
        return arg;
    }
    trimmed.rsplit(SEPARATORS).next().unwrap_or(trimmed)
}

/// Basename-normalized display form of a command vector. Shell command lines
/// are kept as they are.
#[must_use]
pub fn normalize_args<S: AsRef<str>>(args: &[S], options: MatchingOptions) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if !options.shell && is_path_like(arg) {
                basename(arg).to_string()
            } else {
                arg.to_string()
            }
        })
        .collect()
}

/// Whether two argument vectors (not shell command lines) match under
/// basename-aware comparison. [`Signature`] equality applies the same rule
/// and also covers the matching options.
#[must_use]
pub fn matches<A: AsRef<str>, B: AsRef<str>>(left: &[A], right: &[B]) -> bool {
    left.len() == right.len()
        && left.iter().zip(right).all(|(l, r)| {
            let (l, r) = (l.as_ref(), r.as_ref());
            let both_paths = is_path_like(l) && is_path_like(r);
            l == r || (both_paths && basename(l) == basename(r))
        })
}
