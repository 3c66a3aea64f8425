//! Error types.
//!
//! This module defines [`JitError`] and [`JitResult`] for the handful of
//! outcomes the threader surfaces through a `Result` rather than through the
//! disabled flag or a hook's staging sentinel (see the crate docs for why
//! most failures never reach here).

use std::fmt;

/// Recoverable errors returned by the threader.
///
/// Most of the failure modes a caller runs into are *not* represented here:
/// running out of room in a page propagates silently to `release`/`finish`
/// (the caller just gets `None` back, see [`crate::JitPage::finish`]), and a
/// fatal `mmap` failure disables the whole pool rather than erroring out a
/// single call (see [`crate::Jit::is_disabled`]). Both are deliberate per the
/// staging/commit design: a hook that never gets threaded is supposed to look
/// exactly like "not hot yet" to its reader, not like an exception.
///
/// The one thing left for this enum: [`crate::JitPage::splice`] takes a raw
/// chunk address the caller claims was produced by this same pool. Unlike
/// the other programmer errors this subsystem would otherwise assert on
/// (double-release, an out-of-range `reserve`), that claim is about data
/// arriving at a public API boundary rather than pure API misuse, so it gets
/// a checked `Result` instead of a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitError {
    /// [`crate::JitPage::splice`] was given a chunk whose first bytes don't
    /// match this target's prologue pattern.
    NotAPrologue,
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitError::NotAPrologue => {
                write!(f, "spliced chunk does not begin with this target's function prologue")
            }
        }
    }
}

impl std::error::Error for JitError {}

/// Result type for fallible, non-panicking threader operations.
pub type JitResult<T> = Result<T, JitError>;
