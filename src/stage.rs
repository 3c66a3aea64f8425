//! Pending hook publications.

use std::sync::atomic::AtomicUsize;

/// A client-owned, word-sized atomic cell that a dispatch loop polls to
/// decide whether a virtual instruction has been threaded yet.
///
/// The cell lives in memory this crate does not own; the caller guarantees
/// it outlives the [`crate::Jit`] pool the hook was registered with. That
/// guarantee, not Rust's borrow checker, is what makes storing a raw pointer
/// here sound — the same contract blink's C API makes explicit by taking a
/// bare `hook_t *`.
pub type Hook = *const AtomicUsize;

/// A chunk of emitted code whose hook has been told the staging sentinel
/// but not yet the real entry address, because the OS page it lives in
/// hasn't been re-protected read-execute yet.
#[derive(Debug)]
pub(crate) struct JitStage {
    pub(crate) hook: Hook,
    /// In-page byte offset of the function's first instruction.
    pub(crate) start: usize,
    /// In-page byte offset immediately past the function's last byte.
    pub(crate) index: usize,
}
