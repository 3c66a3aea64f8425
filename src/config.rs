//! Tunable constants for the page pool and builder.
//!
//! These mirror blink's `kJitPageSize`/`kJitPageAlign`/`kJitPageFit` macros.
//! They're `pub const`s rather than a runtime-configurable struct: nothing in
//! this subsystem is read from a file or environment variable (there's no
//! persisted state per the spec), and the three values are load-bearing
//! invariants (page-size multiples, alignment) rather than knobs a caller
//! should be flipping per deployment.

/// Size in bytes of each executable page the pool hands out. Must be a power
/// of two and a multiple of the OS page size so that `mprotect` boundaries
/// land cleanly; 64 KiB comfortably holds hundreds of threaded functions
/// between commits.
pub const JIT_PAGE_SIZE: usize = 1 << 16;

/// Intra-page alignment applied to the start of every emitted function.
/// 16 bytes satisfies both the x86-64 and AArch64 instruction-fetch-friendly
/// alignments without wasting much space on a typical chunk.
pub const JIT_PAGE_ALIGN: usize = 16;

/// Threshold below which a page is considered "full enough" and retired from
/// the pool on release. Once fewer than this many bytes remain, the
/// remaining space is not worth offering to the next builder: the next
/// function's prologue plus one call already exceeds it on both ISAs.
pub const JIT_PAGE_FIT: usize = 256;

const _: () = {
    assert!(JIT_PAGE_SIZE.is_power_of_two());
    assert!(JIT_PAGE_ALIGN.is_power_of_two());
    assert!(JIT_PAGE_FIT < JIT_PAGE_SIZE);
};
