//! ISA-specific code emitters.
//!
//! The emitter is a closed, compile-time choice between exactly two real
//! backends and one degraded stub — there is no runtime dispatch, matching
//! the spec's instruction that polymorphism here is unnecessary. Each
//! backend exposes the same small surface (`PROLOGUE`/`EPILOGUE` byte
//! patterns plus four `append_*` functions); [`crate::JitPage`] calls into
//! whichever one this build was compiled for.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub(crate) use x86_64::*;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub(crate) use self::aarch64::*;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod stub;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub(crate) use stub::*;

/// True when this build has a real (non-stub) emitter backend.
pub(crate) const SUPPORTED: bool =
    cfg!(target_arch = "x86_64") || cfg!(target_arch = "aarch64");
