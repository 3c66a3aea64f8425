//! Degraded emitter for ISAs this crate does not know how to thread.
//!
//! Every operation fails. [`crate::Jit::new`] checks [`super::SUPPORTED`]
//! and starts the pool already disabled on a target compiled with this
//! backend, so none of these functions should actually run in practice —
//! they exist so the rest of the crate compiles uniformly across targets.

use crate::page::JitPage;

pub(crate) const PROLOGUE: &[u8] = &[];
pub(crate) const EPILOGUE: &[u8] = &[];

pub(crate) fn arg_register(param: u8) -> u8 {
    param
}

pub(crate) fn append_set_reg(_page: &mut JitPage, _reg: u8, _value: u64) -> bool {
    false
}

pub(crate) fn append_call(_page: &mut JitPage, _func: usize) -> bool {
    false
}

pub(crate) fn append_jmp(_page: &mut JitPage, _code: usize) -> bool {
    false
}
