//! A Just-In-Time function threader.
//!
//! This crate assembles small native functions at runtime out of
//! straight-line sequences of calls into handlers that are already part of
//! the running process image. It exists for interpreter-style dispatch
//! loops: rather than re-entering an indirect branch for every virtual
//! instruction, a hot run of instructions can be "threaded" once into a
//! native function, after which the branch predictor sees ordinary direct
//! calls instead of one polymorphic dispatch site.
//!
//! ```text
//!  dispatch loop                  threaded function (x86-64)
//!  ┌──────────────┐               ┌─────────────────────────┐
//!  │ for each op:  │   threads    │ push %rbp; ...           │
//!  │   indirect ──┼──────────────▶│ call handler_a            │
//!  │   branch      │              │ call handler_b            │
//!  └──────────────┘               │ call handler_c            │
//!                                 │ leave; ret                │
//!                                 └─────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::atomic::AtomicUsize;
//! use threadjit::Jit;
//!
//! const NOT_THREADED: usize = 0;
//!
//! extern "C" fn handler_a(arg: usize) -> usize { arg }
//!
//! let jit = Jit::new();
//! let hook = AtomicUsize::new(NOT_THREADED);
//!
//! if let Some(mut page) = jit.start() {
//!     page.call(handler_a as usize);
//!     jit.finish(page, Some(&hook as *const AtomicUsize), NOT_THREADED);
//! }
//!
//! jit.flush();
//! // `hook` now either still reads NOT_THREADED (try again later) or holds
//! // the address of a function the dispatch loop can call directly.
//! ```
//!
//! # Memory model
//!
//! Every page this crate hands out starts read-write and is only ever
//! re-protected read-execute, never the reverse, satisfying platforms that
//! enforce write-xor-execute. A function's entry address is never written
//! into a caller-supplied [`Hook`] cell until the OS page containing it has
//! completed that transition; until then the cell holds a caller-chosen
//! staging sentinel. The transition from sentinel to real address is a
//! single atomic release-store, so a concurrent reader using acquire
//! ordering never observes a partially-written function.
//!
//! # Platform support
//!
//! Code is emitted for 64-bit x86 (System V) and 64-bit ARM (AAPCS64). On
//! any other target, [`Jit::new`] returns a pool that is already
//! [`disabled`](Jit::is_disabled); every operation degrades to its
//! documented failure case and callers are expected to fall back to a
//! non-threaded execution path.

mod arch;
mod config;
mod error;
mod mmap;
mod page;
mod pool;
mod stage;

pub use config::{JIT_PAGE_ALIGN, JIT_PAGE_FIT, JIT_PAGE_SIZE};
pub use error::{JitError, JitResult};
pub use page::JitPage;
pub use pool::Jit;
pub use stage::Hook;
