//! The per-page cooperative builder.

use std::collections::VecDeque;

use crate::arch;
use crate::config::{JIT_PAGE_ALIGN, JIT_PAGE_FIT, JIT_PAGE_SIZE};
use crate::error::{JitError, JitResult};
use crate::stage::{Hook, JitStage};

/// Sentinel written to `index` once an append has overflowed the page.
/// One past `JIT_PAGE_SIZE` so every subsequent `append` also fails, and so
/// [`JitPage::remaining`] saturates to zero instead of going negative.
const POISONED: usize = JIT_PAGE_SIZE + 1;

/// A single function under construction, backed by one OS-mapped page.
///
/// Exactly one thread owns a `JitPage` at a time: it is handed out by
/// [`crate::Jit::start`] and consumed again by [`crate::Jit::finish`],
/// [`crate::Jit::splice`], or [`crate::Jit::abandon`]. None of those
/// methods take the page by reference and leave it behind — they consume
/// it, so a page can't accidentally be used after it's been handed back to
/// the pool.
pub struct JitPage {
    pub(crate) addr: *mut u8,
    /// Bytes at the front of the page already re-protected read-execute.
    pub(crate) committed: usize,
    /// Start of the chunk currently being assembled.
    pub(crate) start: usize,
    /// Append cursor; may briefly hold the `POISONED` sentinel.
    pub(crate) index: usize,
    /// One bit per argument register set since the last call/jmp.
    pub(crate) setargs: u8,
    /// Chunks released with a hook but not yet committed, oldest first.
    pub(crate) staged: VecDeque<JitStage>,
}

// SAFETY: a JitPage's mapped memory and fields are only ever touched by the
// single thread that currently owns it (enforced by Jit handing out at most
// one reference to a given page at a time); sending that exclusive ownership
// across a thread boundary is sound.
unsafe impl Send for JitPage {}

impl JitPage {
    pub(crate) fn new(addr: *mut u8) -> Self {
        JitPage {
            addr,
            committed: 0,
            start: 0,
            index: 0,
            setargs: 0,
            staged: VecDeque::new(),
        }
    }

    /// Writes the function prologue, claiming a fresh chunk at `start`.
    pub(crate) fn open(&mut self) {
        debug_assert_eq!(self.start, self.index);
        self.append(arch::PROLOGUE);
    }

    /// Absolute address the next append will land at.
    pub fn pc(&self) -> usize {
        self.addr as usize + self.index
    }

    /// Bytes of room left in the page, or 0 if a previous append overflowed.
    pub fn remaining(&self) -> usize {
        JIT_PAGE_SIZE.saturating_sub(self.index)
    }

    /// Raw byte append. Returns `false` and poisons the builder if `bytes`
    /// doesn't fit; every subsequent operation on this builder then also
    /// fails, safely propagating the error through to `finish`/`splice`.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if self.index > JIT_PAGE_SIZE {
            return false;
        }
        let end = self.index + bytes.len();
        if end > JIT_PAGE_SIZE {
            self.index = POISONED;
            return false;
        }
        // SAFETY: `end <= JIT_PAGE_SIZE` was just checked, and `addr` points
        // at a `JIT_PAGE_SIZE`-byte read-write mapping this page owns
        // exclusively.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.addr.add(self.index), bytes.len());
        }
        self.index = end;
        true
    }

    /// Sets argument `param` (0..=5) to `value` for the next emitted call.
    pub fn set_arg(&mut self, param: u8, value: u64) -> bool {
        assert!(param < 6, "argument index out of range");
        self.setargs |= 1 << param;
        arch::append_set_reg(self, arch::arg_register(param), value)
    }

    /// Emits a raw immediate load into `reg`, bypassing the argument ABI
    /// mapping `set_arg` applies.
    pub fn set_reg(&mut self, reg: u8, value: u64) -> bool {
        arch::append_set_reg(self, reg, value)
    }

    /// Emits a call to `func`, an address of an already-compiled function.
    pub fn call(&mut self, func: usize) -> bool {
        arch::append_call(self, func)
    }

    /// Emits an unconditional branch to `code`.
    pub fn jmp(&mut self, code: usize) -> bool {
        arch::append_jmp(self, code)
    }

    /// Consulted and cleared by the emitter at the start of each call:
    /// `true` means argument zero was never set explicitly for this call
    /// and must be reloaded from the callee-saved sticky register.
    pub(crate) fn reload_arg0_before_call(&mut self) -> bool {
        let reload = self.setargs & 1 == 0;
        self.setargs = 0;
        reload
    }

    /// Closes the current chunk, optionally publishing `staging` into
    /// `hook` and staging the real address for commit. Returns the start
    /// address of the finished chunk, or `None` if an earlier append
    /// overflowed the page.
    ///
    /// Always consumes the builder; the caller has no further use for it
    /// regardless of the outcome. `commit` runs the drained staged entries
    /// through an OS `mprotect` this crate performs itself, so it takes
    /// `&mut self` one last time before the page is handed back wholesale.
    pub(crate) fn release(mut self, hook: Option<Hook>, staging: usize) -> (Self, Option<usize>) {
        debug_assert!(self.index >= self.start);
        debug_assert!(self.start >= self.committed);

        // A chunk never spans release boundaries, so any argument bits set
        // for a call that was never emitted belong to nobody once this
        // chunk closes; clearing here stops them leaking into the next
        // chunk built on a page this pool hands back out.
        self.setargs = 0;

        let addr = if self.index > self.start {
            let result = if self.index <= JIT_PAGE_SIZE {
                let chunk_addr = self.addr as usize + self.start;
                self.index = round_up(self.index, JIT_PAGE_ALIGN);
                if let Some(hook) = hook {
                    publish_staging(hook, staging);
                    self.staged.push_back(JitStage {
                        hook,
                        start: self.start,
                        index: self.index,
                    });
                }
                if self.index + JIT_PAGE_FIT > JIT_PAGE_SIZE {
                    self.index = JIT_PAGE_SIZE;
                }
                Some(chunk_addr)
            } else if self.start != 0 {
                None
            } else {
                warn_page_too_small();
                if let Some(hook) = hook {
                    publish_staging(hook, staging);
                }
                None
            };
            self.start = self.index;
            debug_assert_eq!(self.start, self.index);
            self.commit();
            result
        } else {
            None
        };

        (self, addr)
    }

    /// `release` invoked with the epilogue already appended.
    pub(crate) fn finish(mut self, hook: Option<Hook>, staging: usize) -> (Self, Option<usize>) {
        self.append(arch::EPILOGUE);
        self.release(hook, staging)
    }

    /// Tail-chains into `chunk`, an address previously returned by
    /// `finish`/`splice`, instead of emitting its own epilogue.
    pub(crate) fn splice(
        mut self,
        hook: Option<Hook>,
        staging: usize,
        chunk: usize,
    ) -> JitResult<(Self, Option<usize>)> {
        // SAFETY: the caller guarantees `chunk` is a function address this
        // pool previously returned; reading its prologue-sized prefix to
        // validate it is never unsound, only possibly wrong if that
        // guarantee was violated, which is reported below instead of
        // trusted blindly.
        let observed = unsafe { std::slice::from_raw_parts(chunk as *const u8, arch::PROLOGUE.len()) };
        if observed != arch::PROLOGUE {
            return Err(JitError::NotAPrologue);
        }
        self.jmp(chunk + arch::PROLOGUE.len());
        Ok(self.release(hook, staging))
    }

    /// Discards the in-progress chunk; no bytes become visible.
    pub(crate) fn abandon(mut self) -> Self {
        self.index = self.start;
        self
    }

    /// Re-protects any newly-complete OS pages read-execute and publishes
    /// any staged hooks that now lie entirely within a committed prefix.
    pub(crate) fn commit(&mut self) -> usize {
        let pagesize = crate::mmap::os_page_size();
        debug_assert_eq!(self.start, self.index);
        debug_assert_eq!(self.committed % pagesize, 0);

        let pageoff = round_down(self.start, pagesize);
        let mut count = 0;
        if pageoff > self.committed {
            // SAFETY: `[committed, pageoff)` lies within this page's mapping
            // and nothing else writes to this page while we own it.
            let ok = unsafe {
                crate::mmap::protect_exec(self.addr.add(self.committed), pageoff - self.committed)
            };
            debug_assert!(ok, "mprotect(PROT_READ|PROT_EXEC) failed on a JIT page");

            while let Some(front) = self.staged.front() {
                if front.index <= pageoff {
                    let stage = self.staged.pop_front().unwrap();
                    let entry = self.addr as usize + stage.start;
                    // SAFETY: `hook` is a live atomic cell per the contract
                    // documented on `Hook`.
                    unsafe {
                        (*stage.hook).store(entry, std::sync::atomic::Ordering::Release);
                    }
                    count += 1;
                } else {
                    break;
                }
            }
            self.committed = pageoff;
        }
        count
    }
}

fn publish_staging(hook: Hook, staging: usize) {
    // SAFETY: see `Hook`'s contract; the cell outlives this store.
    unsafe {
        (*hook).store(staging, std::sync::atomic::Ordering::Release);
    }
}

fn warn_page_too_small() {
    use std::sync::Once;
    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        tracing::warn!(
            page_size = JIT_PAGE_SIZE,
            "JIT_PAGE_SIZE is too small to hold a single function; increase it"
        );
    });
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

fn round_down(n: usize, align: usize) -> usize {
    n & !(align - 1)
}
