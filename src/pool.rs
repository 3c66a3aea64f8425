//! The process-wide page pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::arch;
use crate::config::JIT_PAGE_SIZE;
use crate::error::JitResult;
use crate::mmap::{self, MapOutcome};
use crate::page::JitPage;
use crate::stage::Hook;

/// Fixed reserve every `start` asks its first page acquisition for: room
/// for a prologue, an epilogue, and a handful of calls, comfortably inside
/// even a pathologically small `JIT_PAGE_SIZE`.
const START_RESERVE: usize = 4096;

struct PoolState {
    /// Pages with free capacity at the front, full pages at the back —
    /// an LRU-ish hint so `acquire` usually finds a home on the first page
    /// it looks at.
    pages: VecDeque<JitPage>,
    /// Next `mmap` placement hint. Zero means "not yet initialized".
    brk: usize,
}

/// Owns every executable page this process has threaded code into.
///
/// Cheap to share: clone an `Arc<Jit>` across threads, or hold a `&Jit` —
/// every method here takes `&self`. The pool mutex only ever guards the page
/// list and the placement cursor; building a function or re-protecting a
/// page happens outside the lock, on a page a builder thread already holds
/// exclusively.
pub struct Jit {
    disabled: AtomicBool,
    state: Mutex<PoolState>,
}

impl Jit {
    /// Creates an empty pool. No memory is mapped until the first
    /// [`Jit::start`].
    ///
    /// On a target this crate has no emitter for, the pool starts already
    /// [`disabled`](Jit::is_disabled) rather than failing: every caller is
    /// required to tolerate `start` returning `None`, so degrading to "never
    /// succeeds" is a silent, safe fallback instead of a construction error.
    pub fn new() -> Self {
        let jit = Jit {
            disabled: AtomicBool::new(false),
            state: Mutex::new(PoolState {
                pages: VecDeque::new(),
                brk: 0,
            }),
        };
        if !arch::SUPPORTED {
            tracing::warn!("no JIT emitter for this target; threading is disabled");
            jit.disabled.store(true, Ordering::Release);
        }
        jit
    }

    /// Sets the terminal disabled flag. Irreversible.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
    }

    /// Whether the pool has stopped handing out new pages, either because
    /// [`Jit::disable`] was called or a fatal `mmap` failure occurred.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Begins a new function: acquires a page and emits its prologue.
    pub fn start(&self) -> Option<JitPage> {
        let mut page = self.acquire(START_RESERVE)?;
        page.open();
        Some(page)
    }

    /// Finishes `page` by appending the epilogue and releasing it. Returns
    /// the entry address of the finished function, or `None` if an earlier
    /// append on this builder overflowed the page.
    pub fn finish(&self, page: JitPage, hook: Option<Hook>, staging: usize) -> Option<usize> {
        let (page, addr) = page.finish(hook, staging);
        self.reinsert(page);
        addr
    }

    /// Finishes `page` by tail-jumping into `chunk` — an address previously
    /// returned by `finish`/`splice` on this same pool — instead of
    /// appending its own epilogue. `chunk: None` behaves exactly like
    /// [`Jit::finish`].
    pub fn splice(
        &self,
        page: JitPage,
        hook: Option<Hook>,
        staging: usize,
        chunk: Option<usize>,
    ) -> JitResult<Option<usize>> {
        let Some(chunk) = chunk else {
            return Ok(self.finish(page, hook, staging));
        };
        match page.splice(hook, staging, chunk) {
            Ok((page, addr)) => {
                self.reinsert(page);
                Ok(addr)
            }
            Err(err) => Err(err),
        }
    }

    /// Discards `page` without publishing anything.
    pub fn abandon(&self, page: JitPage) {
        self.reinsert(page.abandon());
    }

    /// Forces commit of every page holding staged-but-uncommitted code.
    /// Returns the number of hooks published.
    pub fn flush(&self) -> usize {
        let mut count = 0;
        let pagesize = mmap::os_page_size();
        let mut state = self.state.lock();
        'restart: loop {
            for i in 0..state.pages.len() {
                if state.pages[i].start >= JIT_PAGE_SIZE {
                    break;
                }
                if !state.pages[i].staged.is_empty() {
                    let mut page = state.pages.remove(i).unwrap();
                    drop(state);

                    let last_index = page.staged.back().unwrap().index;
                    let boundary = round_up(last_index, pagesize);
                    page.start = boundary;
                    page.index = boundary;
                    count += page.commit();

                    state = self.state.lock();
                    reinsert_locked(&mut state.pages, page);
                    continue 'restart;
                }
            }
            break;
        }
        count
    }

    /// Acquires a page with at least `reserve` bytes free, mapping a fresh
    /// one from the OS if no pooled page has room. Returns `None` if the
    /// pool is disabled or a fatal `mmap` error just disabled it.
    fn acquire(&self, reserve: usize) -> Option<JitPage> {
        debug_assert!(reserve > 0 && reserve <= JIT_PAGE_SIZE);
        if self.is_disabled() {
            return None;
        }

        let mut hint = {
            let mut state = self.state.lock();
            if state.brk == 0 {
                state.brk = round_up(mmap::image_anchor(), JIT_PAGE_SIZE) + 1_048_576;
            }
            if let Some(front) = state.pages.front() {
                if front.index + reserve <= JIT_PAGE_SIZE {
                    return state.pages.pop_front();
                }
            }
            state.brk
        };

        // Mapping a fresh page happens outside the pool lock: builders on
        // other pages, and other threads calling `acquire` concurrently,
        // don't block on what might be a slow syscall.
        loop {
            // SAFETY: `hint` is page-aligned (derived from `round_up` by
            // JIT_PAGE_SIZE) and `JIT_PAGE_SIZE` is a multiple of the OS
            // page size (asserted in `config`).
            match unsafe { mmap::map_rw(hint, JIT_PAGE_SIZE) } {
                MapOutcome::Mapped(addr) => {
                    warn_if_unreachable(addr as usize);
                    let mut state = self.state.lock();
                    state.brk = addr as usize + JIT_PAGE_SIZE;
                    return Some(JitPage::new(addr));
                }
                MapOutcome::Occupied => {
                    hint += JIT_PAGE_SIZE;
                    continue;
                }
                MapOutcome::Failed => {
                    tracing::error!("mmap() failed while growing the JIT page pool");
                    self.disable();
                    return None;
                }
            }
        }
    }

    fn reinsert(&self, page: JitPage) {
        let mut state = self.state.lock();
        reinsert_locked(&mut state.pages, page);
    }
}

impl Default for Jit {
    fn default() -> Self {
        Jit::new()
    }
}

impl Drop for Jit {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        for page in state.pages.drain(..) {
            // SAFETY: the page is being torn down with the pool; the caller
            // is responsible for having no outstanding builders or live
            // hooks pointing at its code by this point.
            unsafe {
                mmap::unmap(page.addr, JIT_PAGE_SIZE);
            }
        }
    }
}

fn reinsert_locked(pages: &mut VecDeque<JitPage>, page: JitPage) {
    if page.index < JIT_PAGE_SIZE {
        pages.push_front(page);
    } else {
        pages.push_back(page);
    }
}

/// `kArmDispMax` in 26-bit ARM branch words, used (even on non-ARM builds,
/// matching the source this was ported from) as the distance past which a
/// fresh page is considered a risky placement relative to the program
/// image.
const ARM_DISP_MAX_BYTES: i64 = ((1i64 << 25) - 1) * 4;

fn warn_if_unreachable(addr: usize) {
    use std::sync::Once;
    static WARNED: Once = Once::new();

    let anchor = mmap::image_anchor() as i64;
    let distance = (addr as i64 - anchor).abs();
    if distance > ARM_DISP_MAX_BYTES / 2 {
        WARNED.call_once(|| {
            tracing::warn!(
                page = format_args!("{addr:#x}"),
                anchor = format_args!("{anchor:#x}"),
                distance,
                "mmap() returned a JIT page far from the program image; \
                 PC-relative branches back into it may not reach"
            );
        });
    }
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}
