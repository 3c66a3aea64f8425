//! End-to-end exercises of the pool against real executable memory.
//!
//! Every test below actually invokes the machine code the builder emits;
//! none of it is mocked. Tests degrade to a no-op assertion on targets
//! where [`Jit::new`] starts out disabled (the documented stub-backend
//! behavior for ISAs this crate doesn't know how to thread).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use threadjit::Jit;

const SENTINEL: usize = 0;

extern "C" fn add_one(x: usize) -> usize {
    x + 1
}

extern "C" fn add_two(x: usize) -> usize {
    x + 2
}

fn call_usize(entry: usize, arg: usize) -> usize {
    let f: extern "C" fn(usize) -> usize = unsafe { std::mem::transmute(entry) };
    f(arg)
}

#[test]
fn single_call_function() {
    let jit = Jit::new();
    if jit.is_disabled() {
        return;
    }

    let hook = AtomicUsize::new(SENTINEL);
    let mut page = jit.start().expect("fresh pool must yield a page");
    assert!(page.call(add_one as usize));

    let addr = jit.finish(page, Some(&hook as *const AtomicUsize), SENTINEL);
    assert!(addr.is_some(), "finish on an un-overflowed chunk always succeeds");
    assert_eq!(
        hook.load(Ordering::Acquire),
        SENTINEL,
        "hook must read the staging sentinel before the page is committed"
    );

    jit.flush();
    let entry = hook.load(Ordering::Acquire);
    assert_ne!(entry, SENTINEL, "flush must publish the now-committed hook");
    assert_eq!(call_usize(entry, 41), 42);
}

#[test]
fn two_call_with_explicit_argument() {
    let jit = Jit::new();
    if jit.is_disabled() {
        return;
    }

    static B_SEEN: AtomicUsize = AtomicUsize::new(usize::MAX);
    static C_SEEN: AtomicUsize = AtomicUsize::new(usize::MAX);
    extern "C" fn handler_b(arg: usize) -> usize {
        B_SEEN.store(arg, Ordering::SeqCst);
        arg
    }
    extern "C" fn handler_c(arg: usize) -> usize {
        C_SEEN.store(arg, Ordering::SeqCst);
        arg
    }

    let hook = AtomicUsize::new(SENTINEL);
    let mut page = jit.start().unwrap();
    assert!(page.set_arg(0, 0x1234));
    assert!(page.call(handler_b as usize));
    assert!(page.call(handler_c as usize));
    jit.finish(page, Some(&hook as *const AtomicUsize), SENTINEL);
    jit.flush();

    let entry = hook.load(Ordering::Acquire);
    assert_ne!(entry, SENTINEL);
    call_usize(entry, 0x9999);

    assert_eq!(B_SEEN.load(Ordering::SeqCst), 0x1234, "B gets the explicit argument");
    assert_eq!(
        C_SEEN.load(Ordering::SeqCst),
        0x9999,
        "C gets the threaded function's own argument, reloaded from the sticky register"
    );
}

#[test]
fn overflow_recovers_on_a_fresh_page() {
    let jit = Jit::new();
    if jit.is_disabled() {
        return;
    }

    let hook = AtomicUsize::new(SENTINEL);
    let mut page = jit.start().unwrap();
    // Drive the builder past JIT_PAGE_SIZE with oversized raw appends; the
    // exact chunk count doesn't matter, only that it overflows.
    let filler = [0u8; 4096];
    while page.append(&filler) {}

    let addr = jit.finish(page, Some(&hook as *const AtomicUsize), SENTINEL);
    assert!(addr.is_none(), "an overflowed builder must fail to finish");
    assert_eq!(hook.load(Ordering::Acquire), SENTINEL, "hook is untouched by a failed finish");

    // The pool itself must still be healthy afterward.
    let mut page2 = jit.start().expect("overflow on one page must not disable the pool");
    assert!(page2.call(add_one as usize));
    assert!(jit.finish(page2, None, SENTINEL).is_some());
}

#[test]
fn splice_chain_tail_calls_into_existing_function() {
    let jit = Jit::new();
    if jit.is_disabled() {
        return;
    }

    let hook_f2 = AtomicUsize::new(SENTINEL);
    let mut f2 = jit.start().unwrap();
    assert!(f2.call(add_two as usize));
    jit.finish(f2, Some(&hook_f2 as *const AtomicUsize), SENTINEL);
    jit.flush();
    let f2_addr = hook_f2.load(Ordering::Acquire);
    assert_ne!(f2_addr, SENTINEL);

    let hook_f1 = AtomicUsize::new(SENTINEL);
    let mut f1 = jit.start().unwrap();
    assert!(f1.call(add_one as usize));
    let result = jit.splice(f1, Some(&hook_f1 as *const AtomicUsize), SENTINEL, Some(f2_addr));
    assert!(result.unwrap().is_some());
    jit.flush();

    let f1_addr = hook_f1.load(Ordering::Acquire);
    assert_ne!(f1_addr, SENTINEL);
    // F1 adds one, tail-jumps into F2 which adds two: net +3.
    assert_eq!(call_usize(f1_addr, 10), 13);
}

#[test]
fn disable_is_monotonic_and_honored_by_start() {
    let jit = Jit::new();
    jit.disable();
    assert!(jit.is_disabled());
    assert!(jit.start().is_none());
    // Disabling twice is harmless and stays disabled.
    jit.disable();
    assert!(jit.is_disabled());
}

#[test]
fn concurrent_builders_each_produce_callable_functions() {
    let jit = Arc::new(Jit::new());
    if jit.is_disabled() {
        return;
    }

    let hooks: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(SENTINEL))).collect();
    let handles: Vec<_> = hooks
        .iter()
        .cloned()
        .map(|hook| {
            let jit = Arc::clone(&jit);
            std::thread::spawn(move || {
                let mut page = jit.start().expect("pool must serve concurrent builders");
                assert!(page.call(add_one as usize));
                let addr = jit.finish(page, Some(hook.as_ref() as *const AtomicUsize), SENTINEL);
                assert!(addr.is_some());
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    jit.flush();
    for hook in &hooks {
        let entry = hook.load(Ordering::Acquire);
        assert_ne!(entry, SENTINEL);
        assert_eq!(call_usize(entry, 1), 2);
    }
}
