//! Throughput of threading a run of calls into a page.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::atomic::AtomicUsize;
use threadjit::Jit;

extern "C" fn noop(x: usize) -> usize {
    x
}

fn bench_append_call(c: &mut Criterion) {
    let jit = Jit::new();
    if jit.is_disabled() {
        eprintln!("skipping: no JIT emitter for this target");
        return;
    }

    let mut group = c.benchmark_group("append_call");

    group.bench_function("single_call_finish_flush", |b| {
        b.iter_batched(
            || jit.start().expect("pool must have room"),
            |mut page| {
                page.call(black_box(noop as usize));
                let hook = AtomicUsize::new(0);
                jit.finish(page, Some(&hook as *const AtomicUsize), 0);
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("sixteen_calls_per_function", |b| {
        b.iter_batched(
            || jit.start().expect("pool must have room"),
            |mut page| {
                for _ in 0..16 {
                    page.call(black_box(noop as usize));
                }
                let hook = AtomicUsize::new(0);
                jit.finish(page, Some(&hook as *const AtomicUsize), 0);
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
    jit.flush();
}

criterion_group!(benches, bench_append_call);
criterion_main!(benches);
