//! Scheduler benchmarks
//!
//! Measures the table-side cost of the hot scheduling paths: a dispatch and
//! preempt round trip, a sleep and wakeup pair, and a promotion sweep over a
//! full table.

use core::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mlfq_api::config::NPROC;
use mlfq_api::{Channel, SchedConfig, Tick};
use mlfq_proc::ProcTable;

/// A table with `n` Ready processes spread over the priority levels
fn populated(n: usize) -> ProcTable {
    let mut table = ProcTable::new(SchedConfig::default());
    for i in 0..n {
        let slot = table.allocate(0).unwrap();
        table.make_runnable(slot);
        let pid = table.proc(slot).pid();
        table.set_priority(pid, (i % 7) as u32).unwrap();
    }
    table
}

fn bench_dispatch_preempt(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_preempt");
    for n in [1, 8, NPROC] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut table = populated(n);
            let mut now: Tick = 0;
            b.iter(|| {
                now += 1;
                if let Some(slot) = table.dispatch(now) {
                    table.preempt(black_box(slot), now);
                }
            });
        });
    }
    group.finish();
}

fn bench_sleep_wakeup(c: &mut Criterion) {
    let mut table = populated(NPROC / 2);
    let chan = Channel::Address(0x1000);
    let mut now: Tick = 0;
    c.bench_function("sleep_wakeup", |b| {
        b.iter(|| {
            now += 1;
            if let Some(slot) = table.dispatch(now) {
                table.block(slot, chan, now);
            }
            black_box(table.wakeup(chan));
        });
    });
}

fn bench_promotion_sweep(c: &mut Criterion) {
    let config = SchedConfig::default().with_promotion_interval(1);
    c.bench_function("promotion_sweep_full_table", |b| {
        b.iter_batched(
            || {
                let mut table = ProcTable::new(config);
                for _ in 0..NPROC {
                    let slot = table.allocate(0).unwrap();
                    table.make_runnable(slot);
                    let pid = table.proc(slot).pid();
                    table.set_priority(pid, 0).unwrap();
                }
                table
            },
            |mut table| black_box(table.promote_if_due(10)),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    dispatch_bench,
    bench_dispatch_preempt,
    bench_sleep_wakeup,
    bench_promotion_sweep
);

criterion_main!(dispatch_bench);
