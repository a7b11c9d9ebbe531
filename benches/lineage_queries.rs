//! Lineage query benchmark
//!
//! Measures index construction and the three lineage queries over synthetic
//! best-first traces where nodes are regenerated and re-expanded often.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench lineage_queries
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use retrace::identity_index::IdentityIndex;
use retrace::lineage;
use retrace::path_resolver::get_path;
use retrace::trace_event::{Event, Trace, TraceFormat};

/// Synthetic trace over a `width`-wide grid: every step expands a node from
/// one row into the next, revisiting earlier nodes along the way
fn create_bench_trace(steps: usize, width: usize) -> Trace {
    let mut events = vec![Event::new("0", None, "source")];
    for i in 1..steps {
        let id = i % (width * width);
        let parent = (id > 0).then(|| id.saturating_sub(width + i % 3).to_string());
        events.push(
            Event::new(id.to_string(), parent.as_deref(), "expand")
                .with_property("g", i as u64)
                .with_property("h", (steps - i) as u64),
        );
    }
    Trace::new("1.4.0", TraceFormat::Current, events)
}

fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");

    for steps in [1_000, 10_000, 100_000] {
        let trace = create_bench_trace(steps, 64);
        group.bench_with_input(BenchmarkId::from_parameter(steps), &trace, |b, trace| {
            b.iter(|| black_box(IdentityIndex::build(trace)));
        });
    }

    group.finish();
}

fn bench_get_path(c: &mut Criterion) {
    let trace = create_bench_trace(100_000, 64);
    let index = IdentityIndex::build(&trace);
    let last = trace.len() - 1;

    c.bench_function("get_path_last_step", |b| {
        b.iter(|| black_box(get_path(&index, &trace, black_box(last))));
    });
}

fn bench_lineage(c: &mut Criterion) {
    let mut group = c.benchmark_group("lineage");

    for steps in [1_000, 10_000] {
        let trace = create_bench_trace(steps, 16);
        let index = IdentityIndex::build(&trace);
        let middle = steps / 2;

        group.bench_with_input(BenchmarkId::new("precedents", steps), &middle, |b, &step| {
            b.iter(|| black_box(lineage::precedents(&index, &trace, step)));
        });
        group.bench_with_input(BenchmarkId::new("subtree", steps), &middle, |b, &step| {
            b.iter(|| black_box(lineage::subtree(&index, &trace, step)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_index_build, bench_get_path, bench_lineage);
criterion_main!(benches);
