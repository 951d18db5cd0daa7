//! Benchmarks for batch assembly and graph validation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use rtas::core::{Label, TaskUnit};
use rtas::graph::TaskGraph;
use rtas::hierarchy::build_batch;
use rtas::pipeline::{Rtas, TaskDirectives};
use rtas::testing::InMemoryTransport;

fn hosts(count: usize) -> Vec<Rtas> {
    (0..count)
        .map(|i| {
            let host = format!("10.0.{}.{}", i / 250, i % 250 + 1);
            let mut rtas = Rtas::new(host.clone());
            rtas.add_identity("root", Arc::new(InMemoryTransport::new(host, "root")), true);
            rtas
        })
        .collect()
}

fn assemble(hosts: &mut [Rtas]) -> Vec<TaskUnit> {
    let base = [Label::from("base:final")];
    build_batch("deploy", hosts, &base, |rtas| {
        rtas.ship_files(["/etc/app/app.conf", "/etc/app/env"], "/etc/app", TaskDirectives::new())?;
        for step in ["stop", "migrate", "start"] {
            rtas.append_remote_step(step, format!("systemctl {step} app"), TaskDirectives::new())?;
        }
        let mut units = rtas.drain()?;
        for worker in 0..4 {
            rtas.begin_sub(["worker".to_string(), worker.to_string()])?;
            rtas.remote_step([format!("systemctl restart worker@{worker}")], TaskDirectives::new())?;
            units.extend(rtas.drain()?);
        }
        Ok(units)
    })
    .map(|batch| batch.units)
    .unwrap_or_default()
}

fn batch_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    for count in [10_usize, 100, 500] {
        group.bench_with_input(BenchmarkId::new("assemble", count), &count, |b, &count| {
            b.iter_batched(
                || hosts(count),
                |mut hosts| black_box(assemble(&mut hosts)),
                criterion::BatchSize::LargeInput,
            );
        });

        let units = assemble(&mut hosts(count));
        group.bench_with_input(BenchmarkId::new("validate", count), &units, |b, units| {
            b.iter(|| {
                black_box(TaskGraph::with_external(units.clone(), [Label::from("base:final")]))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, batch_benchmark);
criterion_main!(benches);
