//! Priority queue and dependency graph benchmarks.
//!
//! ## Running
//!
//! ```bash
//! cargo bench --package forgequeue-queue
//! ```
//!
//! ## Benchmark groups
//!
//! 1. **queue/enqueue**: `PriorityQueue::enqueue` cost across priority levels
//! 2. **queue/dequeue**: `try_dequeue` under a queue pre-filled at each size
//! 3. **dependency/add_job**: `DependencyGraph::add_job` with a growing fan-in

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use forgequeue_queue::dependency::DependencyGraph;
use forgequeue_queue::job::{JobId, JobStatus, Priority};
use forgequeue_queue::queue::{PriorityQueue, PriorityWeights};

fn filled_queue(size: usize) -> PriorityQueue {
    let queue = PriorityQueue::new(PriorityWeights::default());
    for i in 0..size {
        let priority = match i % 5 {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            3 => Priority::Low,
            _ => Priority::Batch,
        };
        queue.enqueue(JobId::new(), priority).unwrap();
    }
    queue
}

fn benchmark_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/enqueue");

    for priority in [Priority::Critical, Priority::Normal, Priority::Batch] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{priority:?}")),
            &priority,
            |b, priority| {
                let queue = PriorityQueue::new(PriorityWeights::default());
                b.iter(|| {
                    queue.enqueue(JobId::new(), black_box(*priority)).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn benchmark_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/dequeue");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled_queue(size),
                |queue| {
                    black_box(queue.try_dequeue());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn benchmark_add_job(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency/add_job");

    for fan_in in [0, 4, 32] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(fan_in),
            &fan_in,
            |b, &fan_in| {
                b.iter_batched(
                    || {
                        let graph = DependencyGraph::new();
                        let parents: Vec<JobId> = (0..fan_in)
                            .map(|_| {
                                let id = JobId::new();
                                graph
                                    .add_job(id.clone(), Vec::new(), JobStatus::Pending)
                                    .unwrap();
                                id
                            })
                            .collect();
                        (graph, parents)
                    },
                    |(graph, parents)| {
                        graph
                            .add_job(JobId::new(), black_box(parents), JobStatus::Pending)
                            .unwrap();
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_enqueue, benchmark_dequeue, benchmark_add_job);
criterion_main!(benches);
