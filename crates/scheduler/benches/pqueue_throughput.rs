use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scheduler::{FnTaskBody, OpStatus, PriorityQueue, Task};

fn build_queue(n: u64) -> PriorityQueue {
    let mut q = PriorityQueue::new();
    for i in 0..n {
        let task = Task::create(Box::new(FnTaskBody::new("bench", || OpStatus::Complete)), i)
            .expect("task id creation should succeed in benchmark sandbox");
        q.enqueue(task);
    }
    q
}

fn bench_enqueue(c: &mut Criterion) {
    c.bench_function("pqueue_enqueue_1000", |b| {
        b.iter(|| {
            let q = build_queue(black_box(1000));
            black_box(q.len());
        })
    });
}

fn bench_dequeue(c: &mut Criterion) {
    c.bench_function("pqueue_dequeue_1000", |b| {
        b.iter_batched(
            || build_queue(1000),
            |mut q| {
                while let Some(task) = q.dequeue() {
                    black_box(task.execution_time());
                }
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_enqueue, bench_dequeue);
criterion_main!(benches);
