use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use flowgraph::{
    BlockingQueuePair, ExecutionMode, Result, Session, SessionConfig, Tensor, TensorView,
    TensorViewMut,
};

fn identity() -> impl Fn(&[TensorView<'_>], &mut [TensorViewMut<'_>]) -> Result<()> + Send + Sync {
    |inputs, outputs| {
        outputs[0].as_f32_mut()?.copy_from_slice(inputs[0].as_f32()?);
        Ok(())
    }
}

fn random_tensor(len: usize) -> Tensor {
    let mut rng = StdRng::seed_from_u64(42);
    let values: Vec<f32> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Tensor::from_f32(&[len], &values).expect("tensor allocation")
}

fn bench_queue_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_pair");
    for len in [16usize, 1024, 65536] {
        let pair = BlockingQueuePair::new("producer", "consumer", &vec![len], 2)
            .expect("queue pair allocation");
        let input = random_tensor(len);
        let mut output = Tensor::new(&[len]).expect("tensor allocation");

        group.bench_with_input(BenchmarkId::new("roundtrip", len), &len, |b, _| {
            b.iter(|| {
                pair.enqueue(&input.view()).expect("enqueue");
                pair.dequeue(&mut output.view_mut()).expect("dequeue");
            })
        });
    }
    group.finish();
}

fn bench_linear_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_pipeline");
    for len in [16usize, 4096] {
        let session = Session::new(
            "bench",
            SessionConfig {
                mode: ExecutionMode::Parallel,
                num_thread: 3,
            },
        );
        let shape = vec![len];
        for (gid, name) in ["a", "b", "c"].into_iter().enumerate() {
            session
                .create_node(name, identity(), vec![shape.clone()], vec![shape.clone()], gid)
                .expect("node registration");
        }
        session.build_graph(&[("a", "b"), ("b", "c")]).expect("build");
        session.start().expect("start");

        let input = random_tensor(len);
        let mut output = Tensor::new(&[len]).expect("tensor allocation");

        group.bench_with_input(BenchmarkId::new("feed_to_result", len), &len, |b, _| {
            b.iter(|| {
                session.feed(&input.view()).expect("feed");
                session.get_result(&mut output.view_mut()).expect("result");
            })
        });

        session.stop().expect("stop");
    }
    group.finish();
}

criterion_group!(benches, bench_queue_pair, bench_linear_pipeline);
criterion_main!(benches);
