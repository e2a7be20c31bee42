use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use textroom::protocol::{Envelope, OperationPayload};
use textroom::transform::{apply, compose, transform, Operation};
use textroom::{Coordinator, UserColor};

fn bench_transform_single(c: &mut Criterion) {
    let a = Operation::insert(40, "hello", "alice");
    let b = Operation::delete(10, 25, "bob");

    c.bench_function("transform_insert_vs_delete", |bench| {
        bench.iter(|| {
            black_box(transform(black_box(&a), black_box(&b)));
        })
    });
}

fn bench_transform_against_history_100(c: &mut Criterion) {
    // A stale client rebasing against 100 newer operations.
    let history: Vec<Operation> = (0..100)
        .map(|i| Operation::insert(i, "x", "alice"))
        .collect();
    let incoming = Operation::insert(50, "hello", "bob");

    c.bench_function("transform_against_100_ops", |bench| {
        bench.iter(|| {
            let rebased = history
                .iter()
                .fold(incoming.clone(), |acc, prior| transform(&acc, prior));
            black_box(rebased);
        })
    });
}

fn bench_apply_insert_10kb(c: &mut Criterion) {
    let document = "lorem ipsum dolor sit amet ".repeat(380); // ~10KB
    let op = Operation::insert(5_000, "edit", "alice");

    c.bench_function("apply_insert_10KB_doc", |bench| {
        bench.iter(|| {
            black_box(apply(black_box(&document), black_box(&op)));
        })
    });
}

fn bench_apply_delete_10kb(c: &mut Criterion) {
    let document = "lorem ipsum dolor sit amet ".repeat(380);
    let op = Operation::delete(5_000, 64, "alice");

    c.bench_function("apply_delete_10KB_doc", |bench| {
        bench.iter(|| {
            black_box(apply(black_box(&document), black_box(&op)));
        })
    });
}

fn bench_compose_inserts(c: &mut Criterion) {
    let a = Operation::insert(10, "abc", "alice");
    let b = Operation::insert(13, "def", "alice");

    c.bench_function("compose_adjacent_inserts", |bench| {
        bench.iter(|| {
            black_box(compose(black_box(&a), black_box(&b)));
        })
    });
}

fn bench_envelope_encode(c: &mut Criterion) {
    let payload = OperationPayload {
        kind: textroom::OpKind::Insert,
        position: 42,
        content: Some("hello".to_string()),
        length: None,
        based_on: 7,
        sequence: 0,
    };
    let envelope = Envelope::operation("room-1", "alice", payload);

    c.bench_function("envelope_encode", |bench| {
        bench.iter(|| {
            black_box(black_box(&envelope).encode().unwrap());
        })
    });
}

fn bench_envelope_decode(c: &mut Criterion) {
    let payload = OperationPayload {
        kind: textroom::OpKind::Insert,
        position: 42,
        content: Some("hello".to_string()),
        length: None,
        based_on: 7,
        sequence: 0,
    };
    let encoded = Envelope::operation("room-1", "alice", payload).encode().unwrap();

    c.bench_function("envelope_decode", |bench| {
        bench.iter(|| {
            black_box(Envelope::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_user_color_from_id(c: &mut Criterion) {
    c.bench_function("user_color_from_id", |bench| {
        bench.iter(|| {
            black_box(UserColor::from_id(black_box("user-d4f1c9e2")));
        })
    });
}

fn bench_apply_operation_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("coordinator_accept_1000_ops", |bench| {
        bench.iter(|| {
            rt.block_on(async {
                let coordinator = Arc::new(Coordinator::with_defaults());
                coordinator.create_room("r1", "One", "").await.unwrap();
                for i in 0..1000u64 {
                    coordinator
                        .apply_operation("r1", Operation::insert(0, "x", "alice"), i)
                        .await
                        .unwrap();
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_transform_single,
    bench_transform_against_history_100,
    bench_apply_insert_10kb,
    bench_apply_delete_10kb,
    bench_compose_inserts,
    bench_envelope_encode,
    bench_envelope_decode,
    bench_user_color_from_id,
    bench_apply_operation_path,
);
criterion_main!(benches);
