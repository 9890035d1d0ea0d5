use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use replica_core::core_boundary::{decode_publication, encode_publication, RetentionTable};
use replica_core::core_sync::{
    Delta, DeltaCallback, DeltaPublisher, DeltaSource, MapArray, ObservableMap, Payload, VersionInfo,
};
use replica_core::test_utils::{random_todos, test_rng, Todo};
use std::sync::Arc;

const SIZES: [usize; 3] = [100, 1_000, 10_000];

// Next generation of `prev` with roughly a tenth of the entries touched
fn mutate(prev: &MapArray<String, Todo>) -> MapArray<String, Todo> {
    let mut rng = test_rng();
    let mut next = prev.clone();
    let touched = (prev.len() / 10).max(1);
    for i in 0..touched {
        let key = format!("k{}", rng.random_range(0..prev.len().max(1)));
        if i % 2 == 0 {
            next.remove(&key);
        } else {
            next.insert(key, Todo::new("changed"));
        }
    }
    next.insert("fresh".to_string(), Todo::new("new"));
    next
}

fn bench_delta_between(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_between");

    for size in SIZES {
        let prev = random_todos(&mut test_rng(), size);
        let next = mutate(&prev);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &(prev, next), |b, (prev, next)| {
            b.iter(|| black_box(Delta::between(prev, next)));
        });
    }

    group.finish();
}

fn bench_delta_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_apply");

    for size in SIZES {
        let prev = random_todos(&mut test_rng(), size);
        let delta = Delta::between(&prev, &mutate(&prev));
        group.throughput(Throughput::Elements(delta.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &(prev, delta), |b, (prev, delta)| {
            b.iter(|| {
                let mut replica = prev.clone();
                delta.clone().apply_to(&mut replica);
                black_box(replica)
            });
        });
    }

    group.finish();
}

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");

    let prev = random_todos(&mut test_rng(), 1_000);
    let delta = Delta::between(&prev, &mutate(&prev));
    let bytes = encode_publication(Payload::Delta(delta.clone()), VersionInfo::new(2)).unwrap();
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| black_box(encode_publication(Payload::Delta(delta.clone()), VersionInfo::new(2)).unwrap()));
    });

    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode_publication::<String, Todo>(&bytes).unwrap()));
    });

    group.finish();
}

fn bench_publish_fanout(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("publish_fanout");

    for subscribers in [1usize, 10, 100] {
        let host = Arc::new(ObservableMap::new(random_todos(&mut test_rng(), 1_000)));
        let publisher = DeltaPublisher::new(host.clone(), Arc::new(RetentionTable::new()));
        let teardowns: Vec<_> = (0..subscribers)
            .map(|_| runtime.block_on(publisher.subscribe(DeltaCallback::new(|payload, _| {
                black_box(payload);
            }))))
            .collect::<Result<_, _>>()
            .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &host, |b, host| {
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                host.insert(format!("k{}", n % 1_000), Todo::new(format!("v{}", n)));
            });
        });

        drop(teardowns);
    }

    group.finish();
}

criterion_group!(benches, bench_delta_between, bench_delta_apply, bench_frame_codec, bench_publish_fanout);
criterion_main!(benches);
