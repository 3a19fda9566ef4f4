use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use keelraft::quorum::QuorumSet;
use maplit::btreeset;

pub fn bench_is_quorum(c: &mut Criterion) {
    c.bench_function("quorum_set: slice, ids: slice", |b| {
        let m12345: &[u64] = &[1, 2, 3, 4, 5];
        let x = [1u64, 2, 3, 6, 7];

        b.iter(|| m12345.is_quorum(x.iter()))
    });

    c.bench_function("quorum_set: vec, ids: slice", |b| {
        let m12345: Vec<u64> = vec![1, 2, 3, 4, 5];
        let x = [1u64, 2, 3, 6, 7];

        b.iter(|| m12345.is_quorum(x.iter()))
    });

    c.bench_function("quorum_set: btreeset, ids: slice", |b| {
        let m12345678 = btreeset! {1u64, 2, 3, 4, 5, 6, 7, 8};
        let x = [1u64, 2, 3, 6, 7];

        b.iter(|| m12345678.is_quorum(x.iter()))
    });

    c.bench_function("quorum_set: btreeset, ids: btreeset", |b| {
        let m12345678 = btreeset! {1u64, 2, 3, 4, 5, 6, 7, 8};
        let x = btreeset! {1u64, 2, 3, 6, 7};

        b.iter(|| m12345678.is_quorum(x.iter()))
    });
}

criterion_group!(
    benches, //
    bench_is_quorum
);
criterion_main!(benches);
