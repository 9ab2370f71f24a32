//! Ingest cost: one-at-a-time `add` against a single `add_batch`.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use attune::benchmark::create_clustered_dataset;
use attune::{IndexType, StoreConfig, VectorStore};

const DIM: usize = 64;

fn store(index_type: IndexType) -> VectorStore {
    VectorStore::new(StoreConfig::new(DIM).with_index_type(index_type)).expect("valid config")
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.sample_size(10);

    for n in [1_000usize, 4_000] {
        let data = create_clustered_dataset(n, 0, DIM, 20, 0.1, 7);
        group.throughput(Throughput::Elements(n as u64));

        for index_type in [IndexType::Graph, IndexType::Ivf] {
            group.bench_with_input(BenchmarkId::new(format!("{index_type}/add"), n), &n, |b, _| {
                b.iter_batched(
                    || (store(index_type), data.records()),
                    |(s, batch)| {
                        for r in batch {
                            s.add(r).expect("add");
                        }
                        s.force_update().expect("force_update");
                    },
                    BatchSize::LargeInput,
                );
            });
            group.bench_with_input(BenchmarkId::new(format!("{index_type}/add_batch"), n), &n, |b, _| {
                b.iter_batched(
                    || (store(index_type), data.records()),
                    |(s, batch)| {
                        s.add_batch(batch).expect("add_batch");
                        s.force_update().expect("force_update");
                    },
                    BatchSize::LargeInput,
                );
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_ingest);
criterion_main!(benches);
