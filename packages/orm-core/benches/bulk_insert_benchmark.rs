//! Bulk insert benchmark.
//!
//! Compares persisting a large number of entities in one context against
//! batched persistence that flushes and clears the context every
//! `batch_size` entities, keeping the identity map and snapshots small.

use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use orm_core::{
    EntityManagerFactory, EntityType, FieldDef, ManyToOne, Metadata, OneToMany, PersistenceConfig,
};

const ENTITY_COUNT: usize = 2_000;

fn create_factory(batch_size: usize) -> EntityManagerFactory {
    let metadata = Metadata::builder()
        .entity(
            EntityType::new("Parent")
                .with_one_to_many(OneToMany::new("children", "Child", "parent")),
        )
        .entity(
            EntityType::new("Child")
                .with_field(FieldDef::new("name").default_value("default"))
                .with_many_to_one(ManyToOne::new("parent", "Parent")),
        )
        .build()
        .expect("Failed to build benchmark mapping");
    let config = PersistenceConfig {
        batch_size,
        ..PersistenceConfig::default()
    };
    EntityManagerFactory::in_memory(metadata, config).expect("Failed to create factory")
}

/// Benchmark: everything stays managed until commit
fn benchmark_single_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_context_insert");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(ENTITY_COUNT as u64));

    group.bench_function("persist_all", |b| {
        b.iter(|| {
            let factory = create_factory(ENTITY_COUNT);
            let em = factory.create_entity_manager();
            em.begin().unwrap();
            for _ in 0..ENTITY_COUNT {
                let parent = em.new_entity("Parent").unwrap();
                em.persist(&parent).unwrap();
            }
            em.commit().unwrap();
            black_box(em.managed_count())
        });
    });
    group.finish();
}

/// Benchmark: flush and clear every batch
fn benchmark_batched_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_insert");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(ENTITY_COUNT as u64));

    for batch_size in [20usize, 100, 500] {
        group.bench_with_input(
            BenchmarkId::new("batch_size", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    let factory = create_factory(batch_size);
                    let em = factory.create_entity_manager();
                    em.begin().unwrap();
                    let parents = (0..ENTITY_COUNT).map(|_| em.new_entity("Parent").unwrap());
                    let persisted = em.persist_in_batches(parents).unwrap();
                    em.commit().unwrap();
                    black_box(persisted)
                });
            },
        );
    }
    group.finish();
}

/// Benchmark: dirty checking cost of a flush with many managed entities
fn benchmark_flush_dirty_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_dirty_check");
    group.sample_size(10);

    for managed in [100usize, 1_000] {
        let factory = create_factory(managed);
        let em = factory.create_entity_manager();
        em.begin().unwrap();
        let children: Vec<_> = (0..managed)
            .map(|_| {
                let parent = em.new_entity("Parent").unwrap();
                em.persist(&parent).unwrap();
                let child = em.new_entity("Child").unwrap();
                child.set_reference("parent", Some(&parent)).unwrap();
                em.persist(&child).unwrap();
                child
            })
            .collect();
        em.flush().unwrap();

        group.bench_with_input(BenchmarkId::new("managed", managed), &managed, |b, _| {
            let mut round = 0u64;
            b.iter(|| {
                round += 1;
                children[0].set("name", format!("round-{}", round)).unwrap();
                em.flush().unwrap();
            });
        });
        em.rollback().unwrap();
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_single_context,
    benchmark_batched_insert,
    benchmark_flush_dirty_check
);
criterion_main!(benches);
