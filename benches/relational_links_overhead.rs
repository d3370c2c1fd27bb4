#![cfg(all(feature = "native", feature = "sqlite"))]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use netabase_relations::prelude::*;

fn bench_schema() -> Schema {
    Schema::builder()
        .entity("Device", |t| {
            t.to_many_cont("interfaces", "Interface", "device")
                .to_many("groups", "Group", "devices")
        })
        .entity("Interface", |t| t.to_one("device", "Device", "interfaces"))
        .entity("Group", |t| t.to_many("devices", "Device", "groups"))
        .build()
        .unwrap()
}

/// `size` root devices and one group, unlinked.
fn seed<B: RelationBackend>(r: &Relations<B>, size: u64) -> (Vec<Entity>, Entity) {
    let devices = (0..size)
        .map(|i| {
            r.create_root(Entity::root("Device", format!("/Devices/d{}", i)))
                .unwrap()
        })
        .collect();
    let group = r
        .create_root(Entity::root("Group", "/Groups/all"))
        .unwrap();
    (devices, group)
}

fn link_raw<B: RelationBackend>(backend: &B, devices: &[Entity], group: &Entity) {
    for d in devices {
        let mut batch = RelationBatch::new();
        batch.insert_link(&d.primary_id, "groups", &group.primary_id);
        batch.insert_link(&group.primary_id, "devices", &d.primary_id);
        backend.apply(&batch).unwrap();
    }
}

fn link_checked<B: RelationBackend>(r: &Relations<B>, devices: &[Entity], group: &Entity) {
    for d in devices {
        r.to_many(d, "groups").unwrap().add_relation(group).unwrap();
    }
}

fn bench_link(c: &mut Criterion) {
    let mut bench_group = c.benchmark_group("link");

    for size in [100u64, 1000].iter() {
        bench_group.bench_with_input(BenchmarkId::new("raw_sled", size), size, |b, &size| {
            b.iter(|| {
                let r = Relations::new(bench_schema(), SledStore::temporary().unwrap());
                let (devices, group) = seed(&r, size);
                link_raw(r.backend(), &devices, &group);
                black_box(r.backend().remote_uids(&group.primary_id, "devices").unwrap().len());
            });
        });

        bench_group.bench_with_input(BenchmarkId::new("relations_sled", size), size, |b, &size| {
            b.iter(|| {
                let r = Relations::new(bench_schema(), SledStore::temporary().unwrap());
                let (devices, group) = seed(&r, size);
                link_checked(&r, &devices, &group);
                black_box(r.to_many(&group, "devices").unwrap().count_objects().unwrap());
            });
        });

        bench_group.bench_with_input(BenchmarkId::new("raw_redb", size), size, |b, &size| {
            b.iter(|| {
                let r = Relations::new(bench_schema(), RedbStore::temporary().unwrap());
                let (devices, group) = seed(&r, size);
                link_raw(r.backend(), &devices, &group);
                black_box(r.backend().remote_uids(&group.primary_id, "devices").unwrap().len());
            });
        });

        bench_group.bench_with_input(BenchmarkId::new("relations_redb", size), size, |b, &size| {
            b.iter(|| {
                let r = Relations::new(bench_schema(), RedbStore::temporary().unwrap());
                let (devices, group) = seed(&r, size);
                link_checked(&r, &devices, &group);
                black_box(r.to_many(&group, "devices").unwrap().count_objects().unwrap());
            });
        });

        bench_group.bench_with_input(BenchmarkId::new("raw_sqlite", size), size, |b, &size| {
            b.iter(|| {
                let r = Relations::new(bench_schema(), SqliteStore::in_memory().unwrap());
                let (devices, group) = seed(&r, size);
                link_raw(r.backend(), &devices, &group);
                black_box(r.backend().remote_uids(&group.primary_id, "devices").unwrap().len());
            });
        });

        bench_group.bench_with_input(BenchmarkId::new("relations_sqlite", size), size, |b, &size| {
            b.iter(|| {
                let r = Relations::new(bench_schema(), SqliteStore::in_memory().unwrap());
                let (devices, group) = seed(&r, size);
                link_checked(&r, &devices, &group);
                black_box(r.to_many(&group, "devices").unwrap().count_objects().unwrap());
            });
        });
    }

    bench_group.finish();
}

fn bench_diagnose(c: &mut Criterion) {
    let mut bench_group = c.benchmark_group("diagnose");

    for size in [10u64, 100].iter() {
        let r = Relations::new(bench_schema(), MemoryStore::new());
        let device = r
            .create_root(Entity::root("Device", "/Devices/router"))
            .unwrap();
        let interfaces = r.to_many_cont(&device, "interfaces").unwrap();
        for i in 0..*size {
            interfaces
                .set_object(Entity::new("Interface", format!("eth{}", i)))
                .unwrap();
        }

        bench_group.bench_with_input(BenchmarkId::new("memory", size), size, |b, _| {
            b.iter(|| black_box(r.diagnose(&device).unwrap().relations_checked));
        });
    }

    bench_group.finish();
}

criterion_group!(benches, bench_link, bench_diagnose);
criterion_main!(benches);
