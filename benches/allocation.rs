use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pasarela::core::{ClusterHealthSnapshot, ConnectionGroupKey};
use pasarela::pool::allocation::PoolAllocationCoordinator;

fn criterion_benchmark(c: &mut Criterion) {
    let raw = "10.0.0.1:16021(UP);10.0.0.2:16021(DOWN);10.0.0.3:16021(UP);10.0.0.4:16021(UP)";

    c.bench_function("snapshot_parse", |b| {
        b.iter(|| {
            let snapshot = ClusterHealthSnapshot::parse(black_box(raw));
            black_box(snapshot.healthy_count());
        })
    });

    c.bench_function("group_key_derive", |b| {
        b.iter(|| {
            black_box(ConnectionGroupKey::derive(
                black_box("db://10.0.0.1:5432/app"),
                black_box("svc"),
                black_box("orders"),
            ));
        })
    });

    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("allocation_update", |b| {
        let coordinator = PoolAllocationCoordinator::new();
        let group = ConnectionGroupKey::from("bench");
        let nodes: Vec<String> = (0..8).map(|i| format!("10.0.0.{}:16021", i)).collect();
        rt.block_on(coordinator.allocate(&group, 240, 64, &nodes));

        let mut healthy = 1u32;
        b.iter(|| {
            healthy = healthy % 8 + 1;
            rt.block_on(coordinator.update_healthy_nodes(&group, black_box(healthy)))
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
