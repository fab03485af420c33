use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sector_physics::{
    collision::broadphase::{detect_candidates, update_bounds},
    core::lifecycle::SectorInput,
    BroadPhase, BufferGroup, ComputeContext, DispatchMode, EntityBatch, ExclusiveScan, LayerCounts,
    PhysicsConfig, PhysicsWorld, ShapeBuilder, UniformGrid, Vec2,
};
use std::hint::black_box;

fn blocks(count: usize) -> EntityBatch {
    let columns = (count as f32).sqrt().ceil() as usize;
    (0..count)
        .map(|i| {
            let center = Vec2::new((i % columns) as f32 * 9.0, 20.0 + (i / columns) as f32 * 9.0);
            ShapeBuilder::block(center, 8.0).build()
        })
        .chain([ShapeBuilder::rectangle(Vec2::new(0.0, 0.0), Vec2::new(1000.0, 10.0)).fixed().build()])
        .collect()
}

fn prepare_world(count: usize, mode: DispatchMode) -> PhysicsWorld {
    let config = PhysicsConfig {
        dispatch: mode,
        ..PhysicsConfig::default()
    };
    let mut world = PhysicsWorld::new(config).unwrap();
    world.load_entity_batch(&blocks(count)).unwrap();
    world.tick(0.0).unwrap();
    world
}

fn bench_world_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_tick");
    group.sample_size(20);
    for &count in &[128usize, 512, 2048] {
        for (label, mode) in [("serial", DispatchMode::Serial), ("parallel", DispatchMode::Parallel)] {
            group.bench_with_input(BenchmarkId::new(label, count), &count, |b, &count| {
                let mut world = prepare_world(count, mode);
                let dt = world.config().tick_rate;
                b.iter(|| world.tick(black_box(dt)).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("exclusive_scan");
    let input: Vec<u32> = (0..1_000_000u32).map(|i| i % 7).collect();
    for &block in &[256usize, 512, 2048] {
        group.bench_with_input(BenchmarkId::new("parallel", block), &block, |b, &block| {
            let scan = ExclusiveScan::new(block, DispatchMode::Parallel);
            let mut output = vec![0u32; input.len()];
            b.iter(|| scan.scan(black_box(&input), &mut output))
        });
    }
    group.finish();
}

fn bench_broadphase(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadphase");
    let ctx = ComputeContext::default();
    let grid = UniformGrid::from_config(&PhysicsConfig::default());
    for &count in &[1024usize, 8192] {
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut counts = LayerCounts::default();
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&blocks(count)).unwrap();
        input.merge_into(&ctx, &mut core, &mut counts).unwrap();
        let mut broadphase = BroadPhase::new(64);

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                update_bounds(&ctx, &mut core, &counts, &grid);
                detect_candidates(&ctx, &mut broadphase, &mut core, &counts, &grid).len()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_tick, bench_scan, bench_broadphase);
criterion_main!(benches);
