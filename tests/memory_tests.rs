use std::sync::Arc;

use sector_physics::*;

fn core_with(config: &PhysicsConfig) -> (Arc<SharedMemory>, CoreMemory) {
    let shared = Arc::new(SharedMemory::new(config).unwrap());
    let core = CoreMemory::new(config, Arc::clone(&shared)).unwrap();
    (shared, core)
}

fn mixed_batch(count: usize) -> EntityBatch {
    (0..count)
        .map(|i| {
            let center = Vec2::new(i as f32 * 20.0, 0.0);
            match i % 3 {
                0 => ShapeBuilder::block(center, 8.0).build(),
                1 => ShapeBuilder::circle(center, 4.0).build(),
                _ => ShapeBuilder::regular(center, 6.0, 5).build(),
            }
        })
        .collect()
}

fn assert_contiguous(group: &BufferGroup, counts: &LayerCounts) {
    let mut next_point = 0;
    let mut next_edge = 0;
    for hull in 0..counts.hulls() {
        let points = Range::from(group.hulls.point_table.get(hull).unwrap());
        let edges = Range::from(group.hulls.edge_table.get(hull).unwrap());
        assert_eq!(points.start as usize, next_point, "hull {hull} points");
        next_point += points.len();
        if !edges.is_empty() {
            assert_eq!(edges.start as usize, next_edge, "hull {hull} edges");
            next_edge += edges.len();
        }
    }
    assert_eq!(next_point, counts.points());
    assert_eq!(next_edge, counts.edges());
}

#[test]
fn merged_batches_keep_tables_contiguous() {
    let ctx = ComputeContext::default();
    let config = PhysicsConfig::default();
    let (shared, mut core) = core_with(&config);

    shared.load_entity_batch(&mixed_batch(10)).unwrap();
    core.synchronize(&ctx).unwrap();
    shared.load_entity_batch(&mixed_batch(7)).unwrap();
    core.synchronize(&ctx).unwrap();

    let counts = core.counts();
    assert_eq!(counts.entities(), 17);
    assert_eq!(counts.hulls(), 17);
    core.group().validate_ranges(&counts).unwrap();
    assert_contiguous(core.group(), &counts);
}

#[test]
fn deleting_entities_compacts_every_layer() {
    let ctx = ComputeContext::default();
    let config = PhysicsConfig::default();
    let (shared, mut core) = core_with(&config);
    let batch = mixed_batch(12);
    shared.load_entity_batch(&batch).unwrap();
    core.synchronize(&ctx).unwrap();

    let doomed = [0usize, 4, 5, 11];
    for &entity in &doomed {
        let mut info = core.entity_info(entity).unwrap();
        info.flags |= entity_flags::DELETED;
        assert!(core.set_entity_info(entity, &info));
    }
    let removed_counts = doomed
        .iter()
        .fold(LayerCounts::default(), |acc, &i| acc.added(&batch.entities[i].counts()));
    let expected = batch.counts().saturating_sub(&removed_counts);

    core.egress_and_compact(&ctx).unwrap();
    let counts = core.counts();
    assert_eq!(counts, expected);
    core.group().validate_ranges(&counts).unwrap();
    assert_contiguous(core.group(), &counts);

    let survivors: Vec<Vec2> = (0..counts.entities()).map(|e| core.entity_position(e).unwrap()).collect();
    let expected_positions: Vec<Vec2> = (0..batch.len())
        .filter(|i| !doomed.contains(i))
        .map(|i| batch.entities[i].position)
        .collect();
    assert_eq!(survivors, expected_positions);
}

#[test]
fn buffers_grow_by_stride_and_rebind() {
    let ctx = ComputeContext::default();
    let config = PhysicsConfig {
        initial_capacity: [16, 16, 16, 16],
        ..PhysicsConfig::default()
    };
    let (shared, mut core) = core_with(&config);
    shared.load_entity_batch(&mixed_batch(600)).unwrap();
    core.synchronize(&ctx).unwrap();

    let counts = core.counts();
    let capacities = core.group().capacities();
    assert!(capacities.points() >= counts.points());
    assert_eq!(capacities.points() % config::DEFAULT_GROWTH_STRIDE, 0);
    assert_eq!(core.kernels().bound_capacities(), capacities);
    core.group().validate_ranges(&counts).unwrap();
}
