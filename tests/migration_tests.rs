use std::sync::Arc;

use sector_physics::*;

fn batch() -> EntityBatch {
    [
        ShapeBuilder::block(Vec2::new(10.0, 10.0), 8.0).model(1).build(),
        ShapeBuilder::circle(Vec2::new(400.0, 10.0), 5.0).model(2).build(),
        ShapeBuilder::regular(Vec2::new(420.0, 40.0), 6.0, 6).model(3).fixed().build(),
        ShapeBuilder::block(Vec2::new(-20.0, 10.0), 8.0).model(4).build(),
    ]
    .into_iter()
    .collect()
}

/// Loads, egresses everything outside `bounds`, publishes and reads back.
fn migrate(ctx: &ComputeContext, bounds: Aabb) -> (Vec<EntityRecord>, CoreMemory) {
    let config = PhysicsConfig::default();
    let shared = Arc::new(SharedMemory::new(&config).unwrap());
    let mut core = CoreMemory::new(&config, Arc::clone(&shared)).unwrap();

    shared.load_entity_batch(&batch()).unwrap();
    core.synchronize(ctx).unwrap();
    shared.set_loaded_bounds(Some(bounds));
    core.egress_and_compact(ctx).unwrap();
    core.synchronize(ctx).unwrap();

    let records = {
        let back = shared.egress();
        back.to_host(&back.counts.layers)
    };
    (records, core)
}

#[test]
fn egressed_entities_round_trip_through_host_records() {
    let ctx = ComputeContext::default();
    let bounds = Aabb::new(Vec2::splat(-100.0), Vec2::splat(100.0));
    let (records, core) = migrate(&ctx, bounds);

    let original = batch();
    assert_eq!(records, vec![original.entities[1].clone(), original.entities[2].clone()]);

    let counts = core.counts();
    assert_eq!(counts.entities(), 2);
    core.group().validate_ranges(&counts).unwrap();
    assert_eq!(core.entity_position(0), Some(Vec2::new(10.0, 10.0)));
    assert_eq!(core.entity_position(1), Some(Vec2::new(-20.0, 10.0)));
}

#[test]
fn reloading_host_records_rebuilds_identical_trees() {
    let ctx = ComputeContext::default();
    let bounds = Aabb::new(Vec2::splat(-100.0), Vec2::splat(100.0));
    let (records, _) = migrate(&ctx, bounds);

    let config = PhysicsConfig::default();
    let shared = Arc::new(SharedMemory::new(&config).unwrap());
    let mut core = CoreMemory::new(&config, Arc::clone(&shared)).unwrap();
    let reloaded: EntityBatch = records.iter().cloned().collect();
    shared.load_entity_batch(&reloaded).unwrap();
    core.synchronize(&ctx).unwrap();

    let counts = core.counts();
    assert_eq!(counts, reloaded.counts());
    core.group().validate_ranges(&counts).unwrap();
    let again = sector_physics::core::egress::unload_entities(core.group(), &counts);
    assert_eq!(again, records);
}

#[test]
fn egress_is_identical_across_dispatch_modes() {
    let bounds = Aabb::new(Vec2::splat(-100.0), Vec2::splat(100.0));
    let (serial, _) = migrate(&ComputeContext::new(DispatchMode::Serial, 4), bounds);
    let (parallel, _) = migrate(&ComputeContext::new(DispatchMode::Parallel, 512), bounds);
    assert_eq!(serial, parallel);
}
