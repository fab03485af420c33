use sector_physics::*;

fn world() -> PhysicsWorld {
    PhysicsWorld::new(PhysicsConfig::default()).unwrap()
}

fn single(entity: EntityRecord) -> EntityBatch {
    [entity].into_iter().collect()
}

#[test]
fn bodies_fall_under_gravity() {
    let mut world = world();
    world
        .load_entity_batch(&single(ShapeBuilder::block(Vec2::new(0.0, 100.0), 10.0).build()))
        .unwrap();

    let report = world.tick(world.config().tick_rate).unwrap();
    assert_eq!(report.sync.merged.entities(), 1);
    assert!(report.sub_steps > 0);
    let metrics = world.constraint_metrics();
    assert_eq!(metrics.hulls_solved, 1);
    assert_eq!(metrics.edges_solved, 6);

    let y = world.entity_position(0).expect("entity should exist").y;
    assert!(y < 100.0, "body should start falling, y = {y}");
}

#[test]
fn static_bodies_stay_put() {
    let mut world = world();
    world
        .load_entity_batch(&single(ShapeBuilder::block(Vec2::new(0.0, 100.0), 10.0).fixed().build()))
        .unwrap();
    for _ in 0..4 {
        world.tick(world.config().tick_rate).unwrap();
    }
    assert_eq!(world.entity_position(0), Some(Vec2::new(0.0, 100.0)));
}

#[test]
fn fixed_timestep_accumulates_remainders() {
    let mut world = world();
    let step = world.time_step();

    let (sub_steps, _) = world.step(step * 8.5).unwrap();
    assert_eq!(sub_steps, 8);
    let (sub_steps, _) = world.step(step * 0.6).unwrap();
    assert_eq!(sub_steps, 1);

    let max = world.config().max_sub_steps;
    let (sub_steps, _) = world.step(step * (max as f32 * 4.0)).unwrap();
    assert_eq!(sub_steps, max);
    let (sub_steps, _) = world.step(0.0).unwrap();
    assert_eq!(sub_steps, 0);
}

#[test]
fn block_rests_on_static_ground() {
    let mut world = world();
    let batch: EntityBatch = [
        ShapeBuilder::rectangle(Vec2::new(0.0, -10.0), Vec2::new(100.0, 10.0)).fixed().build(),
        ShapeBuilder::block(Vec2::new(0.0, 6.0), 10.0).build(),
    ]
    .into_iter()
    .collect();
    world.load_entity_batch(&batch).unwrap();

    for _ in 0..48 {
        world.tick(world.config().tick_rate).unwrap();
    }
    let y = world.entity_position(1).unwrap().y;
    assert!(y > -2.0, "block fell through the ground, y = {y}");
    assert!(y < 10.0, "block was launched, y = {y}");
}

#[test]
fn entities_leaving_loaded_bounds_egress() {
    let mut world = world();
    let batch: EntityBatch = [
        ShapeBuilder::block(Vec2::ZERO, 4.0).fixed().build(),
        ShapeBuilder::block(Vec2::new(500.0, 0.0), 4.0).fixed().model(7).build(),
    ]
    .into_iter()
    .collect();
    world.load_entity_batch(&batch).unwrap();
    world.set_loaded_bounds(Some(Aabb::new(Vec2::splat(-100.0), Vec2::splat(100.0))));

    let first = world.tick(world.config().tick_rate).unwrap();
    assert_eq!(first.egressed.layers.entities(), 1);
    assert_eq!(world.counts().entities(), 1);

    let second = world.tick(world.config().tick_rate).unwrap();
    assert_eq!(second.sync.published.layers.entities(), 1);
    let records = {
        let back = world.shared().egress();
        back.to_host(&back.counts.layers)
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model_id, 7);
    assert_eq!(records[0].flags & entity_flags::SECTOR_OUT, 0);
}

#[test]
fn no_egress_entities_never_leave() {
    let mut world = world();
    let mut player = ShapeBuilder::block(Vec2::new(500.0, 0.0), 4.0).fixed().build();
    player.flags |= entity_flags::NO_EGRESS;
    world.load_entity_batch(&single(player)).unwrap();
    world.set_loaded_bounds(Some(Aabb::new(Vec2::splat(-100.0), Vec2::splat(100.0))));

    let report = world.tick(world.config().tick_rate).unwrap();
    assert!(report.egressed.is_empty());
    assert_eq!(world.counts().entities(), 1);
}

#[test]
fn broken_entities_are_reported_and_removed() {
    let mut world = world();
    world
        .load_entity_batch(&single(
            ShapeBuilder::block(Vec2::new(3.0, 4.0), 4.0).fixed().integrity(10).model(2).build(),
        ))
        .unwrap();
    world.tick(world.config().tick_rate).unwrap();

    assert_eq!(world.damage_hull(0, 4), Some(6));
    assert_eq!(world.damage_hull(0, 6), Some(0));
    let report = world.tick(world.config().tick_rate).unwrap();
    assert_eq!(report.egressed.broken, 1);
    assert_eq!(world.counts().entities(), 0);

    world.tick(world.config().tick_rate).unwrap();
    let broken = world.shared().egress().broken.clone();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].model_id, 2);
    assert_eq!(broken[0].position, Vec2::new(3.0, 4.0));
}

#[test]
fn entity_info_round_trips_gameplay_fields() {
    let mut world = world();
    world
        .load_entity_batch(&single(ShapeBuilder::circle(Vec2::ZERO, 3.0).kind(4).build()))
        .unwrap();
    world.tick(0.0).unwrap();

    let mut info = world.entity_info(0).unwrap();
    assert_eq!(info.kind, 4);
    info.anim_time = Vec2::new(0.5, 0.0);
    info.motion_state = IVec2::new(2, 1);
    assert!(world.set_entity_info(0, &info));
    assert!(world.update_accel(0, Vec2::new(10.0, 0.0)));

    let read = world.entity_info(0).unwrap();
    assert_eq!(read.anim_time, Vec2::new(0.5, 0.0));
    assert_eq!(read.motion_state, IVec2::new(2, 1));
    assert_eq!(read.accel, Vec2::new(10.0, 0.0));
    assert!(world.entity_info(1).is_none());
    assert!(!world.update_accel(5, Vec2::ONE));
}

#[test]
fn render_frame_lags_the_live_buffers() {
    let mut world = world();
    world
        .load_entity_batch(&single(ShapeBuilder::block(Vec2::new(0.0, 50.0), 4.0).build()))
        .unwrap();
    world.tick(world.config().tick_rate).unwrap();

    let frame = world.render_frame();
    assert_eq!(frame.tick, world.tick_count());
    assert_eq!(frame.counts.entities(), 1);
    let mirrored = frame.group.entities.position.get(0).unwrap().y;
    let live = world.entity_position(0).unwrap().y;
    assert!(live < mirrored, "mirror should hold the pre-step state");
}

#[test]
fn wide_views_keep_the_whole_loaded_area_colliding() {
    let mut world = world();
    let view = Aabb::from_center(Vec2::new(1100.0, 0.0), Vec2::new(960.0, 540.0));
    let config = world.config().clone();
    let loaded = sectors::SectorRange::covering(&view, config.view_padding, config.sector_size)
        .bounds(config.sector_size);
    assert!(loaded.min.x < view.center().x - config.grid_extent[0] * 0.5);

    let batch: EntityBatch = [
        ShapeBuilder::rectangle(Vec2::new(-1000.0, -10.0), Vec2::new(20.0, 10.0)).fixed().build(),
        ShapeBuilder::block(Vec2::new(-1000.0, 6.0), 10.0).build(),
    ]
    .into_iter()
    .collect();
    world.load_entity_batch(&batch).unwrap();
    world.set_view(&view);
    world.set_loaded_bounds(Some(loaded));

    for _ in 0..48 {
        let report = world.tick(world.config().tick_rate).unwrap();
        assert!(report.egressed.is_empty());
    }
    assert!(world.collision.grid.bounds().min.x <= loaded.min.x);
    assert_eq!(world.counts().entities(), 2);
    let y = world.entity_position(1).unwrap().y;
    assert!(y > -2.0, "block fell through the ground, y = {y}");
    assert!(y < 10.0, "block was launched, y = {y}");
}
