use approx::assert_relative_eq;
use sector_physics::{
    core::{lifecycle::SectorInput, records::EdgeRecord},
    *,
};

fn load(ctx: &ComputeContext, batch: &EntityBatch) -> (BufferGroup, LayerCounts) {
    let mut group = BufferGroup::new(&LayerCounts::default()).unwrap();
    let mut counts = LayerCounts::default();
    let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
    input.load_entity_batch(batch).unwrap();
    input.merge_into(ctx, &mut group, &mut counts).unwrap();
    (group, counts)
}

/// One hull holding a single edge of rest length 10 between points 12 apart.
fn stretched_rod(pin_first: bool) -> EntityBatch {
    let mut entity = ShapeBuilder::block(Vec2::ZERO, 4.0).build();
    let hull = &mut entity.hulls[0];
    hull.points.truncate(2);
    hull.points[0] = PointRecord::at(Vec2::new(0.0, 0.0));
    hull.points[1] = PointRecord::at(Vec2::new(12.0, 0.0));
    if pin_first {
        hull.points[0].flags |= point_flags::PINNED;
    }
    hull.edges = vec![EdgeRecord {
        points: [0, 1],
        length: 10.0,
        flags: 0,
    }];
    [entity].into_iter().collect()
}

fn point(group: &BufferGroup, index: usize) -> Vec2 {
    let p = group.points.position.get(index).unwrap();
    Vec2::new(p.x, p.y)
}

#[test]
fn single_pass_restores_rest_length() {
    let ctx = ComputeContext::default();
    let (mut group, counts) = load(&ctx, &stretched_rod(false));

    let metrics = ConstraintSolver::new(1, 1.0).solve(&ctx, &mut group, &counts);
    assert_eq!(metrics.edges_solved, 1);
    assert_relative_eq!(metrics.max_error, 2.0, epsilon = 1e-5);
    assert_relative_eq!(point(&group, 0).x, 1.0, epsilon = 1e-5);
    assert_relative_eq!(point(&group, 1).x, 11.0, epsilon = 1e-5);
    assert_relative_eq!(point(&group, 0).distance(point(&group, 1)), 10.0, epsilon = 1e-5);
}

#[test]
fn pinned_points_do_not_move() {
    let ctx = ComputeContext::default();
    let (mut group, counts) = load(&ctx, &stretched_rod(true));

    ConstraintSolver::new(1, 1.0).solve(&ctx, &mut group, &counts);
    assert_eq!(point(&group, 0), Vec2::ZERO);
    assert_relative_eq!(point(&group, 1).x, 10.0, epsilon = 1e-5);
}

#[test]
fn default_edge_steps_bring_a_stretched_rod_back_to_rest() {
    let ctx = ComputeContext::default();
    let (mut group, counts) = load(&ctx, &stretched_rod(false));
    assert_relative_eq!(point(&group, 0).distance(point(&group, 1)), 12.0);

    let solver = ConstraintSolver::from_config(&PhysicsConfig::default());
    assert_eq!(solver.iterations, config::DEFAULT_EDGE_STEPS);
    solver.solve(&ctx, &mut group, &counts);
    assert_relative_eq!(point(&group, 0).distance(point(&group, 1)), 10.0, epsilon = 1e-4);
    assert_relative_eq!(point(&group, 0).x + point(&group, 1).x, 12.0, epsilon = 1e-4);
}

#[test]
fn soft_rod_error_shrinks_every_iteration() {
    let ctx = ComputeContext::default();
    let (mut group, counts) = load(&ctx, &stretched_rod(false));

    let solver = ConstraintSolver::new(1, 0.5);
    let errors: Vec<f32> = (0..12)
        .map(|_| solver.solve(&ctx, &mut group, &counts).max_error)
        .collect();
    assert_relative_eq!(errors[0], 2.0, epsilon = 1e-5);
    assert!(errors.windows(2).all(|w| w[1] < w[0]), "errors: {errors:?}");
    assert!(errors[11] < 2e-3);
}

#[test]
fn relaxation_reduces_the_error() {
    let ctx = ComputeContext::default();
    let batch: EntityBatch = [ShapeBuilder::regular(Vec2::ZERO, 10.0, 6).build()].into_iter().collect();
    let (mut group, counts) = load(&ctx, &batch);
    {
        let positions = group.points.position.as_mut_slice();
        positions[0].x += 3.0;
        positions[3].y -= 2.0;
    }

    let solver = ConstraintSolver::new(1, 1.0);
    let errors: Vec<f32> = (0..10)
        .map(|_| solver.solve(&ctx, &mut group, &counts).max_error)
        .collect();
    assert!(errors[0] > 0.5);
    assert!(
        errors.windows(2).all(|w| w[1] <= w[0] + 1e-5),
        "error increased between iterations: {errors:?}"
    );
    assert!(errors[9] < errors[0] * 0.1, "errors: {errors:?}");
}

#[test]
fn a_misplaced_hull_is_skipped_alone() {
    let ctx = ComputeContext::default();
    let mut batch = stretched_rod(false);
    batch.append(stretched_rod(false));
    batch.append(stretched_rod(false));
    let (mut group, counts) = load(&ctx, &batch);
    // hull 1 now claims the points of hull 0
    group.hulls.point_table.set(1, IVec2::new(0, 1));

    let metrics = ConstraintSolver::new(1, 1.0).solve(&ctx, &mut group, &counts);
    assert_eq!(metrics.hulls_solved, 2);
    assert_relative_eq!(point(&group, 0).distance(point(&group, 1)), 10.0, epsilon = 1e-5);
    assert_relative_eq!(point(&group, 2).distance(point(&group, 3)), 12.0, epsilon = 1e-5);
    assert_relative_eq!(point(&group, 4).distance(point(&group, 5)), 10.0, epsilon = 1e-5);
}

#[test]
fn serial_and_parallel_solves_agree() {
    let batch: EntityBatch = (0..64)
        .map(|i| ShapeBuilder::block(Vec2::new(i as f32 * 12.0, 0.0), 8.0).build())
        .collect();
    let mut results = Vec::new();
    for mode in [DispatchMode::Serial, DispatchMode::Parallel] {
        let ctx = ComputeContext::new(mode, 64);
        let (mut group, counts) = load(&ctx, &batch);
        for (i, p) in group.points.position.as_mut_slice()[..counts.points()].iter_mut().enumerate() {
            p.x += (i % 5) as f32 * 0.3;
        }
        ConstraintSolver::new(8, 1.0).solve(&ctx, &mut group, &counts);
        results.push(group.points.position.as_slice()[..counts.points()].to_vec());
    }
    assert_eq!(results[0], results[1]);
}
