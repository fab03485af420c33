//! Deletion marking, scan-based shift computation and compaction.
//!
//! Marks are computed per entity and pushed down to every child layer. An
//! exclusive scan of each layer's marks gives, for every record, the number
//! of marked records before it: the slide distance of a survivor, or the
//! destination slot of a marked record when copying marked trees out.

use glam::IVec2;
use log::debug;

use crate::{
    core::{
        layout::{entity_flags, Layer, LayerCounts, Range},
        soa::BufferGroup,
    },
    gpu::ComputeContext,
};

/// One 0/1 mark per record of every layer.
#[derive(Debug, Default, Clone)]
pub(crate) struct TreeMarks {
    layers: [Vec<u32>; 6],
}

impl TreeMarks {
    pub(crate) fn layer(&self, layer: Layer) -> &[u32] {
        &self.layers[layer.index()]
    }

    pub(crate) fn totals(&self) -> LayerCounts {
        let mut totals = LayerCounts::default();
        for layer in Layer::ALL {
            totals[layer] = self.layers[layer.index()].iter().map(|m| *m as usize).sum();
        }
        totals
    }
}

/// Exclusive scan of every layer's marks.
#[derive(Debug, Default, Clone)]
pub(crate) struct TreeScan {
    offsets: [Vec<u32>; 6],
    pub(crate) totals: LayerCounts,
}

impl TreeScan {
    pub(crate) fn offsets(&self, layer: Layer) -> &[u32] {
        &self.offsets[layer.index()]
    }
}

fn lookup(marks: &[u32], index: i32) -> u32 {
    if index < 0 {
        return 0;
    }
    marks.get(index as usize).copied().unwrap_or(0)
}

fn mark_ranges(tables: &[IVec2], parent_marks: &[u32], live: usize) -> Vec<u32> {
    let mut marks = vec![0u32; live];
    for (table, mark) in tables.iter().zip(parent_marks) {
        if *mark == 0 {
            continue;
        }
        for child in Range::from(*table).indices() {
            if let Some(slot) = marks.get_mut(child) {
                *slot = 1;
            }
        }
    }
    marks
}

/// Marks every entity whose flags satisfy `select`, plus its whole tree.
pub(crate) fn mark_entity_trees<F>(
    ctx: &ComputeContext,
    group: &BufferGroup,
    counts: &LayerCounts,
    select: F,
) -> TreeMarks
where
    F: Fn(u32) -> bool + Sync + Send,
{
    let entity_flags = &group.entities.flags.as_slice()[..counts.entities()];
    let entities = ctx.map(counts.entities(), |i| select(entity_flags[i]) as u32);

    let hull_entity = group.hulls.entity_id.as_slice();
    let hulls = ctx.map(counts.hulls(), |h| lookup(&entities, hull_entity[h]));

    let point_hull = group.points.hull_index.as_slice();
    let points = ctx.map(counts.points(), |p| lookup(&hulls, point_hull[p]));

    let edge_points = group.edges.points.as_slice();
    let edges = ctx.map(counts.edges(), |e| lookup(&points, edge_points[e].x));

    let hull_bones = mark_ranges(
        &group.hulls.bone_table.as_slice()[..counts.hulls()],
        &hulls,
        counts.hull_bones(),
    );
    let entity_bones = mark_ranges(
        &group.entities.bone_table.as_slice()[..counts.entities()],
        &entities,
        counts.entity_bones(),
    );

    TreeMarks {
        layers: [points, edges, hulls, entities, hull_bones, entity_bones],
    }
}

pub(crate) fn scan_marks(ctx: &ComputeContext, marks: &TreeMarks) -> TreeScan {
    let mut scan = TreeScan::default();
    for layer in Layer::ALL {
        let mut offsets = marks.layer(layer).to_vec();
        let total = ctx.scan().scan_in_place(&mut offsets);
        scan.totals[layer] = total as usize;
        scan.offsets[layer.index()] = offsets;
    }
    scan
}

/// Rewrites a reference through a per-record mapping.
pub(crate) fn remap(mapping: impl Fn(i32) -> i32, index: i32) -> i32 {
    if index < 0 {
        index
    } else {
        mapping(index)
    }
}

pub(crate) fn remap_table(mapping: impl Fn(i32) -> i32, table: IVec2) -> IVec2 {
    let range = Range::from(table);
    if range.is_empty() {
        return Range::EMPTY.into();
    }
    IVec2::new(mapping(range.start), mapping(range.end))
}

/// Calls `mover(src, dst, len)` for every run of unmarked records.
fn compact_runs(marks: &[u32], shifts: &[u32], mut mover: impl FnMut(usize, usize, usize)) {
    let mut index = 0;
    while index < marks.len() {
        if marks[index] != 0 {
            index += 1;
            continue;
        }
        let start = index;
        while index < marks.len() && marks[index] == 0 {
            index += 1;
        }
        mover(start, start - shifts[start] as usize, index - start);
    }
}

/// Removes every entity flagged [`entity_flags::DELETED`] together with its
/// tree, slides the survivors down and rewrites all of their references.
/// Returns the number of records removed per layer.
pub fn delete_and_compact(
    ctx: &ComputeContext,
    group: &mut BufferGroup,
    counts: &mut LayerCounts,
) -> LayerCounts {
    let marks = mark_entity_trees(ctx, group, counts, |flags| {
        flags & entity_flags::DELETED != 0
    });
    let scan = scan_marks(ctx, &marks);
    if scan.totals.is_empty() {
        return scan.totals;
    }

    let shift = |layer: Layer| {
        let offsets = scan.offsets(layer);
        move |index: i32| index - offsets.get(index as usize).copied().unwrap_or(0) as i32
    };

    ctx.for_each_mut(
        &mut group.points.hull_index.as_mut_slice()[..counts.points()],
        |_, hull| *hull = remap(shift(Layer::Hull), *hull),
    );
    ctx.for_each_mut(
        &mut group.edges.points.as_mut_slice()[..counts.edges()],
        |_, points| {
            let map = shift(Layer::Point);
            *points = IVec2::new(remap(&map, points.x), remap(&map, points.y));
        },
    );
    ctx.for_each_mut(
        &mut group.hulls.point_table.as_mut_slice()[..counts.hulls()],
        |_, t| *t = remap_table(shift(Layer::Point), *t),
    );
    ctx.for_each_mut(
        &mut group.hulls.edge_table.as_mut_slice()[..counts.hulls()],
        |_, t| *t = remap_table(shift(Layer::Edge), *t),
    );
    ctx.for_each_mut(
        &mut group.hulls.bone_table.as_mut_slice()[..counts.hulls()],
        |_, t| *t = remap_table(shift(Layer::HullBone), *t),
    );
    ctx.for_each_mut(
        &mut group.hulls.entity_id.as_mut_slice()[..counts.hulls()],
        |_, entity| *entity = remap(shift(Layer::Entity), *entity),
    );
    ctx.for_each_mut(
        &mut group.entities.hull_table.as_mut_slice()[..counts.entities()],
        |_, t| *t = remap_table(shift(Layer::Hull), *t),
    );
    ctx.for_each_mut(
        &mut group.entities.bone_table.as_mut_slice()[..counts.entities()],
        |_, t| *t = remap_table(shift(Layer::EntityBone), *t),
    );
    ctx.for_each_mut(
        &mut group.entities.root_hull.as_mut_slice()[..counts.entities()],
        |_, root| *root = remap(shift(Layer::Hull), *root),
    );
    ctx.for_each_mut(
        &mut group.entity_bones.parent_id.as_mut_slice()[..counts.entity_bones()],
        |_, parent| *parent = remap(shift(Layer::EntityBone), *parent),
    );

    compact_runs(marks.layer(Layer::Point), scan.offsets(Layer::Point), |s, d, n| {
        group.points.move_records(s, d, n)
    });
    compact_runs(marks.layer(Layer::Edge), scan.offsets(Layer::Edge), |s, d, n| {
        group.edges.move_records(s, d, n)
    });
    compact_runs(marks.layer(Layer::Hull), scan.offsets(Layer::Hull), |s, d, n| {
        group.hulls.move_records(s, d, n)
    });
    compact_runs(marks.layer(Layer::Entity), scan.offsets(Layer::Entity), |s, d, n| {
        group.entities.move_records(s, d, n)
    });
    compact_runs(marks.layer(Layer::HullBone), scan.offsets(Layer::HullBone), |s, d, n| {
        group.hull_bones.move_records(s, d, n)
    });
    compact_runs(
        marks.layer(Layer::EntityBone),
        scan.offsets(Layer::EntityBone),
        |s, d, n| group.entity_bones.move_records(s, d, n),
    );

    *counts = counts.saturating_sub(&scan.totals);
    debug!(
        "compacted {} entities / {} hulls / {} points, {} entities live",
        scan.totals.entities(),
        scan.totals.hulls(),
        scan.totals.points(),
        counts.entities()
    );
    scan.totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collision::shapes::ShapeBuilder, core::lifecycle::SectorInput, core::records::EntityBatch};
    use glam::Vec2;

    fn core_with(count: usize) -> (ComputeContext, BufferGroup, LayerCounts) {
        let ctx = ComputeContext::default();
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut counts = LayerCounts::default();
        let batch: EntityBatch = (0..count)
            .map(|i| ShapeBuilder::block(Vec2::new(i as f32 * 50.0, 0.0), 32.0).build())
            .collect();
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch).unwrap();
        input.merge_into(&ctx, &mut core, &mut counts).unwrap();
        (ctx, core, counts)
    }

    #[test]
    fn deleting_middle_entity_keeps_ranges_contiguous() {
        let (ctx, mut core, mut counts) = core_with(3);
        let last_x = core.entities.position.get(2).unwrap().x;
        let flags = core.entities.flags.get(1).unwrap();
        core.entities.flags.set(1, flags | entity_flags::DELETED);

        let removed = delete_and_compact(&ctx, &mut core, &mut counts);
        assert_eq!(removed.entities(), 1);
        assert_eq!(removed.points(), 4);
        assert_eq!(counts.entities(), 2);
        assert_eq!(counts.points(), 8);
        core.validate_ranges(&counts).expect("contiguous after compaction");

        assert_eq!(core.entities.position.get(1).unwrap().x, last_x);
        assert_eq!(Range::from(core.hulls.point_table.get(1).unwrap()), Range::new(4, 7));
        let edge = core.edges.points.get(6).unwrap();
        assert!((4..8).contains(&edge.x) && (4..8).contains(&edge.y));
    }

    #[test]
    fn nothing_flagged_is_a_no_op() {
        let (ctx, mut core, mut counts) = core_with(2);
        let before = counts;
        assert!(delete_and_compact(&ctx, &mut core, &mut counts).is_empty());
        assert_eq!(counts, before);
    }
}
