//! Spatial-hash broad phase.
//!
//! Every pass is a data-parallel kernel over hulls or keys:
//!
//! 1. key spans from the swept bounds, clamped to the grid,
//! 2. per-key counts (atomic) and their exclusive scan,
//! 3. scatter of hull ids into the key bank, each run sorted by hull id,
//! 4. per-hull candidate capacity and its scan,
//! 5. pair emission into per-hull regions,
//! 6. compaction of the used slots into a dense pair list.
//!
//! A pair is only emitted from the lowest cell both spans share, so hulls
//! that meet in several cells are reported once. Hulls spanning more than
//! the grid's maximum key span stay out of the key bank and are tested
//! against every other hull instead. The final list is sorted, so it does
//! not depend on the dispatch mode or the scan block size.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{IVec2, IVec4, Vec2, Vec4};
use log::{debug, trace};
use rayon::prelude::*;

use crate::{
    collision::grid::{KeySpan, UniformGrid},
    core::{
        layout::{hull_flags, LayerCounts, Range},
        soa::BufferGroup,
    },
    gpu::{split_by_counts, ComputeContext, DispatchMode},
    utils::math::Aabb,
};

/// Unordered hull pair with `a < b`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidatePair {
    pub a: u32,
    pub b: u32,
}

impl CandidatePair {
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            a: a.min(b),
            b: a.max(b),
        }
    }
}

/// Per-hull columns the broad phase reads.
#[derive(Debug, Clone, Copy)]
pub struct BoundsInput<'a> {
    pub aabbs: &'a [Vec4],
    pub flags: &'a [u32],
    pub entities: &'a [i32],
}

impl<'a> BoundsInput<'a> {
    pub fn len(&self) -> usize {
        self.aabbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aabbs.is_empty()
    }

    fn excluded(&self, hull: usize) -> bool {
        self.flags
            .get(hull)
            .is_some_and(|flags| flags & (hull_flags::NO_COLLISION | hull_flags::OUT_OF_BOUNDS) != 0)
    }

    fn is_static(&self, hull: usize) -> bool {
        self.flags
            .get(hull)
            .is_some_and(|flags| flags & hull_flags::IS_STATIC != 0)
    }

    fn entity(&self, hull: usize) -> i32 {
        self.entities.get(hull).copied().unwrap_or(-1 - hull as i32)
    }

    /// Same-entity and static-static pairs never collide.
    fn may_collide(&self, a: usize, b: usize) -> bool {
        let entity_a = self.entity(a);
        !(entity_a >= 0 && entity_a == self.entity(b)) && !(self.is_static(a) && self.is_static(b))
    }
}

/// Broad phase state. Scratch buffers are kept between ticks.
#[derive(Debug, Default)]
pub struct BroadPhase {
    max_candidates_per_hull: u32,
    spans: Vec<IVec4>,
    /// `spans` with oversized hulls removed; drives every key-bank pass.
    bank_spans: Vec<IVec4>,
    oversized: Vec<u32>,
    hull_key_counts: Vec<u32>,
    hull_key_offsets: Vec<u32>,
    key_counts: Vec<u32>,
    key_offsets: Vec<u32>,
    key_bank: Vec<u32>,
    match_counts: Vec<u32>,
    match_offsets: Vec<u32>,
    match_slots: Vec<CandidatePair>,
    used_counts: Vec<u32>,
    used_offsets: Vec<u32>,
    candidates: Vec<CandidatePair>,
}

impl BroadPhase {
    pub fn new(max_candidates_per_hull: u32) -> Self {
        Self {
            max_candidates_per_hull: max_candidates_per_hull.max(1),
            ..Self::default()
        }
    }

    /// Dense candidate list from the last [`BroadPhase::run`].
    pub fn candidates(&self) -> &[CandidatePair] {
        &self.candidates
    }

    /// Key span `(x0, x1, y0, y1)` of every hull, `-1` when it has no keys.
    pub fn spans(&self) -> &[IVec4] {
        &self.spans
    }

    /// Hulls too wide for the key bank, from the last run.
    pub fn oversized(&self) -> &[u32] {
        &self.oversized
    }

    pub fn key_counts(&self) -> &[u32] {
        &self.key_counts
    }

    pub fn key_offsets(&self) -> &[u32] {
        &self.key_offsets
    }

    /// Hull ids bucketed by key; `key_offsets[k]..+key_counts[k]` is key `k`.
    pub fn key_bank(&self) -> &[u32] {
        &self.key_bank
    }

    /// Runs every pass and returns the dense candidate list.
    pub fn run(
        &mut self,
        ctx: &ComputeContext,
        grid: &UniformGrid,
        input: BoundsInput<'_>,
    ) -> &[CandidatePair] {
        self.compute_spans(ctx, grid, input);
        self.count_keys(ctx, grid);
        self.scatter_keys(ctx, grid);
        self.count_matches(ctx, grid);
        self.emit_matches(ctx, grid, input);
        self.finalize(ctx);
        self.match_oversized(ctx, input);
        trace!(
            "broadphase: {} hulls ({} oversized), {} keys, {} candidates",
            input.len(),
            self.oversized.len(),
            self.key_bank.len(),
            self.candidates.len()
        );
        &self.candidates
    }

    /// Writes each hull's key span and key-table slice back into its columns.
    pub fn write_key_tables(&self, key_ranges: &mut [IVec4], key_tables: &mut [IVec2]) {
        for (hull, range) in key_ranges.iter_mut().enumerate().take(self.spans.len()) {
            *range = self.spans[hull];
        }
        for (hull, table) in key_tables.iter_mut().enumerate().take(self.spans.len()) {
            let start = self.hull_key_offsets[hull] as i32;
            *table = IVec2::new(start, start + self.hull_key_counts[hull] as i32 - 1);
        }
    }

    fn compute_spans(&mut self, ctx: &ComputeContext, grid: &UniformGrid, input: BoundsInput<'_>) {
        self.spans = ctx.map(input.len(), |hull| {
            if input.excluded(hull) {
                return KeySpan::NONE;
            }
            grid.key_span(&Aabb::from_vec4(input.aabbs[hull]))
                .map_or(KeySpan::NONE, KeySpan::to_ivec4)
        });

        let max_span = grid.max_key_span();
        let spans = &self.spans;
        self.bank_spans = ctx.map(spans.len(), |hull| match KeySpan::from_ivec4(spans[hull]) {
            Some(span) if !span.fits(max_span) => KeySpan::NONE,
            _ => spans[hull],
        });
        self.oversized = (0..spans.len() as u32)
            .filter(|&hull| {
                KeySpan::from_ivec4(spans[hull as usize]).is_some_and(|span| !span.fits(max_span))
            })
            .collect();
    }

    fn count_keys(&mut self, ctx: &ComputeContext, grid: &UniformGrid) {
        let counters: Vec<AtomicU32> = (0..grid.key_count()).map(|_| AtomicU32::new(0)).collect();
        let spans = &self.bank_spans;

        self.hull_key_counts.clear();
        self.hull_key_counts.resize(spans.len(), 0);
        ctx.for_each_mut(&mut self.hull_key_counts, |hull, count| {
            let Some(span) = KeySpan::from_ivec4(spans[hull]) else {
                return;
            };
            *count = span.len();
            for (x, y) in span.cells() {
                counters[grid.key(x, y)].fetch_add(1, Ordering::Relaxed);
            }
        });

        self.key_counts = counters.into_iter().map(AtomicU32::into_inner).collect();
        self.key_offsets.resize(self.key_counts.len(), 0);
        ctx.scan().scan(&self.key_counts, &mut self.key_offsets);

        self.hull_key_offsets.resize(self.hull_key_counts.len(), 0);
        ctx.scan().scan(&self.hull_key_counts, &mut self.hull_key_offsets);
    }

    fn scatter_keys(&mut self, ctx: &ComputeContext, grid: &UniformGrid) {
        let total: usize = self.key_counts.iter().map(|&c| c as usize).sum();
        let cursors: Vec<AtomicU32> = (0..self.key_counts.len()).map(|_| AtomicU32::new(0)).collect();
        let bank: Vec<AtomicU32> = (0..total).map(|_| AtomicU32::new(0)).collect();
        let (spans, offsets) = (&self.bank_spans, &self.key_offsets);

        ctx.for_each(spans.len(), |hull| {
            let Some(span) = KeySpan::from_ivec4(spans[hull]) else {
                return;
            };
            for (x, y) in span.cells() {
                let key = grid.key(x, y);
                let slot = offsets[key] + cursors[key].fetch_add(1, Ordering::Relaxed);
                bank[slot as usize].store(hull as u32, Ordering::Relaxed);
            }
        });
        self.key_bank = bank.into_iter().map(AtomicU32::into_inner).collect();

        // Scatter order is racy; sorting each run makes it deterministic.
        let mut runs = split_by_counts(&mut self.key_bank, &self.key_counts);
        match ctx.mode() {
            DispatchMode::Parallel => runs.par_iter_mut().for_each(|run| run.sort_unstable()),
            DispatchMode::Serial => runs.iter_mut().for_each(|run| run.sort_unstable()),
        }
    }

    fn count_matches(&mut self, ctx: &ComputeContext, grid: &UniformGrid) {
        let (spans, key_counts) = (&self.bank_spans, &self.key_counts);
        let limit = self.max_candidates_per_hull;
        self.match_counts = ctx.map(spans.len(), |hull| {
            KeySpan::from_ivec4(spans[hull]).map_or(0, |span| {
                let neighbours: u32 = span
                    .cells()
                    .map(|(x, y)| key_counts[grid.key(x, y)].saturating_sub(1))
                    .sum();
                neighbours.min(limit)
            })
        });
        self.match_offsets.resize(self.match_counts.len(), 0);
        let slots = ctx.scan().scan(&self.match_counts, &mut self.match_offsets);
        self.match_slots.clear();
        self.match_slots.resize(slots as usize, CandidatePair::default());
    }

    fn emit_matches(&mut self, ctx: &ComputeContext, grid: &UniformGrid, input: BoundsInput<'_>) {
        let (spans, bank) = (&self.bank_spans, &self.key_bank);
        let (key_offsets, key_counts) = (&self.key_offsets, &self.key_counts);

        let mut regions: Vec<MatchRegion<'_>> = split_by_counts(&mut self.match_slots, &self.match_counts)
            .into_iter()
            .map(|slots| MatchRegion { slots, used: 0 })
            .collect();

        ctx.for_each_mut(&mut regions, |hull, region| {
            let Some(span) = KeySpan::from_ivec4(spans[hull]) else {
                return;
            };
            let bounds = Aabb::from_vec4(input.aabbs[hull]);
            'cells: for (x, y) in span.cells() {
                let key = grid.key(x, y);
                let start = key_offsets[key] as usize;
                for &other in &bank[start..start + key_counts[key] as usize] {
                    let other = other as usize;
                    if other <= hull || !input.may_collide(hull, other) {
                        continue;
                    }
                    let Some(other_span) = KeySpan::from_ivec4(spans[other]) else {
                        continue;
                    };
                    if span.first_shared_cell(&other_span) != Some((x, y)) {
                        continue;
                    }
                    if !bounds.overlaps(&Aabb::from_vec4(input.aabbs[other])) {
                        continue;
                    }
                    if region.used == region.slots.len() {
                        break 'cells;
                    }
                    region.slots[region.used] = CandidatePair::new(hull as u32, other as u32);
                    region.used += 1;
                }
            }
        });

        self.used_counts = regions.iter().map(|region| region.used as u32).collect();
    }

    fn finalize(&mut self, ctx: &ComputeContext) {
        self.used_offsets.resize(self.used_counts.len(), 0);
        let total = ctx.scan().scan(&self.used_counts, &mut self.used_offsets);

        self.candidates.clear();
        self.candidates.resize(total as usize, CandidatePair::default());
        let (slots, match_offsets) = (&self.match_slots, &self.match_offsets);
        let mut outputs = split_by_counts(&mut self.candidates, &self.used_counts);
        ctx.for_each_mut(&mut outputs, |hull, out| {
            let start = match_offsets[hull] as usize;
            out.copy_from_slice(&slots[start..start + out.len()]);
        });
    }

    /// Brute-force pass for oversized hulls. Their pairs are not capped, then
    /// the whole list is sorted.
    fn match_oversized(&mut self, ctx: &ComputeContext, input: BoundsInput<'_>) {
        let (oversized, spans) = (&self.oversized, &self.spans);
        let extra = ctx.flat_map(oversized.len(), |i| {
            let hull = oversized[i] as usize;
            let bounds = Aabb::from_vec4(input.aabbs[hull]);
            (0..input.len())
                .filter(|&other| {
                    other != hull
                        && KeySpan::from_ivec4(spans[other]).is_some()
                        && !(other < hull && oversized.binary_search(&(other as u32)).is_ok())
                        && input.may_collide(hull, other)
                        && bounds.overlaps(&Aabb::from_vec4(input.aabbs[other]))
                })
                .map(|other| CandidatePair::new(hull as u32, other as u32))
                .collect()
        });
        if !extra.is_empty() {
            debug!("broadphase: {} pairs from {} oversized hulls", extra.len(), oversized.len());
        }
        self.candidates.extend(extra);
        match ctx.mode() {
            DispatchMode::Parallel => self.candidates.par_sort_unstable(),
            DispatchMode::Serial => self.candidates.sort_unstable(),
        }
    }
}

struct MatchRegion<'a> {
    slots: &'a mut [CandidatePair],
    used: usize,
}

/// Recomputes swept bounds of every live hull and edge, and their key spans.
///
/// Hull bounds cover both the current and previous point positions. Circles
/// use `scale.x` as radius. Hulls whose bounds leave the grid are flagged
/// [`hull_flags::OUT_OF_BOUNDS`].
pub fn update_bounds(
    ctx: &ComputeContext,
    group: &mut BufferGroup,
    counts: &LayerCounts,
    grid: &UniformGrid,
) {
    let positions = group.points.position.as_slice();
    let point_tables = group.hulls.point_table.as_slice();
    let scales = group.hulls.scale.as_slice();
    let flags = group.hulls.flags.as_slice();

    let hull_bounds: Vec<Vec4> = ctx.map(counts.hulls(), |hull| {
        let mut bounds = Aabb::EMPTY;
        let table = Range::from(point_tables[hull]);
        for point in table.indices() {
            let p = positions[point];
            bounds.include(Vec2::new(p.x, p.y));
            bounds.include(Vec2::new(p.z, p.w));
        }
        if flags[hull] & hull_flags::IS_CIRCLE != 0 {
            bounds = bounds.expand(scales[hull].x.abs());
        }
        bounds.to_vec4()
    });

    let grid_bounds = grid.bounds();
    let live_hulls = counts.hulls();
    group.hulls.aabb.as_mut_slice()[..live_hulls].copy_from_slice(&hull_bounds);
    ctx.for_each_mut(&mut group.hulls.flags.as_mut_slice()[..live_hulls], |hull, flags| {
        let bounds = Aabb::from_vec4(hull_bounds[hull]);
        if bounds.is_valid() && bounds.overlaps(&grid_bounds) {
            *flags &= !hull_flags::OUT_OF_BOUNDS;
        } else {
            *flags |= hull_flags::OUT_OF_BOUNDS;
        }
    });

    let edge_points = group.edges.points.as_slice();
    let edge_bounds: Vec<Vec4> = ctx.map(counts.edges(), |edge| {
        let mut bounds = Aabb::EMPTY;
        for point in edge_points[edge].to_array() {
            let p = positions[point as usize];
            bounds.include(Vec2::new(p.x, p.y));
            bounds.include(Vec2::new(p.z, p.w));
        }
        bounds.to_vec4()
    });
    let live_edges = counts.edges();
    group.edges.aabb.as_mut_slice()[..live_edges].copy_from_slice(&edge_bounds);
    ctx.for_each_mut(&mut group.edges.key_range.as_mut_slice()[..live_edges], |edge, range| {
        *range = grid
            .key_span(&Aabb::from_vec4(edge_bounds[edge]))
            .map_or(KeySpan::NONE, KeySpan::to_ivec4);
    });

    debug!("bounds updated for {live_hulls} hulls and {live_edges} edges");
}

/// Runs the broad phase over the live hulls of `group` and records each hull's
/// key span and key table.
pub fn detect_candidates<'a>(
    ctx: &ComputeContext,
    broadphase: &'a mut BroadPhase,
    group: &mut BufferGroup,
    counts: &LayerCounts,
    grid: &UniformGrid,
) -> &'a [CandidatePair] {
    let live = counts.hulls();
    let input = BoundsInput {
        aabbs: &group.hulls.aabb.as_slice()[..live],
        flags: &group.hulls.flags.as_slice()[..live],
        entities: &group.hulls.entity_id.as_slice()[..live],
    };
    broadphase.run(ctx, grid, input);
    broadphase.write_key_tables(
        &mut group.hulls.key_range.as_mut_slice()[..live],
        &mut group.hulls.key_table.as_mut_slice()[..live],
    );
    broadphase.candidates()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> UniformGrid {
        UniformGrid::new(Vec2::ZERO, Vec2::splat(32.0), [16, 16], 8)
    }

    fn bounds(min: f32, max: f32) -> Vec4 {
        Aabb::new(Vec2::splat(min), Vec2::splat(max)).to_vec4()
    }

    #[test]
    fn pairs_meeting_in_many_cells_are_reported_once() {
        let aabbs = [bounds(0.0, 7.0), bounds(1.0, 8.0)];
        let input = BoundsInput {
            aabbs: &aabbs,
            flags: &[0, 0],
            entities: &[0, 1],
        };
        let mut broadphase = BroadPhase::new(64);
        let pairs = broadphase.run(&ComputeContext::default(), &grid(), input);
        assert_eq!(pairs, &[CandidatePair::new(0, 1)]);
    }

    #[test]
    fn same_entity_and_static_pairs_are_skipped() {
        let aabbs = [bounds(0.0, 2.0), bounds(1.0, 3.0), bounds(1.5, 2.5)];
        let input = BoundsInput {
            aabbs: &aabbs,
            flags: &[hull_flags::IS_STATIC, 0, hull_flags::IS_STATIC],
            entities: &[0, 1, 1],
        };
        let mut broadphase = BroadPhase::new(64);
        let pairs = broadphase.run(&ComputeContext::default(), &grid(), input);
        assert_eq!(pairs, &[CandidatePair::new(0, 1)]);
    }

    #[test]
    fn hulls_wider_than_the_key_span_still_pair() {
        let grid = UniformGrid::new(Vec2::ZERO, Vec2::splat(32.0), [16, 16], 4);
        let aabbs = [
            Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(31.0, 1.0)).to_vec4(),
            Aabb::new(Vec2::new(20.0, 0.0), Vec2::new(22.0, 1.0)).to_vec4(),
            Aabb::new(Vec2::new(2.0, 0.5), Vec2::new(30.0, 0.8)).to_vec4(),
        ];
        let input = BoundsInput {
            aabbs: &aabbs,
            flags: &[0, 0, 0],
            entities: &[0, 1, 2],
        };
        let mut broadphase = BroadPhase::new(64);
        let pairs = broadphase.run(&ComputeContext::default(), &grid, input).to_vec();
        assert_eq!(broadphase.oversized(), &[0, 2]);
        assert_eq!(
            pairs,
            vec![CandidatePair::new(0, 1), CandidatePair::new(0, 2), CandidatePair::new(1, 2)]
        );
        assert_eq!(broadphase.spans()[0], IVec4::new(0, 15, 0, 0));
    }

    #[test]
    fn candidate_regions_respect_the_cap() {
        let aabbs: Vec<Vec4> = (0..6).map(|_| bounds(4.0, 5.0)).collect();
        let input = BoundsInput {
            aabbs: &aabbs,
            flags: &[0; 6],
            entities: &[0, 1, 2, 3, 4, 5],
        };
        let mut broadphase = BroadPhase::new(2);
        let pairs = broadphase.run(&ComputeContext::default(), &grid(), input).to_vec();
        assert!(pairs.iter().filter(|pair| pair.a == 0).count() <= 2);
        assert!(pairs.windows(2).all(|w| w[0] < w[1]));
    }
}
