//! Procedural sector content.

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::sector::SectorKey;
use crate::{
    collision::shapes::ShapeBuilder,
    core::records::{BrokenObject, EntityBatch},
};

/// Side length of the shards a broken object falls apart into.
pub const SHARD_SIZE: f32 = 2.0;

/// Entity kinds produced by [`TerrainGenerator`].
pub mod kinds {
    pub const GROUND: i32 = 0;
    pub const LOOSE_BLOCK: i32 = 1;
    pub const LOOSE_CIRCLE: i32 = 2;
}

/// Source of entity batches for sectors seen for the first time.
pub trait SectorGenerator: Send + Sync {
    /// Content of `key`. Must be deterministic for a given key.
    fn generate(&self, key: SectorKey, sector_size: f32) -> EntityBatch;

    /// Replacement entities for an object that lost all integrity.
    fn shatter(&self, broken: &BrokenObject) -> EntityBatch {
        let offset = SHARD_SIZE * 0.625;
        [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)]
            .into_iter()
            .map(|(x, y)| {
                ShapeBuilder::block(broken.position + Vec2::new(x, y) * offset, SHARD_SIZE)
                    .kind(broken.kind)
                    .model(broken.model_id)
                    .build()
            })
            .collect()
    }
}

/// Flat ground with loose blocks and circles scattered above it.
#[derive(Debug, Clone)]
pub struct TerrainGenerator {
    pub seed: u64,
    /// Height of the top face of the ground row.
    pub ground_level: f32,
    pub block_size: f32,
    /// Upper bound on loose objects per sector above the ground.
    pub loose_objects: usize,
}

impl Default for TerrainGenerator {
    fn default() -> Self {
        Self {
            seed: 0x5EC7_0125,
            ground_level: 32.0,
            block_size: 32.0,
            loose_objects: 12,
        }
    }
}

impl TerrainGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    fn rng_for(&self, key: SectorKey) -> ChaCha8Rng {
        let mixed = self.seed
            ^ (key.x as i64 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (key.y as i64 as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        ChaCha8Rng::seed_from_u64(mixed)
    }
}

impl SectorGenerator for TerrainGenerator {
    fn generate(&self, key: SectorKey, sector_size: f32) -> EntityBatch {
        let bounds = key.bounds(sector_size);
        let mut batch = EntityBatch::new();
        let half = self.block_size * 0.5;

        let ground_center = self.ground_level - half;
        if ground_center >= bounds.min.y && ground_center < bounds.max.y {
            let columns = (sector_size / self.block_size).floor() as usize;
            for column in 0..columns {
                let x = bounds.min.x + (column as f32 + 0.5) * self.block_size;
                batch.push(
                    ShapeBuilder::block(Vec2::new(x, ground_center), self.block_size)
                        .kind(kinds::GROUND)
                        .fixed()
                        .build(),
                );
            }
        }

        let floor = bounds.min.y.max(self.ground_level) + self.block_size;
        let ceiling = bounds.max.y - self.block_size;
        let left = bounds.min.x + self.block_size;
        let right = bounds.max.x - self.block_size;
        if floor >= ceiling || left >= right {
            return batch;
        }

        let mut rng = self.rng_for(key);
        let count = rng.gen_range(0..=self.loose_objects);
        for _ in 0..count {
            let center = Vec2::new(rng.gen_range(left..right), rng.gen_range(floor..ceiling));
            let size = rng.gen_range(half..=self.block_size);
            let entity = if rng.gen_bool(0.5) {
                ShapeBuilder::block(center, size).kind(kinds::LOOSE_BLOCK)
            } else {
                ShapeBuilder::circle(center, size * 0.5).kind(kinds::LOOSE_CIRCLE)
            };
            batch.push(entity.build());
        }
        batch
    }
}
