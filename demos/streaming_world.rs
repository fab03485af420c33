//! Walks a camera across a procedurally generated world, letting the sector
//! tasks stream terrain in and out of the physics core.
//!
//! Run with `RUST_LOG`-style logging by installing any `log` backend; this
//! demo only prints a summary line every second of simulated time.

use std::sync::Arc;

use sector_physics::{Aabb, PhysicsConfig, PhysicsEngine, PhysicsResult, TerrainGenerator, Vec2};

fn main() -> PhysicsResult<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => PhysicsConfig::from_file(path)?,
        None => PhysicsConfig {
            sector_size: 512.0,
            ..PhysicsConfig::default()
        },
    };
    let dt = config.tick_rate;
    let ticks_per_second = (1.0 / dt).round() as u64;

    let mut engine = PhysicsEngine::with_streaming(config, Arc::new(TerrainGenerator::new(42)))?;
    let half_view = Vec2::new(640.0, 360.0);
    let mut camera = Vec2::new(0.0, 300.0);

    for tick in 0..ticks_per_second * 20 {
        camera.x += 40.0 * dt * 24.0;
        let report = engine.update(Aabb::from_center(camera, half_view), dt)?;

        if tick % ticks_per_second == 0 {
            let counts = engine.world().counts();
            let cached = engine.streaming().map_or(0, |s| s.cached_sectors());
            println!(
                "t={:>3}s camera.x={:>7.0} entities={:>5} points={:>6} cached sectors={:>3} tick {:.2} ms",
                tick / ticks_per_second,
                camera.x,
                counts.entities(),
                counts.points(),
                cached,
                report.duration.as_secs_f32() * 1000.0
            );
            engine.world().profiler().report();
        }
    }

    engine.shutdown()
}
