use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use glam::Vec2;
use log::{debug, warn};

mod collision_manager;
mod dynamics_manager;

pub use collision_manager::CollisionManager;
pub use dynamics_manager::DynamicsManager;

use crate::{
    collision::contact::{apply_reactions, build_reactions},
    config::PhysicsConfig,
    core::{
        layout::{EgressCounts, LayerCounts},
        lifecycle::EntityInfo,
        memory::{CoreMemory, SharedMemory, SyncReport},
        records::EntityBatch,
        soa::BufferGroup,
    },
    dynamics::{clear_accel, constraints::ConstraintMetrics, resolve_entities, resolve_hulls},
    error::PhysicsResult,
    gpu::{ComputeContext, DispatchMode},
    render::RenderFrame,
    utils::{
        logging::{warn_if_tick_budget_exceeded, StageTimer},
        math::Aabb,
        profiling::{PhysicsProfiler, ScopedTimer},
    },
};

/// Outcome of one [`PhysicsWorld::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub sync: SyncReport,
    pub sub_steps: u32,
    pub egressed: EgressCounts,
    pub duration: Duration,
}

/// The simulation side of the core: owns the core buffers and runs the
/// fixed-step pipeline over them.
#[derive(Debug)]
pub struct PhysicsWorld {
    config: PhysicsConfig,
    ctx: ComputeContext,
    memory: CoreMemory,
    pub collision: CollisionManager,
    pub dynamics: DynamicsManager,
    time_accumulated: f32,
    time_step: f32,
    profiler: PhysicsProfiler,
}

impl PhysicsWorld {
    pub fn new(config: PhysicsConfig) -> PhysicsResult<Self> {
        config.validate()?;
        let shared = Arc::new(SharedMemory::new(&config)?);
        let memory = CoreMemory::new(&config, shared)?;
        Ok(Self {
            ctx: ComputeContext::from_config(&config),
            memory,
            collision: CollisionManager::new(&config),
            dynamics: DynamicsManager::new(&config),
            time_accumulated: 0.0,
            time_step: config.fixed_time_step(),
            profiler: PhysicsProfiler::default(),
            config,
        })
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// State shared with the sector tasks.
    pub fn shared(&self) -> &Arc<SharedMemory> {
        self.memory.shared()
    }

    pub fn compute(&self) -> &ComputeContext {
        &self.ctx
    }

    pub fn set_dispatch_mode(&mut self, mode: DispatchMode) {
        self.ctx.set_mode(mode);
    }

    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    pub fn tick_count(&self) -> u64 {
        self.memory.tick()
    }

    pub fn counts(&self) -> LayerCounts {
        self.memory.counts()
    }

    pub fn group(&self) -> &BufferGroup {
        self.memory.group()
    }

    pub fn profiler(&self) -> &PhysicsProfiler {
        &self.profiler
    }

    pub fn constraint_metrics(&self) -> ConstraintMetrics {
        self.dynamics.last_metrics
    }

    /// Stages `batch` for creation at the next sync.
    pub fn load_entity_batch(&self, batch: &EntityBatch) -> PhysicsResult<()> {
        self.shared().load_entity_batch(batch)
    }

    /// Centres the broad-phase grid on the view. The next tick grows it over
    /// the loaded area.
    pub fn set_view(&mut self, view: &Aabb) {
        self.collision.set_view(view);
    }

    /// Entities leaving these bounds egress. `None` disables egress.
    pub fn set_loaded_bounds(&self, bounds: Option<Aabb>) {
        self.shared().set_loaded_bounds(bounds);
    }

    /// The last committed render frame.
    pub fn render_frame(&self) -> Arc<RenderFrame> {
        self.shared().render().latest()
    }

    /// One full tick: waits for the sector tasks at the tick barrier, runs
    /// the sync window, then simulates `dt`.
    pub fn tick(&mut self, dt: f32) -> PhysicsResult<TickReport> {
        let start = Instant::now();
        self.profiler.reset();

        self.shared().barrier().wait()?;
        let sync = {
            let _timer = ScopedTimer::new(&mut self.profiler.ingress_time);
            self.memory.synchronize(&self.ctx)?
        };
        let loaded = self.shared().loaded_bounds();
        self.collision.cover_loaded(loaded);
        let (sub_steps, egressed) = self.step(dt)?;

        let duration = start.elapsed();
        self.profiler.total_tick_time = duration;
        warn_if_tick_budget_exceeded(duration, self.config.frame_budget_ms);
        Ok(TickReport {
            tick: self.memory.tick(),
            sync,
            sub_steps,
            egressed,
            duration,
        })
    }

    /// Advances the simulation by `dt` in fixed sub-steps, then clears
    /// entity acceleration, egresses and compacts. Does not sync.
    pub fn step(&mut self, dt: f32) -> PhysicsResult<(u32, EgressCounts)> {
        self.time_accumulated += dt.max(0.0);

        let mut sub_steps = 0;
        while self.time_accumulated >= self.time_step && sub_steps < self.config.max_sub_steps {
            self.time_accumulated -= self.time_step;
            self.sub_step(self.time_step);
            sub_steps += 1;
        }
        if self.time_accumulated >= self.time_step {
            warn!(
                "simulation is behind; dropping {:.3} s",
                self.time_accumulated - self.time_accumulated % self.time_step
            );
            self.time_accumulated %= self.time_step;
        }
        self.profiler.sub_steps = sub_steps;

        let egressed = {
            let _timer = ScopedTimer::new(&mut self.profiler.egress_time);
            let (group, counts) = self.memory.parts_mut();
            clear_accel(&self.ctx, group, counts);
            self.memory.egress_and_compact(&self.ctx)?
        };
        self.profiler.egressed_entities = egressed.layers.entities();

        let counts = self.memory.counts();
        self.profiler.point_count = counts.points();
        self.profiler.hull_count = counts.hulls();
        self.profiler.entity_count = counts.entities();
        Ok((sub_steps, egressed))
    }

    fn sub_step(&mut self, dt: f32) {
        let _stage = StageTimer::new("sub_step");
        let ctx = &self.ctx;
        let profiler = &mut self.profiler;
        let (group, counts) = self.memory.parts_mut();

        {
            let _timer = ScopedTimer::new(&mut profiler.integrate_time);
            self.dynamics.integrator.integrate(ctx, group, counts, dt);
        }
        {
            let _timer = ScopedTimer::new(&mut profiler.broad_phase_time);
            profiler.candidate_count += self.collision.broad_phase(ctx, group, counts);
        }
        let contacts = {
            let _timer = ScopedTimer::new(&mut profiler.narrow_phase_time);
            self.collision.narrow_phase(ctx, group)
        };
        profiler.contact_count += contacts.len();
        {
            let _timer = ScopedTimer::new(&mut profiler.reaction_time);
            let mut reactions = build_reactions(ctx, group, &contacts);
            apply_reactions(ctx, group, counts, &mut reactions);
        }
        {
            let _timer = ScopedTimer::new(&mut profiler.constraint_time);
            self.dynamics.last_metrics = self.dynamics.constraints.solve(ctx, group, counts);
            resolve_hulls(ctx, group, counts);
            resolve_entities(ctx, group, counts);
        }
        if !contacts.is_empty() {
            debug!("sub-step: {} contacts", contacts.len());
        }
    }

    pub fn entity_info(&self, entity: usize) -> Option<EntityInfo> {
        self.memory.entity_info(entity)
    }

    pub fn set_entity_info(&mut self, entity: usize, info: &EntityInfo) -> bool {
        self.memory.set_entity_info(entity, info)
    }

    /// Sets the acceleration applied to `entity` until the end of the tick.
    pub fn update_accel(&mut self, entity: usize, accel: Vec2) -> bool {
        self.memory.update_accel(entity, accel)
    }

    pub fn entity_position(&self, entity: usize) -> Option<Vec2> {
        self.memory.entity_position(entity)
    }

    /// Lowers the integrity of `hull`; returns what is left.
    pub fn damage_hull(&mut self, hull: usize, amount: i32) -> Option<i32> {
        self.memory.damage_hull(hull, amount)
    }
}
