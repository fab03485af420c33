use std::time::{Duration, Instant};

use log::info;

/// Per-tick stage timings and population counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhysicsProfiler {
    pub ingress_time: Duration,
    pub integrate_time: Duration,
    pub broad_phase_time: Duration,
    pub narrow_phase_time: Duration,
    pub reaction_time: Duration,
    pub constraint_time: Duration,
    pub egress_time: Duration,
    pub total_tick_time: Duration,

    pub sub_steps: u32,
    pub point_count: usize,
    pub hull_count: usize,
    pub entity_count: usize,
    pub candidate_count: usize,
    pub contact_count: usize,
    pub egressed_entities: usize,
}

impl PhysicsProfiler {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) {
        let total_us = self.total_tick_time.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }
        let share = |stage: Duration| (stage.as_micros() as f32 / total_us) * 100.0;
        let ms = |stage: Duration| stage.as_secs_f32() * 1000.0;

        info!(
            "tick: {:.2} ms, {} sub-steps, {} points, {} hulls, {} entities",
            ms(self.total_tick_time),
            self.sub_steps,
            self.point_count,
            self.hull_count,
            self.entity_count
        );
        info!(
            "  candidates {}, contacts {}, egressed {}",
            self.candidate_count, self.contact_count, self.egressed_entities
        );
        for (label, stage) in [
            ("ingress", self.ingress_time),
            ("integrate", self.integrate_time),
            ("broad phase", self.broad_phase_time),
            ("narrow phase", self.narrow_phase_time),
            ("reactions", self.reaction_time),
            ("constraints", self.constraint_time),
            ("egress", self.egress_time),
        ] {
            info!("  {label:<12} {:.2} ms ({:.1}%)", ms(stage), share(stage));
        }
    }
}

/// Adds the lifetime of the guard to a profiler field.
pub struct ScopedTimer<'a> {
    start: Instant,
    output: &'a mut Duration,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(output: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            output,
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        *self.output += self.start.elapsed();
    }
}
