use log::{log_enabled, warn, Level};
use std::time::{Duration, Instant};

/// Traces the wall time of a pipeline stage when trace logging is on.
pub struct StageTimer<'a> {
    label: &'a str,
    start: Instant,
}

impl<'a> StageTimer<'a> {
    pub fn new(label: &'a str) -> Self {
        if log_enabled!(Level::Trace) {
            log::trace!("start {label}");
        }
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        if log_enabled!(Level::Trace) {
            log::trace!("end {} ({} us)", self.label, self.start.elapsed().as_micros());
        }
    }
}

/// Warns when a tick took longer than its budget.
pub fn warn_if_tick_budget_exceeded(duration: Duration, budget_ms: f32) -> bool {
    let elapsed_ms = duration.as_secs_f32() * 1000.0;
    if elapsed_ms > budget_ms {
        warn!("Tick exceeded budget: {elapsed_ms:.2} ms > {budget_ms:.2} ms");
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_check_compares_milliseconds() {
        assert!(warn_if_tick_budget_exceeded(Duration::from_millis(50), 41.6));
        assert!(!warn_if_tick_budget_exceeded(Duration::from_millis(10), 41.6));
    }
}
