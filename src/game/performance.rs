//! Tick budget monitoring
//!
//! Tracks how long engine ticks take relative to the tick interval and
//! derives a status the engine uses to shed optional work:
//! - Ambient yells are not scheduled while the budget is critical
//! - Status and budget usage are published through the metrics registry

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Performance status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceStatus {
    /// Well under budget
    Excellent,
    /// Normal operation
    Good,
    /// Close to the budget
    Warning,
    /// At or slightly over budget, optional work is skipped
    Critical,
    /// Sustained overload
    Catastrophic,
}

impl PerformanceStatus {
    /// Generated yells may be requested this tick
    pub fn can_schedule_ambient(&self) -> bool {
        matches!(
            self,
            PerformanceStatus::Excellent | PerformanceStatus::Good | PerformanceStatus::Warning
        )
    }

    /// Numeric level for the metrics gauge
    pub fn level(&self) -> u64 {
        match self {
            PerformanceStatus::Excellent => 0,
            PerformanceStatus::Good => 1,
            PerformanceStatus::Warning => 2,
            PerformanceStatus::Critical => 3,
            PerformanceStatus::Catastrophic => 4,
        }
    }
}

/// Rolling window of tick durations measured against the tick interval
pub struct PerformanceMonitor {
    tick_durations: VecDeque<Duration>,
    max_samples: usize,
    /// One tick interval
    budget: Duration,
    excellent_threshold: f32,
    warning_threshold: f32,
    critical_threshold: f32,
    catastrophic_threshold: f32,
    status: PerformanceStatus,
    tick_start: Option<Instant>,
    last_creature_count: usize,
}

impl PerformanceMonitor {
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            tick_durations: VecDeque::with_capacity(60),
            max_samples: 60,
            budget: Duration::from_millis(tick_interval_ms.max(1)),
            excellent_threshold: 0.3,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            catastrophic_threshold: 1.5,
            status: PerformanceStatus::Excellent,
            tick_start: None,
            last_creature_count: 0,
        }
    }

    pub fn tick_start(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    /// Stop timing the current tick. Returns the measured duration.
    pub fn tick_end(&mut self, creature_count: usize) -> Option<Duration> {
        let start = self.tick_start.take()?;
        let duration = start.elapsed();
        self.record_tick(duration);
        self.last_creature_count = creature_count;
        Some(duration)
    }

    fn record_tick(&mut self, duration: Duration) {
        self.tick_durations.push_back(duration);
        while self.tick_durations.len() > self.max_samples {
            self.tick_durations.pop_front();
        }
        self.update_status();
    }

    fn update_status(&mut self) {
        // a handful of samples before judging
        if self.tick_durations.len() < 5 {
            return;
        }

        let ratio = self.average_tick_duration().as_secs_f32() / self.budget.as_secs_f32();

        self.status = if ratio < self.excellent_threshold {
            PerformanceStatus::Excellent
        } else if ratio < self.warning_threshold {
            PerformanceStatus::Good
        } else if ratio < self.critical_threshold {
            PerformanceStatus::Warning
        } else if ratio < self.catastrophic_threshold {
            PerformanceStatus::Critical
        } else {
            PerformanceStatus::Catastrophic
        };
    }

    pub fn average_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.tick_durations.iter().sum();
        sum / self.tick_durations.len() as u32
    }

    pub fn p95_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.tick_durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    pub fn status(&self) -> PerformanceStatus {
        self.status
    }

    /// Budget usage as a percentage (0-100+)
    pub fn budget_usage_percent(&self) -> f32 {
        (self.average_tick_duration().as_secs_f32() / self.budget.as_secs_f32()) * 100.0
    }

    pub fn can_schedule_ambient(&self) -> bool {
        self.status.can_schedule_ambient()
    }

    pub fn last_creature_count(&self) -> usize {
        self.last_creature_count
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget, {} creatures",
            self.status,
            self.budget_usage_percent(),
            self.last_creature_count
        )
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(crate::game::constants::engine::TICK_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_monitor(samples: u64, tick_ms: u64) -> PerformanceMonitor {
        let mut monitor = PerformanceMonitor::new(100);
        for _ in 0..samples {
            monitor.record_tick(Duration::from_millis(tick_ms));
        }
        monitor
    }

    #[test]
    fn test_new_monitor_is_excellent() {
        let monitor = PerformanceMonitor::new(100);
        assert_eq!(monitor.status(), PerformanceStatus::Excellent);
        assert!(monitor.can_schedule_ambient());
    }

    #[test]
    fn test_too_few_samples_keep_status() {
        let monitor = create_monitor(3, 500);
        assert_eq!(monitor.status(), PerformanceStatus::Excellent);
    }

    #[test]
    fn test_status_levels() {
        assert_eq!(create_monitor(10, 10).status(), PerformanceStatus::Excellent);
        assert_eq!(create_monitor(10, 50).status(), PerformanceStatus::Good);
        assert_eq!(create_monitor(10, 80).status(), PerformanceStatus::Warning);
        assert_eq!(create_monitor(10, 120).status(), PerformanceStatus::Critical);
        assert_eq!(create_monitor(10, 200).status(), PerformanceStatus::Catastrophic);
    }

    #[test]
    fn test_ambient_shed_when_critical() {
        assert!(create_monitor(10, 80).can_schedule_ambient());
        assert!(!create_monitor(10, 120).can_schedule_ambient());
        assert!(!create_monitor(10, 200).can_schedule_ambient());
    }

    #[test]
    fn test_budget_usage() {
        let monitor = create_monitor(10, 50);
        let usage = monitor.budget_usage_percent();
        assert!((usage - 50.0).abs() < 0.5);
        assert_eq!(monitor.p95_tick_duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_tick_timing() {
        let mut monitor = PerformanceMonitor::new(100);
        assert_eq!(monitor.tick_end(3), None);

        monitor.tick_start();
        std::thread::sleep(Duration::from_millis(1));
        let measured = monitor.tick_end(10);

        assert!(measured.is_some_and(|d| d >= Duration::from_millis(1)));
        assert_eq!(monitor.last_creature_count(), 10);
    }
}
