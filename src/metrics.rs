//! Prometheus-compatible engine metrics
//!
//! Atomic counters updated by the engine once per tick and rendered as
//! Prometheus text or JSON on demand.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics registry for the creature AI engine
#[derive(Debug)]
pub struct Metrics {
    // Creature counts
    pub creatures_total: AtomicU64,
    pub creatures_active: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Performance status (0=Excellent, 1=Good, 2=Warning, 3=Critical, 4=Catastrophic)
    pub performance_status: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    // Work done
    pub think_steps: AtomicU64,
    pub deferred_applied: AtomicU64,
    pub summons_placed: AtomicU64,
    pub summons_failed: AtomicU64,
    pub creatures_removed: AtomicU64,
    pub deaths: AtomicU64,
    pub ambient_lines: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            creatures_total: AtomicU64::new(0),
            creatures_active: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            performance_status: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            think_steps: AtomicU64::new(0),
            deferred_applied: AtomicU64::new(0),
            summons_placed: AtomicU64::new(0),
            summons_failed: AtomicU64::new(0),
            creatures_removed: AtomicU64::new(0),
            deaths: AtomicU64::new(0),
            ambient_lines: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn status_name(&self) -> &'static str {
        match self.performance_status.load(Ordering::Relaxed) {
            0 => "excellent",
            1 => "good",
            2 => "warning",
            3 => "critical",
            _ => "catastrophic",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("creature_ai_creatures_total", "Creatures with a brain", "gauge",
            self.creatures_total.load(Ordering::Relaxed));
        metric!("creature_ai_creatures_active", "Creatures ticked every think phase", "gauge",
            self.creatures_active.load(Ordering::Relaxed));

        metric!("creature_ai_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("creature_ai_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("creature_ai_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("creature_ai_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("creature_ai_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("creature_ai_performance_status", "Performance status (0=Excellent, 4=Catastrophic)", "gauge",
            self.performance_status.load(Ordering::Relaxed));
        metric!("creature_ai_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP creature_ai_performance_state Human-readable performance state\n# TYPE creature_ai_performance_state gauge\ncreature_ai_performance_state{{state=\"{}\"}} 1\n",
            self.status_name()
        ));

        metric!("creature_ai_think_steps_total", "Think steps run", "counter",
            self.think_steps.load(Ordering::Relaxed));
        metric!("creature_ai_deferred_applied_total", "Deferred tasks applied", "counter",
            self.deferred_applied.load(Ordering::Relaxed));
        metric!("creature_ai_summons_placed_total", "Summons placed", "counter",
            self.summons_placed.load(Ordering::Relaxed));
        metric!("creature_ai_summons_failed_total", "Summon requests without room", "counter",
            self.summons_failed.load(Ordering::Relaxed));
        metric!("creature_ai_creatures_removed_total", "Creatures removed from the world", "counter",
            self.creatures_removed.load(Ordering::Relaxed));
        metric!("creature_ai_deaths_total", "Creatures that died", "counter",
            self.deaths.load(Ordering::Relaxed));
        metric!("creature_ai_ambient_lines_total", "Generated lines spoken", "counter",
            self.ambient_lines.load(Ordering::Relaxed));
        metric!("creature_ai_uptime_seconds", "Engine uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON summary for logs and ad-hoc inspection
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "creatures": {
                "total": self.creatures_total.load(Ordering::Relaxed),
                "active": self.creatures_active.load(Ordering::Relaxed),
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_p99_us": self.tick_time_p99_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
                "status": self.performance_status.load(Ordering::Relaxed),
                "status_name": self.status_name(),
                "budget_percent": self.budget_usage_percent.load(Ordering::Relaxed),
            },
            "work": {
                "think_steps": self.think_steps.load(Ordering::Relaxed),
                "deferred_applied": self.deferred_applied.load(Ordering::Relaxed),
                "summons_placed": self.summons_placed.load(Ordering::Relaxed),
                "summons_failed": self.summons_failed.load(Ordering::Relaxed),
                "creatures_removed": self.creatures_removed.load(Ordering::Relaxed),
                "deaths": self.deaths.load(Ordering::Relaxed),
                "ambient_lines": self.ambient_lines.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.creatures_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) > 0);
        assert!(metrics.tick_time_p99_us.load(Ordering::Relaxed) >= metrics.tick_time_p95_us.load(Ordering::Relaxed));
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.creatures_total.store(50, Ordering::Relaxed);
        metrics.creatures_active.store(5, Ordering::Relaxed);
        Metrics::add(&metrics.summons_placed, 3);

        let output = metrics.to_prometheus();

        assert!(output.contains("creature_ai_creatures_total 50"));
        assert!(output.contains("creature_ai_creatures_active 5"));
        assert!(output.contains("creature_ai_summons_placed_total 3"));
        assert!(output.contains("creature_ai_performance_state{state=\"excellent\"} 1"));
        assert!(output.contains("# TYPE creature_ai_tick_count counter"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.creatures_total.store(100, Ordering::Relaxed);
        metrics.performance_status.store(3, Ordering::Relaxed);

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["creatures"]["total"], 100);
        assert_eq!(parsed["performance"]["status_name"], "critical");
    }
}
