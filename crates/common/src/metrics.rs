use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

/// Process-wide scheduler metrics registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    tasks_dispatched: CounterVec,
    tasks_running: GaugeVec,
    task_failures: CounterVec,
    active_executors: Gauge,
    repredictions: prometheus::Counter,
    speculative_launches: prometheus::Counter,
}

impl MetricsRegistry {
    /// Builds a registry with all scheduler metric families registered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Counts one dispatched task for `stage_id` under the named policy.
    pub fn inc_tasks_dispatched(&self, stage_id: u32, policy: &str) {
        self.inner
            .tasks_dispatched
            .with_label_values(&[&stage_id.to_string(), policy])
            .inc();
    }

    /// Sets the currently running task count for `stage_id`.
    pub fn set_tasks_running(&self, stage_id: u32, running: u64) {
        self.inner
            .tasks_running
            .with_label_values(&[&stage_id.to_string()])
            .set(running as f64);
    }

    /// Counts one terminal task failure for `stage_id`.
    pub fn inc_task_failures(&self, stage_id: u32) {
        self.inner
            .task_failures
            .with_label_values(&[&stage_id.to_string()])
            .inc();
    }

    /// Sets the number of known-live executors.
    pub fn set_active_executors(&self, count: u64) {
        self.inner.active_executors.set(count as f64);
    }

    /// Counts one oracle re-prediction issued by a placement fallback.
    pub fn inc_repredictions(&self) {
        self.inner.repredictions.inc();
    }

    /// Counts one speculative duplicate launch.
    pub fn inc_speculative_launches(&self) {
        self.inner.speculative_launches.inc();
    }

    /// Renders all registered families in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let tasks_dispatched = counter_vec(
            &registry,
            "fg_scheduler_tasks_dispatched_total",
            "Tasks dispatched to workers",
            &["stage_id", "policy"],
        );
        let tasks_running = gauge_vec(
            &registry,
            "fg_scheduler_tasks_running",
            "Currently running tasks",
            &["stage_id"],
        );
        let task_failures = counter_vec(
            &registry,
            "fg_scheduler_task_failures_total",
            "Terminal task failures",
            &["stage_id"],
        );
        let active_executors = gauge(
            &registry,
            "fg_scheduler_active_executors",
            "Known-live executors",
        );
        let repredictions = counter(
            &registry,
            "fg_scheduler_repredictions_total",
            "Oracle re-predictions issued by placement fallbacks",
        );
        let speculative_launches = counter(
            &registry,
            "fg_scheduler_speculative_launches_total",
            "Speculative duplicate task launches",
        );

        Self {
            registry,
            tasks_dispatched,
            tasks_running,
            task_failures,
            active_executors,
            repredictions,
            speculative_launches,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Gauge {
    let g = Gauge::new(name, help).expect("gauge");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Counter {
    let c = prometheus::Counter::new(name, help).expect("counter");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-wide registry shared by all scheduler instances.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.inc_tasks_dispatched(3, "ppa");
        let text = m.render_prometheus();
        assert!(text.contains("fg_scheduler_tasks_dispatched_total"));
        assert!(text.contains("ppa"));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.inc_tasks_dispatched(1, "default");
        m.set_tasks_running(1, 2);
        m.inc_task_failures(1);
        m.set_active_executors(4);
        m.inc_repredictions();
        m.inc_speculative_launches();
        let text = m.render_prometheus();

        assert!(text.contains("fg_scheduler_tasks_dispatched_total"));
        assert!(text.contains("fg_scheduler_tasks_running"));
        assert!(text.contains("fg_scheduler_task_failures_total"));
        assert!(text.contains("fg_scheduler_active_executors"));
        assert!(text.contains("fg_scheduler_repredictions_total"));
        assert!(text.contains("fg_scheduler_speculative_launches_total"));
    }
}
