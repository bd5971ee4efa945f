use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

/// A lightweight, thread-safe metrics registry that renders in
/// Prometheus text exposition format. Counters and gauges come into
/// existence on first touch; `describe_*` attaches help text.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Counter>>,
    gauges: RwLock<BTreeMap<String, Gauge>>,
}

#[derive(Default)]
struct Counter {
    value: AtomicU64,
    help: String,
}

#[derive(Default)]
struct Gauge {
    value: AtomicI64,
    help: String,
}

/// Counter names used by the control plane.
pub const RECONCILE_ERRORS: &str = "stratus_reconcile_errors_total";
pub const INVARIANT_VIOLATIONS: &str = "stratus_invariant_violations_total";
pub const PROVISIONS_DISPATCHED: &str = "stratus_provisions_dispatched_total";
pub const DEPROVISIONS_DISPATCHED: &str = "stratus_deprovisions_dispatched_total";
pub const CALLBACKS_RECEIVED: &str = "stratus_callbacks_received_total";
pub const CALLBACKS_REJECTED: &str = "stratus_callbacks_rejected_total";

/// Gauge names used by the control plane.
pub const WORKQUEUE_DEPTH: &str = "stratus_workqueue_depth";
pub const BROKERS_KNOWN: &str = "stratus_brokers_known";

/// Process-wide registry with help text for the control-plane metrics.
pub fn global() -> &'static MetricsRegistry {
    static REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = MetricsRegistry::new();
        registry.describe_counter(RECONCILE_ERRORS, "Reconcile invocations that returned an error");
        registry.describe_counter(
            INVARIANT_VIOLATIONS,
            "Invariant violations requiring operator attention",
        );
        registry.describe_counter(PROVISIONS_DISPATCHED, "Provision requests accepted by brokers");
        registry.describe_counter(
            DEPROVISIONS_DISPATCHED,
            "Deprovision requests accepted by brokers",
        );
        registry.describe_counter(CALLBACKS_RECEIVED, "Signed callbacks accepted and applied");
        registry.describe_counter(CALLBACKS_REJECTED, "Callbacks rejected at the HTTP layer");
        registry.describe_gauge(WORKQUEUE_DEPTH, "Items waiting in reconcile work queues");
        registry.describe_gauge(BROKERS_KNOWN, "Brokers in the registry cache");
        registry
    })
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Attach help text to a counter, creating it if needed.
    pub fn describe_counter(&self, name: &str, help: &str) {
        let mut counters = self.counters.write().unwrap();
        counters.entry(name.to_string()).or_default().help = help.to_string();
    }

    /// Attach help text to a gauge, creating it if needed.
    pub fn describe_gauge(&self, name: &str, help: &str) {
        let mut gauges = self.gauges.write().unwrap();
        gauges.entry(name.to_string()).or_default().help = help.to_string();
    }

    /// Increment a counter by 1.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Increment a counter by a given amount.
    pub fn counter_add(&self, name: &str, val: u64) {
        // Fast path: the counter already exists.
        {
            let counters = self.counters.read().unwrap();
            if let Some(c) = counters.get(name) {
                c.value.fetch_add(val, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(name.to_string())
            .or_default()
            .value
            .fetch_add(val, Ordering::Relaxed);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, val: i64) {
        {
            let gauges = self.gauges.read().unwrap();
            if let Some(g) = gauges.get(name) {
                g.value.store(val, Ordering::Relaxed);
                return;
            }
        }
        let mut gauges = self.gauges.write().unwrap();
        gauges
            .entry(name.to_string())
            .or_default()
            .value
            .store(val, Ordering::Relaxed);
    }

    /// Add a (possibly negative) delta to a gauge.
    pub fn gauge_add(&self, name: &str, delta: i64) {
        {
            let gauges = self.gauges.read().unwrap();
            if let Some(g) = gauges.get(name) {
                g.value.fetch_add(delta, Ordering::Relaxed);
                return;
            }
        }
        let mut gauges = self.gauges.write().unwrap();
        gauges
            .entry(name.to_string())
            .or_default()
            .value
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read().unwrap();
        for (name, counter) in counters.iter() {
            if !counter.help.is_empty() {
                output.push_str(&format!("# HELP {} {}\n", name, counter.help));
            }
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!(
                "{} {}\n",
                name,
                counter.value.load(Ordering::Relaxed)
            ));
        }

        let gauges = self.gauges.read().unwrap();
        for (name, gauge) in gauges.iter() {
            if !gauge.help.is_empty() {
                output.push_str(&format!("# HELP {} {}\n", name, gauge.help));
            }
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!(
                "{} {}\n",
                name,
                gauge.value.load(Ordering::Relaxed)
            ));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
