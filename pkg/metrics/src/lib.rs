use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static REGISTRY: LazyLock<MetricsRegistry> = LazyLock::new(MetricsRegistry::with_defaults);

/// Process-wide registry rendered by the `/metrics` endpoint.
pub fn metrics() -> &'static MetricsRegistry {
    &REGISTRY
}

/// A lightweight, thread-safe metrics registry that renders in Prometheus text exposition format.
///
/// Series are created on first use; a metric family's help text must be
/// registered up front for it to be rendered with `# HELP`.
pub struct MetricsRegistry {
    help: RwLock<BTreeMap<String, (String, Kind)>>,
    counters: RwLock<BTreeMap<String, BTreeMap<String, AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, BTreeMap<String, AtomicI64>>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Counter,
    Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            help: RwLock::new(BTreeMap::new()),
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry with every metric family kobs emits.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_counter("kobs_requests_total", "HTTP requests served");
        registry.register_counter(
            "kobs_aggregator_cluster_errors_total",
            "Per-cluster failures during fleet aggregation",
        );
        registry.register_counter("kobs_cache_hits_total", "Fresh refreshing-cache reads");
        registry.register_counter("kobs_cache_stale_total", "Stale refreshing-cache reads");
        registry.register_counter("kobs_cache_misses_total", "Refreshing-cache misses");
        registry.register_counter(
            "kobs_cache_refresh_failures_total",
            "Failed background cache refreshes",
        );
        registry.register_counter("kobs_topology_builds_total", "Global topology builds");
        registry.register_gauge("kobs_clusters", "Clusters known to the registry");
        registry
    }

    /// Register a counter family. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str) {
        self.help
            .write()
            .entry(name.to_string())
            .or_insert_with(|| (help.to_string(), Kind::Counter));
    }

    /// Register a gauge family. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        self.help
            .write()
            .entry(name.to_string())
            .or_insert_with(|| (help.to_string(), Kind::Gauge));
    }

    /// Increment a counter by 1.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add_with(name, &[], 1);
    }

    pub fn counter_inc_with(&self, name: &str, labels: &[(&str, &str)]) {
        self.counter_add_with(name, labels, 1);
    }

    /// Increment a labelled counter by a given amount.
    pub fn counter_add_with(&self, name: &str, labels: &[(&str, &str)], val: u64) {
        let series = render_labels(labels);
        if let Some(c) = self.counters.read().get(name).and_then(|f| f.get(&series)) {
            c.fetch_add(val, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .entry(series)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(val, Ordering::Relaxed);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, val: i64) {
        self.gauges
            .write()
            .entry(name.to_string())
            .or_default()
            .entry(String::new())
            .or_insert_with(|| AtomicI64::new(0))
            .store(val, Ordering::Relaxed);
    }

    /// Current value of a counter series, mostly for tests.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .get(name)
            .and_then(|f| f.get(&render_labels(labels)))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();
        let help = self.help.read();

        for (name, series) in self.counters.read().iter() {
            write_header(&mut output, name, help.get(name), "counter");
            for (labels, value) in series {
                let _ = writeln!(output, "{}{} {}", name, labels, value.load(Ordering::Relaxed));
            }
        }

        for (name, series) in self.gauges.read().iter() {
            write_header(&mut output, name, help.get(name), "gauge");
            for (labels, value) in series {
                let _ = writeln!(output, "{}{} {}", name, labels, value.load(Ordering::Relaxed));
            }
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn write_header(output: &mut String, name: &str, help: Option<&(String, Kind)>, kind: &str) {
    if let Some((help, _)) = help {
        let _ = writeln!(output, "# HELP {} {}", name, help);
    }
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
}

fn render_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_labelled_counters() {
        let registry = MetricsRegistry::new();
        registry.register_counter("kobs_cache_hits_total", "hits");
        registry.counter_inc_with("kobs_cache_hits_total", &[("keyspace", "topology")]);
        registry.counter_add_with("kobs_cache_hits_total", &[("keyspace", "topology")], 2);

        let out = registry.render();
        assert!(out.contains("# HELP kobs_cache_hits_total hits\n"));
        assert!(out.contains("# TYPE kobs_cache_hits_total counter\n"));
        assert!(out.contains("kobs_cache_hits_total{keyspace=\"topology\"} 3\n"));
    }

    #[test]
    fn renders_gauges() {
        let registry = MetricsRegistry::new();
        registry.register_gauge("kobs_clusters", "clusters");
        registry.gauge_set("kobs_clusters", 4);
        assert!(registry.render().contains("kobs_clusters 4\n"));
    }

    #[test]
    fn escapes_label_values() {
        assert_eq!(render_labels(&[("cluster", "a\"b")]), "{cluster=\"a\\\"b\"}");
    }
}
