use std::collections::BTreeMap;
use std::sync::Mutex;

/// Metric labels as `(key, value)` pairs.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Counter/histogram collector. Exporters live outside this crate.
pub trait MetricsCollector: Send + Sync {
    fn increment(&self, counter: &str, n: u64, labels: Labels<'_>);

    fn observe(&self, histogram: &str, value: f64, labels: Labels<'_>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn increment(&self, _counter: &str, _n: u64, _labels: Labels<'_>) {}

    fn observe(&self, _histogram: &str, _value: f64, _labels: Labels<'_>) {}
}

/// Keeps counters and observations in memory (tests/dev).
///
/// Series are keyed by metric name plus sorted labels, e.g.
/// `cronq_attempts_total{job=nightly,source=cron}`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
    histograms: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of a counter across all label sets.
    pub fn counter_total(&self, counter: &str) -> u64 {
        let Ok(counters) = self.counters.lock() else {
            return 0;
        };
        counters
            .iter()
            .filter(|(key, _)| series_name(key) == counter)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Value of one exact series.
    pub fn counter(&self, counter: &str, labels: Labels<'_>) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|c| c.get(&series_key(counter, labels)).copied())
            .unwrap_or(0)
    }

    /// All observations of a histogram across label sets.
    pub fn observations(&self, histogram: &str) -> Vec<f64> {
        let Ok(histograms) = self.histograms.lock() else {
            return Vec::new();
        };
        histograms
            .iter()
            .filter(|(key, _)| series_name(key) == histogram)
            .flat_map(|(_, v)| v.iter().copied())
            .collect()
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn increment(&self, counter: &str, n: u64, labels: Labels<'_>) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(series_key(counter, labels)).or_insert(0) += n;
        }
    }

    fn observe(&self, histogram: &str, value: f64, labels: Labels<'_>) {
        if let Ok(mut histograms) = self.histograms.lock() {
            histograms
                .entry(series_key(histogram, labels))
                .or_default()
                .push(value);
        }
    }
}

fn series_key(name: &str, labels: Labels<'_>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    format!("{name}{{{}}}", pairs.join(","))
}

fn series_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}
