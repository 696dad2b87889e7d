//! Metrics collector consumed around event dispatch.
//!
//! The dispatcher only increments counters and records observations; how
//! they are exported is up to the implementation.

use std::fmt::Write as _;

use dashmap::DashMap;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_FAILURES_TOTAL: &str = "http_request_failures_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const EVENTS_TOTAL: &str = "events_total";

/// Sink for counters and observations.
pub trait MetricsCollector: Send + Sync + 'static {
    fn increment(&self, name: &str, labels: &[(&str, &str)]);

    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn observe(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Observation {
    pub count: u64,
    pub sum: f64,
}

/// Process-local collector keyed by `name{label="value",...}`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
    observations: DashMap<String, Observation>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn observation(&self, name: &str, labels: &[(&str, &str)]) -> Option<Observation> {
        self.observations.get(&series_key(name, labels)).map(|v| *v)
    }

    /// Render every series in the Prometheus text format, sorted by key.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .counters
            .iter()
            .map(|entry| format!("{} {}", entry.key(), entry.value()))
            .collect();
        for entry in self.observations.iter() {
            let (name, labels) = split_key(entry.key());
            lines.push(format!("{name}_count{labels} {}", entry.count));
            lines.push(format!("{name}_sum{labels} {}", entry.sum));
        }
        lines.sort();

        let mut out = String::new();
        for line in lines {
            let _ = writeln!(out, "{line}");
        }
        out
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        *self.counters.entry(series_key(name, labels)).or_insert(0) += 1;
    }

    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut entry = self
            .observations
            .entry(series_key(name, labels))
            .or_default();
        entry.count += 1;
        entry.sum += value;
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}

fn split_key(key: &str) -> (&str, &str) {
    match key.find('{') {
        Some(idx) => key.split_at(idx),
        None => (key, ""),
    }
}
