//! # Metrics Registry
//!
//! Low-overhead metrics collection: counters and gauges are atomics,
//! histograms bucket under a short lock, labeled families key on their label
//! values. One registry instance lives in the service dependency struct and
//! is shared by every component.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counter family keyed by label values
#[derive(Debug)]
pub struct LabeledCounter {
    label_names: &'static [&'static str],
    values: RwLock<HashMap<Vec<String>, u64>>,
}

impl LabeledCounter {
    pub fn new(label_names: &'static [&'static str]) -> Self {
        Self {
            label_names,
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Increment the series for the given label values. The slice length must
    /// match the label set this family was declared with.
    pub fn inc(&self, label_values: &[&str]) {
        debug_assert_eq!(label_values.len(), self.label_names.len());
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        *self.values.write().entry(key).or_insert(0) += 1;
    }

    pub fn get(&self, label_values: &[&str]) -> u64 {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        self.values.read().get(&key).copied().unwrap_or(0)
    }

    fn render(&self, out: &mut String, name: &str) {
        let values = self.values.read();
        let mut series: Vec<_> = values.iter().collect();
        series.sort();
        for (labels, value) in series {
            let pairs: Vec<String> = self
                .label_names
                .iter()
                .zip(labels.iter())
                .map(|(k, v)| format!("{}=\"{}\"", k, v))
                .collect();
            out.push_str(&format!("{}{{{}}} {}\n", name, pairs.join(","), value));
        }
    }
}

/// Gauge storing an f64 behind an atomic bit pattern
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn inc(&self) {
        self.add(1.0);
    }

    pub fn dec(&self) {
        self.add(-1.0);
    }

    fn add(&self, delta: f64) {
        // CAS loop; gauges are updated rarely enough that contention is moot
        loop {
            let current = self.bits.load(Ordering::Relaxed);
            let next = (f64::from_bits(current) + delta).to_bits();
            if self
                .bits
                .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}

/// Cumulative histogram with fixed upper bounds
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    /// One count per bound plus the +Inf bucket
    counts: Vec<AtomicU64>,
    sum: Mutex<f64>,
    total: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            counts: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum: Mutex::new(0.0),
            total: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.sum.lock() += value;
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        *self.sum.lock()
    }

    fn render(&self, out: &mut String, name: &str) {
        let mut cumulative = 0u64;
        for (i, bound) in self.bounds.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            out.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bound, cumulative));
        }
        cumulative += self.counts[self.bounds.len()].load(Ordering::Relaxed);
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, cumulative));
        out.push_str(&format!("{}_sum {}\n", name, self.sum()));
        out.push_str(&format!("{}_count {}\n", name, self.count()));
    }
}

/// All metric families emitted by the service.
///
/// Names and label sets mirror the routing/cloud observability contract:
/// decisions by `(tier, reason)`, cloud requests by `(provider, model,
/// status)`, limiter blocks by `reason`, cache hits/misses by sub-tier,
/// breaker transition counters, and the latency/size histograms.
pub struct MetricsRegistry {
    // Routing
    pub routing_decisions_total: LabeledCounter,
    pub routing_decision_duration_seconds: Histogram,

    // Cloud requests
    pub cloud_requests_total: LabeledCounter,
    pub cloud_requests_failed_total: LabeledCounter,
    pub cloud_request_duration_seconds: Histogram,
    pub cloud_request_size_bytes: Histogram,
    pub cloud_response_size_bytes: Histogram,
    pub requests_in_flight: Gauge,

    // Rate limiter
    pub rate_limiter_requests_allowed_total: Counter,
    pub rate_limiter_requests_blocked_total: LabeledCounter,
    pub rate_limiter_requests_per_minute: Gauge,
    pub rate_limiter_requests_today: Gauge,
    pub rate_limiter_budget_used_usd: Gauge,
    pub rate_limiter_budget_remaining_usd: Gauge,

    // Circuit breaker
    pub circuit_breaker_state: Gauge,
    pub circuit_breaker_opened_total: Counter,
    pub circuit_breaker_success_total: Counter,
    pub circuit_breaker_failure_total: Counter,
    pub circuit_breaker_rejected_total: Counter,

    // Cache
    pub cache_hits_total: LabeledCounter,
    pub cache_misses_total: LabeledCounter,
    pub cache_errors_total: Counter,

    // Request / search latency
    pub request_duration_seconds: Histogram,
    pub search_duration_seconds: Histogram,

    // Workers
    pub jobs_completed_total: LabeledCounter,
    pub jobs_failed_total: LabeledCounter,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let latency_buckets = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
        let cloud_buckets = [0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 30.0, 60.0];
        let request_size_buckets =
            [1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0, 500_000.0, 1_000_000.0];
        let response_size_buckets = [100.0, 500.0, 1_000.0, 5_000.0, 10_000.0];
        let decision_buckets = [0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1];

        Self {
            routing_decisions_total: LabeledCounter::new(&["tier", "reason"]),
            routing_decision_duration_seconds: Histogram::new(&decision_buckets),

            cloud_requests_total: LabeledCounter::new(&["provider", "model", "status"]),
            cloud_requests_failed_total: LabeledCounter::new(&["provider", "model", "reason"]),
            cloud_request_duration_seconds: Histogram::new(&cloud_buckets),
            cloud_request_size_bytes: Histogram::new(&request_size_buckets),
            cloud_response_size_bytes: Histogram::new(&response_size_buckets),
            requests_in_flight: Gauge::new(),

            rate_limiter_requests_allowed_total: Counter::new(),
            rate_limiter_requests_blocked_total: LabeledCounter::new(&["reason"]),
            rate_limiter_requests_per_minute: Gauge::new(),
            rate_limiter_requests_today: Gauge::new(),
            rate_limiter_budget_used_usd: Gauge::new(),
            rate_limiter_budget_remaining_usd: Gauge::new(),

            circuit_breaker_state: Gauge::new(),
            circuit_breaker_opened_total: Counter::new(),
            circuit_breaker_success_total: Counter::new(),
            circuit_breaker_failure_total: Counter::new(),
            circuit_breaker_rejected_total: Counter::new(),

            cache_hits_total: LabeledCounter::new(&["tier"]),
            cache_misses_total: LabeledCounter::new(&["tier"]),
            cache_errors_total: Counter::new(),

            request_duration_seconds: Histogram::new(&latency_buckets),
            search_duration_seconds: Histogram::new(&latency_buckets),

            jobs_completed_total: LabeledCounter::new(&["queue"]),
            jobs_failed_total: LabeledCounter::new(&["queue"]),
        }
    }

    /// Render every family in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);

        self.routing_decisions_total
            .render(&mut out, "routing_decisions_total");
        self.routing_decision_duration_seconds
            .render(&mut out, "routing_decision_duration_seconds");

        self.cloud_requests_total
            .render(&mut out, "cloud_requests_total");
        self.cloud_requests_failed_total
            .render(&mut out, "cloud_requests_failed_total");
        self.cloud_request_duration_seconds
            .render(&mut out, "cloud_request_duration_seconds");
        self.cloud_request_size_bytes
            .render(&mut out, "cloud_request_size_bytes");
        self.cloud_response_size_bytes
            .render(&mut out, "cloud_response_size_bytes");
        out.push_str(&format!(
            "cloud_requests_in_flight {}\n",
            self.requests_in_flight.get()
        ));

        out.push_str(&format!(
            "rate_limiter_requests_allowed_total {}\n",
            self.rate_limiter_requests_allowed_total.get()
        ));
        self.rate_limiter_requests_blocked_total
            .render(&mut out, "rate_limiter_requests_blocked_total");
        out.push_str(&format!(
            "rate_limiter_requests_per_minute {}\n",
            self.rate_limiter_requests_per_minute.get()
        ));
        out.push_str(&format!(
            "rate_limiter_requests_today {}\n",
            self.rate_limiter_requests_today.get()
        ));
        out.push_str(&format!(
            "rate_limiter_budget_used_usd {}\n",
            self.rate_limiter_budget_used_usd.get()
        ));
        out.push_str(&format!(
            "rate_limiter_budget_remaining_usd {}\n",
            self.rate_limiter_budget_remaining_usd.get()
        ));

        out.push_str(&format!(
            "circuit_breaker_state {}\n",
            self.circuit_breaker_state.get()
        ));
        out.push_str(&format!(
            "circuit_breaker_opened_total {}\n",
            self.circuit_breaker_opened_total.get()
        ));
        out.push_str(&format!(
            "circuit_breaker_success_total {}\n",
            self.circuit_breaker_success_total.get()
        ));
        out.push_str(&format!(
            "circuit_breaker_failure_total {}\n",
            self.circuit_breaker_failure_total.get()
        ));
        out.push_str(&format!(
            "circuit_breaker_rejected_total {}\n",
            self.circuit_breaker_rejected_total.get()
        ));

        self.cache_hits_total.render(&mut out, "cache_hits_total");
        self.cache_misses_total
            .render(&mut out, "cache_misses_total");
        out.push_str(&format!(
            "cache_errors_total {}\n",
            self.cache_errors_total.get()
        ));

        self.request_duration_seconds
            .render(&mut out, "request_duration_seconds");
        self.search_duration_seconds
            .render(&mut out, "search_duration_seconds");

        self.jobs_completed_total
            .render(&mut out, "jobs_completed_total");
        self.jobs_failed_total.render(&mut out, "jobs_failed_total");

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
