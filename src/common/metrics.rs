//! Coordination metrics
//!
//! Atomic counters and gauges for the elector, lease and provide-data
//! cycles, rendered in Prometheus text format on `/metrics`. Also holds
//! [`NodeMetrics`], the load sample a node attaches to its heartbeat.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Load sample reported by a node with each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_usage: f64,
    pub load: f64,
}

impl NodeMetrics {
    pub fn new(cpu_usage: f64, load: f64) -> Self {
        Self { cpu_usage, load }
    }
}

/// Counter for tracking event counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Elector
    pub elector_cycles: Counter,
    pub elector_competitions_won: Counter,
    pub elector_takeovers: Counter,
    pub elector_heartbeat_failures: Counter,
    pub elector_store_errors: Counter,
    pub elector_is_leader: Gauge,

    // Leases
    pub lease_registrations: Counter,
    pub lease_renewals: Counter,
    pub lease_evictions: Counter,
    pub lease_alive_nodes: Gauge,

    // Provide data
    pub provide_data_updates: Counter,
    pub provide_data_parse_failures: Counter,
    pub provide_data_fetch_failures: Counter,
    pub provide_data_cas_conflicts: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            elector_cycles: Counter::new(),
            elector_competitions_won: Counter::new(),
            elector_takeovers: Counter::new(),
            elector_heartbeat_failures: Counter::new(),
            elector_store_errors: Counter::new(),
            elector_is_leader: Gauge::new(),
            lease_registrations: Counter::new(),
            lease_renewals: Counter::new(),
            lease_evictions: Counter::new(),
            lease_alive_nodes: Gauge::new(),
            provide_data_updates: Counter::new(),
            provide_data_parse_failures: Counter::new(),
            provide_data_fetch_failures: Counter::new(),
            provide_data_cas_conflicts: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 12] = [
            ("regcoord_elector_cycles_total", "Elector polling cycles", &self.elector_cycles),
            (
                "regcoord_elector_competitions_won_total",
                "Lock rows created by this node",
                &self.elector_competitions_won,
            ),
            (
                "regcoord_elector_takeovers_total",
                "Expired locks taken over by this node",
                &self.elector_takeovers,
            ),
            (
                "regcoord_elector_heartbeat_failures_total",
                "Failed leader heartbeats",
                &self.elector_heartbeat_failures,
            ),
            (
                "regcoord_elector_store_errors_total",
                "Store errors seen by the elector",
                &self.elector_store_errors,
            ),
            (
                "regcoord_lease_registrations_total",
                "First-time node registrations",
                &self.lease_registrations,
            ),
            ("regcoord_lease_renewals_total", "Lease renewals", &self.lease_renewals),
            ("regcoord_lease_evictions_total", "Evicted leases", &self.lease_evictions),
            (
                "regcoord_provide_data_updates_total",
                "Accepted provide-data versions",
                &self.provide_data_updates,
            ),
            (
                "regcoord_provide_data_parse_failures_total",
                "Provide-data payloads rejected by the parser",
                &self.provide_data_parse_failures,
            ),
            (
                "regcoord_provide_data_fetch_failures_total",
                "Failed provide-data fetches",
                &self.provide_data_fetch_failures,
            ),
            (
                "regcoord_provide_data_cas_conflicts_total",
                "Provide-data updates lost to a concurrent writer",
                &self.provide_data_cas_conflicts,
            ),
        ];

        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP regcoord_elector_is_leader 1 if this node holds the lock\n");
        out.push_str("# TYPE regcoord_elector_is_leader gauge\n");
        let _ = writeln!(out, "regcoord_elector_is_leader {}", self.elector_is_leader.get());

        out.push_str("# HELP regcoord_lease_alive_nodes Nodes with a live lease\n");
        out.push_str("# TYPE regcoord_lease_alive_nodes gauge\n");
        let _ = writeln!(out, "regcoord_lease_alive_nodes {}", self.lease_alive_nodes.get());

        out.push_str("# HELP regcoord_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE regcoord_uptime_seconds gauge\n");
        let _ = writeln!(out, "regcoord_uptime_seconds {}", self.uptime_seconds());

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
