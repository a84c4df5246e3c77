// src/metrics/mod.rs
use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Owns the prometheus registry; hand its collector to every balancer
/// that should report into it.
pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);
        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(%err, "failed to encode metrics");
        }
        buffer
    }
}

/// Selection and maintenance counters, labeled by balancer name.
pub struct MetricsCollector {
    pub choose_total: IntCounterVec,
    pub zone_affinity_override_total: IntCounterVec,
    pub zone_evictions_total: IntCounterVec,
    pub list_refresh_failures_total: IntCounterVec,
    pub server_pool_size: IntGaugeVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let choose_total = IntCounterVec::new(
            Opts::new("lb_choose_total", "Server selections by outcome"),
            &["client", "outcome"],
        )?;
        registry.register(Box::new(choose_total.clone()))?;

        let zone_affinity_override_total = IntCounterVec::new(
            Opts::new(
                "lb_zone_affinity_override_total",
                "Times the zone affinity filter fell back to the full list",
            ),
            &["client"],
        )?;
        registry.register(Box::new(zone_affinity_override_total.clone()))?;

        let zone_evictions_total = IntCounterVec::new(
            Opts::new(
                "lb_zone_evictions_total",
                "Zones evicted by the avoidance algorithm",
            ),
            &["client", "zone"],
        )?;
        registry.register(Box::new(zone_evictions_total.clone()))?;

        let list_refresh_failures_total = IntCounterVec::new(
            Opts::new(
                "lb_list_refresh_failures_total",
                "Server list refreshes that failed and kept the old list",
            ),
            &["client"],
        )?;
        registry.register(Box::new(list_refresh_failures_total.clone()))?;

        let server_pool_size = IntGaugeVec::new(
            Opts::new("lb_server_pool_size", "Servers known to the balancer"),
            &["client", "state"],
        )?;
        registry.register(Box::new(server_pool_size.clone()))?;

        Ok(Self {
            choose_total,
            zone_affinity_override_total,
            zone_evictions_total,
            list_refresh_failures_total,
            server_pool_size,
        })
    }

    pub fn record_choose(&self, client: &str, chosen: bool) {
        let outcome = if chosen { "chosen" } else { "none" };
        self.choose_total.with_label_values(&[client, outcome]).inc();
    }

    pub fn record_affinity_override(&self, client: &str) {
        self.zone_affinity_override_total
            .with_label_values(&[client])
            .inc();
    }

    pub fn record_zone_eviction(&self, client: &str, zone: &str) {
        self.zone_evictions_total
            .with_label_values(&[client, zone])
            .inc();
    }

    pub fn record_refresh_failure(&self, client: &str) {
        self.list_refresh_failures_total
            .with_label_values(&[client])
            .inc();
    }

    pub fn update_pool_size(&self, client: &str, all: usize, up: usize) {
        self.server_pool_size
            .with_label_values(&[client, "all"])
            .set(all as i64);
        self.server_pool_size
            .with_label_values(&[client, "up"])
            .set(up as i64);
    }
}
