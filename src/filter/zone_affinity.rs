// src/filter/zone_affinity.rs
use crate::config::DynamicConfig;
use crate::filter::ServerListFilter;
use crate::metrics::MetricsCollector;
use crate::predicate::{PredicateKey, ServerPredicate, ZoneAffinityPredicate};
use crate::server::Server;
use crate::stats::LoadBalancerStats;
use std::sync::Arc;
use tracing::debug;

/// Keeps only the servers in this client's own zone, unless doing so
/// would leave the client on a sick slice of the farm.
///
/// Affinity is abandoned (the unfiltered list is returned) when the
/// same-zone servers are mostly blacked out, overloaded, or simply too
/// few, so a zone failure never strands the client.
pub struct ZoneAffinityServerListFilter {
    config: DynamicConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ZoneAffinityServerListFilter {
    pub fn new(config: DynamicConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn should_enable_zone_affinity(
        &self,
        filtered: &[Arc<Server>],
        stats: &LoadBalancerStats,
    ) -> bool {
        let config = self.config.snapshot();
        if !config.enable_zone_affinity && !config.enable_zone_exclusivity {
            return false;
        }
        if config.enable_zone_exclusivity {
            return true;
        }
        let snapshot = stats.zone_snapshot_of(filtered);
        if snapshot.instance_count == 0 {
            return false;
        }
        let load_per_server = snapshot.load_per_server;
        let instance_count = snapshot.instance_count;
        let tripped = snapshot.circuit_tripped_count;
        let blackout_ratio = tripped as f64 / instance_count as f64;
        let available = instance_count - tripped;
        let guard = &config.zone_affinity;
        if blackout_ratio >= guard.max_blackout_server_percentage
            || load_per_server >= guard.max_load_per_server
            || (available as u32) < guard.min_available_servers
        {
            debug!(
                blackout_ratio,
                load_per_server, available, "zone affinity overridden"
            );
            false
        } else {
            true
        }
    }
}

impl ServerListFilter for ZoneAffinityServerListFilter {
    fn filtered_list(
        &self,
        servers: Vec<Arc<Server>>,
        stats: &LoadBalancerStats,
    ) -> Vec<Arc<Server>> {
        let config = self.config.snapshot();
        let Some(zone) = config.zone.as_deref() else {
            return servers;
        };
        if (!config.enable_zone_affinity && !config.enable_zone_exclusivity) || servers.is_empty()
        {
            return servers;
        }
        let predicate = ZoneAffinityPredicate::new(zone);
        let filtered: Vec<Arc<Server>> = servers
            .iter()
            .filter(|server| {
                predicate.apply(
                    stats,
                    &PredicateKey {
                        server: *server,
                        load_balancer_key: None,
                    },
                )
            })
            .cloned()
            .collect();
        if self.should_enable_zone_affinity(&filtered, stats) {
            filtered
        } else {
            if config.enable_zone_affinity {
                if let Some(metrics) = &self.metrics {
                    metrics.record_affinity_override(stats.name());
                }
            }
            servers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ServerStatsConfig};

    fn config(affinity: bool, exclusive: bool) -> DynamicConfig {
        let mut config = ClientConfig::default();
        config.zone = Some("z1".to_string());
        config.enable_zone_affinity = affinity;
        config.enable_zone_exclusivity = exclusive;
        DynamicConfig::new(config)
    }

    fn pool() -> Vec<Arc<Server>> {
        vec![
            Arc::new(Server::new("a", 80).with_zone("z1")),
            Arc::new(Server::new("b", 80).with_zone("z1")),
            Arc::new(Server::new("c", 80).with_zone("z1")),
            Arc::new(Server::new("d", 80).with_zone("z2")),
            Arc::new(Server::new("e", 80).with_zone("z2")),
        ]
    }

    fn stats() -> LoadBalancerStats {
        LoadBalancerStats::new("test", ServerStatsConfig::default())
    }

    #[test]
    fn disabled_affinity_passes_everything_through() {
        let filter = ZoneAffinityServerListFilter::new(config(false, false));
        let filtered = filter.filtered_list(pool(), &stats());
        assert_eq!(filtered.len(), 5);
    }

    #[test]
    fn affinity_keeps_own_zone_when_healthy() {
        let filter = ZoneAffinityServerListFilter::new(config(true, false));
        let filtered = filter.filtered_list(pool(), &stats());
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|s| s.zone() == Some("z1")));
    }

    #[test]
    fn affinity_abandoned_when_too_many_breakers_trip() {
        let stats = stats();
        let servers = pool();
        // trip every z1 server
        for server in servers.iter().filter(|s| s.zone() == Some("z1")) {
            for _ in 0..3 {
                stats.note_connection_failure(server);
            }
        }
        let filter = ZoneAffinityServerListFilter::new(config(true, false));
        let filtered = filter.filtered_list(servers, &stats);
        assert_eq!(filtered.len(), 5);
    }

    #[test]
    fn affinity_abandoned_when_too_few_servers_remain() {
        let stats = stats();
        let servers = vec![
            Arc::new(Server::new("a", 80).with_zone("z1")),
            Arc::new(Server::new("d", 80).with_zone("z2")),
            Arc::new(Server::new("e", 80).with_zone("z2")),
        ];
        // one same-zone server is below the min-available threshold of 2
        let filter = ZoneAffinityServerListFilter::new(config(true, false));
        let filtered = filter.filtered_list(servers, &stats);
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn affinity_abandoned_under_load() {
        let stats = stats();
        let servers = pool();
        // z1 load per server: 3 active / 3 servers = 1.0 >= 0.6
        for server in servers.iter().filter(|s| s.zone() == Some("z1")) {
            stats.note_request_start(server);
        }
        let filter = ZoneAffinityServerListFilter::new(config(true, false));
        let filtered = filter.filtered_list(servers, &stats);
        assert_eq!(filtered.len(), 5);
    }

    #[test]
    fn exclusivity_always_filters() {
        let stats = stats();
        let servers = vec![
            Arc::new(Server::new("a", 80).with_zone("z1")),
            Arc::new(Server::new("d", 80).with_zone("z2")),
        ];
        let filter = ZoneAffinityServerListFilter::new(config(false, true));
        let filtered = filter.filtered_list(servers, &stats);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].zone(), Some("z1"));
    }
}
