// src/predicate/availability.rs
use crate::config::DynamicConfig;
use crate::predicate::{PredicateKey, ServerPredicate};
use crate::stats::LoadBalancerStats;
use std::time::Instant;

/// Rejects servers whose circuit breaker is tripped or that already carry
/// too many concurrent requests from this client.
///
/// Both knobs are dynamic: `filterCircuitTripped` (default true) and
/// `activeConnectionsLimit` (default unbounded).
#[derive(Debug, Clone)]
pub struct AvailabilityPredicate {
    config: DynamicConfig,
}

impl AvailabilityPredicate {
    pub fn new(config: DynamicConfig) -> Self {
        Self { config }
    }
}

impl ServerPredicate for AvailabilityPredicate {
    fn apply(&self, stats: &LoadBalancerStats, key: &PredicateKey<'_>) -> bool {
        let snapshot = self.config.snapshot();
        let server_stats = stats.single_server_stat(key.server);
        let now = Instant::now();
        if snapshot.availability_filtering.filter_circuit_tripped
            && server_stats.is_circuit_breaker_tripped(now)
        {
            return false;
        }
        let limit = snapshot
            .availability_filtering
            .active_connections_limit
            .unwrap_or(i64::MAX);
        server_stats.active_requests_count(now) < limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ServerStatsConfig};
    use crate::server::Server;
    use std::sync::Arc;

    fn setup() -> (LoadBalancerStats, Arc<Server>) {
        (
            LoadBalancerStats::new("test", ServerStatsConfig::default()),
            Arc::new(Server::new("a", 80)),
        )
    }

    fn key<'a>(server: &'a Arc<Server>) -> PredicateKey<'a> {
        PredicateKey {
            server,
            load_balancer_key: None,
        }
    }

    #[test]
    fn accepts_healthy_server() {
        let (stats, server) = setup();
        let predicate = AvailabilityPredicate::new(DynamicConfig::default());
        assert!(predicate.apply(&stats, &key(&server)));
    }

    #[test]
    fn rejects_tripped_breaker() {
        let (stats, server) = setup();
        for _ in 0..3 {
            stats.note_connection_failure(&server);
        }
        let predicate = AvailabilityPredicate::new(DynamicConfig::default());
        assert!(!predicate.apply(&stats, &key(&server)));
    }

    #[test]
    fn tripped_breaker_passes_when_filtering_disabled() {
        let (stats, server) = setup();
        for _ in 0..3 {
            stats.note_connection_failure(&server);
        }
        let mut config = ClientConfig::default();
        config.availability_filtering.filter_circuit_tripped = false;
        let predicate = AvailabilityPredicate::new(DynamicConfig::new(config));
        assert!(predicate.apply(&stats, &key(&server)));
    }

    #[test]
    fn rejects_server_at_connection_limit() {
        let (stats, server) = setup();
        stats.note_request_start(&server);
        stats.note_request_start(&server);
        let mut config = ClientConfig::default();
        config.availability_filtering.active_connections_limit = Some(2);
        let predicate = AvailabilityPredicate::new(DynamicConfig::new(config));
        assert!(!predicate.apply(&stats, &key(&server)));

        stats.note_request_end(&server, 5.0, true);
        assert!(predicate.apply(&stats, &key(&server)));
    }
}
