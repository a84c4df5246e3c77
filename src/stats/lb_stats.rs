// src/stats/lb_stats.rs
use crate::config::ServerStatsConfig;
use crate::server::Server;
use crate::stats::ServerStats;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Point-in-time aggregate over the servers of one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSnapshot {
    pub instance_count: usize,
    pub active_requests_count: i64,
    pub circuit_tripped_count: usize,
    pub load_per_server: f64,
}

impl ZoneSnapshot {
    fn empty() -> Self {
        Self {
            instance_count: 0,
            active_requests_count: 0,
            circuit_tripped_count: 0,
            load_per_server: 0.0,
        }
    }
}

/// Registry of per-server statistics plus the zone topology of the
/// current server list.
///
/// Stats entries are created on first observation of a server and evicted
/// lazily once the server has been absent from the list for the
/// configured expiry.
#[derive(Debug)]
pub struct LoadBalancerStats {
    name: String,
    config: ServerStatsConfig,
    server_stats: DashMap<String, Arc<ServerStats>>,
    absent_since: DashMap<String, Instant>,
    zone_servers: DashMap<String, Vec<Arc<Server>>>,
    zone_absent_since: DashMap<String, Instant>,
}

impl LoadBalancerStats {
    pub fn new(name: impl Into<String>, config: ServerStatsConfig) -> Self {
        Self {
            name: name.into(),
            config,
            server_stats: DashMap::new(),
            absent_since: DashMap::new(),
            zone_servers: DashMap::new(),
            zone_absent_since: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stats for one server, created on first observation.
    pub fn single_server_stat(&self, server: &Server) -> Arc<ServerStats> {
        self.server_stats
            .entry(server.id().to_string())
            .or_insert_with(|| Arc::new(ServerStats::new(self.config.clone())))
            .clone()
    }

    pub fn note_request_start(&self, server: &Server) {
        self.single_server_stat(server)
            .increment_active_requests(Instant::now());
    }

    pub fn note_request_end(&self, server: &Server, response_time_ms: f64, success: bool) {
        let stats = self.single_server_stat(server);
        let now = Instant::now();
        stats.decrement_active_requests(now);
        stats.note_response_time(response_time_ms);
        if success {
            stats.clear_successive_connection_failures();
        }
    }

    pub fn note_connection_failure(&self, server: &Server) {
        self.single_server_stat(server)
            .note_connection_failure(Instant::now());
    }

    /// Zones currently known to this balancer, in no particular order.
    pub fn available_zones(&self) -> Vec<String> {
        self.zone_servers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Rebuild the zone → servers mapping from a freshly published list
    /// and run lazy stats eviction.
    ///
    /// A zone that vanishes from the list keeps an entry with an empty
    /// server vector (the zone-aware balancer relies on that to reset the
    /// sub-balancer of a drained zone) until it has been absent for the
    /// stats expiry, after which the entry is dropped like any departed
    /// server's stats.
    pub fn update_server_list(&self, servers: &[Arc<Server>]) {
        let now = Instant::now();
        let mut zones: std::collections::HashMap<String, Vec<Arc<Server>>> =
            std::collections::HashMap::new();
        for server in servers {
            zones
                .entry(server.zone_or_unknown().to_ascii_lowercase())
                .or_default()
                .push(Arc::clone(server));
        }
        let stale_zones: Vec<String> = self
            .zone_servers
            .iter()
            .filter(|entry| !zones.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        let expiry = self.config.stats_expiry();
        for zone in stale_zones {
            let absent_since = *self.zone_absent_since.entry(zone.clone()).or_insert(now);
            if now.saturating_duration_since(absent_since) >= expiry {
                debug!(balancer = %self.name, %zone, "dropping long-vanished zone");
                self.forget_zone(&zone);
            } else {
                self.zone_servers.insert(zone, Vec::new());
            }
        }
        for (zone, list) in zones {
            self.zone_absent_since.remove(&zone);
            self.zone_servers.insert(zone, list);
        }
        self.evict_departed(servers);
    }

    /// Drop a zone entirely; called once a vanished zone ages past the
    /// stats expiry, or by embedders that know a zone is gone for good.
    pub fn forget_zone(&self, zone: &str) {
        let zone = zone.to_ascii_lowercase();
        self.zone_servers.remove(&zone);
        self.zone_absent_since.remove(&zone);
    }

    fn evict_departed(&self, servers: &[Arc<Server>]) {
        let now = Instant::now();
        let current: HashSet<&str> = servers.iter().map(|s| s.id()).collect();
        let known: Vec<String> = self
            .server_stats
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in known {
            if current.contains(id.as_str()) {
                self.absent_since.remove(&id);
            } else {
                self.absent_since.entry(id).or_insert(now);
            }
        }
        let expiry = self.config.stats_expiry();
        let expired: Vec<String> = self
            .absent_since
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) >= expiry)
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            debug!(balancer = %self.name, server = %id, "evicting stats for departed server");
            self.absent_since.remove(&id);
            self.server_stats.remove(&id);
        }
    }

    /// Aggregate snapshot for one zone.
    pub fn zone_snapshot(&self, zone: &str) -> ZoneSnapshot {
        match self.zone_servers.get(&zone.to_ascii_lowercase()) {
            Some(servers) => self.zone_snapshot_of(servers.value()),
            None => ZoneSnapshot::empty(),
        }
    }

    /// Aggregate snapshot over an arbitrary subset of servers.
    pub fn zone_snapshot_of(&self, servers: &[Arc<Server>]) -> ZoneSnapshot {
        if servers.is_empty() {
            return ZoneSnapshot::empty();
        }
        let now = Instant::now();
        let instance_count = servers.len();
        let mut active_requests_count = 0i64;
        let mut circuit_tripped_count = 0usize;
        for server in servers {
            let stats = self.single_server_stat(server);
            active_requests_count += stats.active_requests_count(now);
            if stats.is_circuit_breaker_tripped(now) {
                circuit_tripped_count += 1;
            }
        }
        let available = instance_count.saturating_sub(circuit_tripped_count).max(1);
        ZoneSnapshot {
            instance_count,
            active_requests_count,
            circuit_tripped_count,
            load_per_server: active_requests_count as f64 / available as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: u16, zone: &str) -> Arc<Server> {
        Arc::new(Server::new("host", id).with_zone(zone))
    }

    fn lb_stats() -> LoadBalancerStats {
        LoadBalancerStats::new("test", ServerStatsConfig::default())
    }

    #[test]
    fn stats_created_on_first_observation() {
        let stats = lb_stats();
        let a = server(1, "us-east-1a");
        let first = stats.single_server_stat(&a);
        let second = stats.single_server_stat(&a);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn request_lifecycle_updates_counters() {
        let stats = lb_stats();
        let a = server(1, "us-east-1a");
        stats.note_request_start(&a);
        stats.note_request_start(&a);
        let s = stats.single_server_stat(&a);
        assert_eq!(s.active_requests_count(Instant::now()), 2);
        stats.note_request_end(&a, 12.0, true);
        assert_eq!(s.active_requests_count(Instant::now()), 1);
        assert!(s.response_time_avg() > 0.0);
    }

    #[test]
    fn zone_mapping_follows_list_updates() {
        let stats = lb_stats();
        let list = vec![server(1, "us-east-1a"), server(2, "us-east-1a"), server(3, "us-west-2b")];
        stats.update_server_list(&list);
        let mut zones = stats.available_zones();
        zones.sort();
        assert_eq!(zones, vec!["us-east-1a", "us-west-2b"]);
        assert_eq!(stats.zone_snapshot("us-east-1a").instance_count, 2);
        assert_eq!(stats.zone_snapshot("US-EAST-1A").instance_count, 2);
    }

    #[test]
    fn vanished_zone_keeps_empty_entry_within_the_expiry() {
        let stats = lb_stats();
        stats.update_server_list(&[server(1, "us-east-1a"), server(2, "us-west-2b")]);
        stats.update_server_list(&[server(1, "us-east-1a")]);
        let mut zones = stats.available_zones();
        zones.sort();
        assert_eq!(zones, vec!["us-east-1a", "us-west-2b"]);
        assert_eq!(stats.zone_snapshot("us-west-2b").instance_count, 0);
        stats.forget_zone("us-west-2b");
        assert_eq!(stats.available_zones(), vec!["us-east-1a"]);
    }

    #[test]
    fn vanished_zone_ages_out_with_the_stats_expiry() {
        let mut config = ServerStatsConfig::default();
        config.expire_minutes = 0;
        let stats = LoadBalancerStats::new("test", config);
        stats.update_server_list(&[server(1, "us-east-1a"), server(2, "us-west-2b")]);
        // next refresh without the zone crosses the zero-length expiry
        stats.update_server_list(&[server(1, "us-east-1a")]);
        assert_eq!(stats.available_zones(), vec!["us-east-1a"]);
    }

    #[test]
    fn returning_zone_resets_its_absence_clock() {
        let stats = lb_stats();
        stats.update_server_list(&[server(1, "us-east-1a"), server(2, "us-west-2b")]);
        stats.update_server_list(&[server(1, "us-east-1a")]);
        stats.update_server_list(&[server(1, "us-east-1a"), server(2, "us-west-2b")]);
        assert_eq!(stats.zone_snapshot("us-west-2b").instance_count, 1);
        assert!(stats.zone_absent_since.is_empty());
    }

    #[test]
    fn snapshot_counts_tripped_breakers_and_load() {
        let stats = lb_stats();
        let healthy = server(1, "z1");
        let broken = server(2, "z1");
        stats.update_server_list(&[Arc::clone(&healthy), Arc::clone(&broken)]);
        for _ in 0..3 {
            stats.note_connection_failure(&broken);
        }
        stats.note_request_start(&healthy);
        let snapshot = stats.zone_snapshot("z1");
        assert_eq!(snapshot.instance_count, 2);
        assert_eq!(snapshot.circuit_tripped_count, 1);
        assert_eq!(snapshot.active_requests_count, 1);
        // one available server carries the whole load
        assert!((snapshot.load_per_server - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_of_empty_subset_is_all_zero() {
        let stats = lb_stats();
        let snapshot = stats.zone_snapshot_of(&[]);
        assert_eq!(snapshot.instance_count, 0);
        assert_eq!(snapshot.load_per_server, 0.0);
    }
}
