// src/balancer/zone_aware.rs
use crate::balancer::{BaseLoadBalancer, DynamicServerListLoadBalancer, LoadBalancer};
use crate::error::UpdateError;
use crate::filter::ServerListFilter;
use crate::predicate::{available_zones, create_snapshot, random_choose_zone};
use crate::server::Server;
use crate::source::ServerListSource;
use crate::updater::UpdateAction;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// A dynamic balancer that can drop an entire zone from consideration.
///
/// Each zone gets its own sub-balancer sharing the parent's stats; per
/// request the zone snapshots are aggregated, the avoidance algorithm
/// prunes the zone set, one zone is drawn weighted by instance count,
/// and that zone's sub-balancer picks the server. With fewer than two
/// zones, or whenever the zone logic comes up empty, selection falls
/// through to the parent's own rule.
pub struct ZoneAwareLoadBalancer {
    inner: Arc<DynamicServerListLoadBalancer>,
    balancers: DashMap<String, Arc<BaseLoadBalancer>>,
}

impl ZoneAwareLoadBalancer {
    pub fn new(
        lb: Arc<BaseLoadBalancer>,
        source: Arc<dyn ServerListSource>,
        filter: Option<Arc<dyn ServerListFilter>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: DynamicServerListLoadBalancer::new(lb, source, filter),
            balancers: DashMap::new(),
        })
    }

    pub fn base(&self) -> &Arc<BaseLoadBalancer> {
        self.inner.base()
    }

    /// Refresh the list and re-partition it across the per-zone
    /// sub-balancers. Zones that disappeared get an empty list so their
    /// stale stats cannot pollute future snapshots.
    pub async fn refresh_servers(&self) -> Result<(), UpdateError> {
        let filtered = self.inner.refresh_servers().await?;
        let mut zone_servers: HashMap<String, Vec<Arc<Server>>> = HashMap::new();
        for server in &filtered {
            zone_servers
                .entry(server.zone_or_unknown().to_ascii_lowercase())
                .or_default()
                .push(Arc::clone(server));
        }
        for (zone, servers) in &zone_servers {
            self.balancer_for_zone(zone).set_servers_list(servers.clone());
        }
        // check for zones that no longer have any server
        for entry in self.balancers.iter() {
            if !zone_servers.contains_key(entry.key()) {
                entry.value().set_servers_list(Vec::new());
            }
        }
        Ok(())
    }

    fn balancer_for_zone(&self, zone: &str) -> Arc<BaseLoadBalancer> {
        let zone = zone.to_ascii_lowercase();
        let parent = self.inner.base();
        self.balancers
            .entry(zone.clone())
            .or_insert_with(|| {
                // every zone balancer gets its own rule instance so
                // cursor state stays per zone
                BaseLoadBalancer::builder(
                    format!("{}_{}", parent.name(), zone),
                    parent.config().clone(),
                )
                .rule(parent.rule().clone_rule())
                .stats(parent.stats_handle())
                .build()
            })
            .clone()
    }

    /// Start the refresh loop (with zone re-partitioning) and the
    /// parent's pinger; idempotent.
    pub fn start(self: &Arc<Self>) {
        self.inner
            .updater()
            .start(zone_refresh_action(Arc::downgrade(self)));
        self.inner.base().start_pinging();
    }

    /// Stop the refresh loop and the pinger; idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    async fn choose_zone_aware(&self, key: Option<&str>) -> Option<Arc<Server>> {
        let parent = self.inner.base();
        let stats = parent.stats();
        let snapshot = create_snapshot(stats);
        debug!(balancer = %parent.name(), ?snapshot, "zone snapshots");
        let config = parent.config().snapshot();
        let available = available_zones(
            &snapshot,
            config.zone_aware.triggering_load_per_server_threshold,
            config.zone_aware.avoid_zone_with_blackout_percentage,
        );
        if available.is_empty() || available.len() >= snapshot.len() {
            return None;
        }
        if let Some(metrics) = parent.metrics() {
            for zone in snapshot.keys().filter(|z| !available.contains(*z)) {
                metrics.record_zone_eviction(parent.name(), zone);
            }
        }
        let zone = random_choose_zone(&snapshot, &available)?;
        debug!(balancer = %parent.name(), %zone, "zone chosen");
        self.balancer_for_zone(&zone).choose_server(key).await
    }
}

fn zone_refresh_action(target: Weak<ZoneAwareLoadBalancer>) -> Arc<dyn UpdateAction> {
    Arc::new(move || {
        let target = target.clone();
        async move {
            let Some(balancer) = target.upgrade() else {
                return Ok(());
            };
            match balancer.refresh_servers().await {
                Ok(()) => Ok(()),
                Err(err) => {
                    let parent = balancer.inner.base();
                    if let Some(metrics) = parent.metrics() {
                        metrics.record_refresh_failure(parent.name());
                    }
                    error!(balancer = %parent.name(), %err, "zone aware refresh failed");
                    Err(err)
                }
            }
        }
    })
}

#[async_trait]
impl LoadBalancer for ZoneAwareLoadBalancer {
    fn add_servers(&self, servers: Vec<Server>) {
        self.inner.add_servers(servers);
    }

    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        let parent = self.inner.base();
        let config = parent.config().snapshot();
        if !config.zone_aware.enabled || parent.stats().available_zones().len() <= 1 {
            debug!(balancer = %parent.name(), "zone aware logic disabled or single zone");
            return parent.choose_server(key).await;
        }
        match self.choose_zone_aware(key).await {
            Some(server) => Some(server),
            None => {
                debug!(balancer = %parent.name(), "zone avoidance not invoked");
                parent.choose_server(key).await
            }
        }
    }

    fn mark_server_down(&self, server: &Server) {
        self.inner.mark_server_down(server);
    }

    fn get_reachable_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.inner.get_reachable_servers()
    }

    fn get_all_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.inner.get_all_servers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, DynamicConfig};
    use crate::rule::ZoneAvoidanceRule;
    use crate::source::StaticServerList;

    fn zoned_pool() -> Vec<Server> {
        let mut servers = Vec::new();
        for i in 0..4 {
            servers.push(Server::new(format!("east{i}"), 80).with_zone("us-east-1a"));
        }
        for i in 0..4 {
            servers.push(Server::new(format!("west{i}"), 80).with_zone("us-west-2b"));
        }
        servers
    }

    fn build(servers: Vec<Server>) -> Arc<ZoneAwareLoadBalancer> {
        let config = DynamicConfig::new(ClientConfig::default());
        let lb = BaseLoadBalancer::builder("test", config.clone())
            .rule(Arc::new(ZoneAvoidanceRule::new(config)))
            .build();
        let source = Arc::new(StaticServerList::new(&servers));
        ZoneAwareLoadBalancer::new(lb, source, None)
    }

    #[tokio::test]
    async fn partitions_servers_per_zone() {
        let balancer = build(zoned_pool());
        balancer.refresh_servers().await.unwrap();
        assert_eq!(balancer.get_all_servers().len(), 8);
        assert_eq!(balancer.balancers.len(), 2);
        let east = balancer.balancer_for_zone("us-east-1a");
        assert_eq!(east.get_all_servers().len(), 4);
    }

    #[tokio::test]
    async fn healthy_zones_serve_from_anywhere() {
        let balancer = build(zoned_pool());
        balancer.refresh_servers().await.unwrap();
        let mut zones = std::collections::HashSet::new();
        for _ in 0..40 {
            let server = balancer.choose_server(None).await.unwrap();
            zones.insert(server.zone().unwrap().to_string());
        }
        assert_eq!(zones.len(), 2);
    }

    #[tokio::test]
    async fn overloaded_zone_is_avoided() {
        let balancer = build(zoned_pool());
        balancer.refresh_servers().await.unwrap();
        let stats = balancer.base().stats();
        // pile outstanding requests onto every west server
        for server in balancer.get_all_servers().iter() {
            if server.zone() == Some("us-west-2b") {
                for _ in 0..5 {
                    stats.note_request_start(server);
                }
            }
        }
        for _ in 0..20 {
            let server = balancer.choose_server(None).await.unwrap();
            assert_eq!(server.zone(), Some("us-east-1a"));
        }
    }

    #[tokio::test]
    async fn vanished_zone_gets_empty_sub_balancer() {
        struct SwappableSource {
            servers: parking_lot::Mutex<Vec<(String, Option<String>)>>,
        }

        impl SwappableSource {
            fn materialize(&self) -> Vec<Server> {
                self.servers
                    .lock()
                    .iter()
                    .map(|(host, zone)| {
                        let server = Server::new(host.clone(), 80);
                        match zone {
                            Some(zone) => server.with_zone(zone.clone()),
                            None => server,
                        }
                    })
                    .collect()
            }
        }

        #[async_trait]
        impl ServerListSource for SwappableSource {
            async fn initial_list(&self) -> Result<Vec<Server>, UpdateError> {
                Ok(self.materialize())
            }

            async fn updated_list(&self) -> Result<Vec<Server>, UpdateError> {
                Ok(self.materialize())
            }
        }

        let source = Arc::new(SwappableSource {
            servers: parking_lot::Mutex::new(vec![
                ("east0".into(), Some("us-east-1a".into())),
                ("west0".into(), Some("us-west-2b".into())),
            ]),
        });
        let config = DynamicConfig::new(ClientConfig::default());
        let lb = BaseLoadBalancer::builder("test", config.clone())
            .rule(Arc::new(ZoneAvoidanceRule::new(config)))
            .build();
        let balancer = ZoneAwareLoadBalancer::new(lb, source.clone(), None);

        balancer.refresh_servers().await.unwrap();
        assert_eq!(
            balancer.balancer_for_zone("us-west-2b").get_all_servers().len(),
            1
        );

        // the west zone drains away
        *source.servers.lock() = vec![("east0".into(), Some("us-east-1a".into()))];
        balancer.refresh_servers().await.unwrap();
        assert!(balancer
            .balancer_for_zone("us-west-2b")
            .get_all_servers()
            .is_empty());
        // its zone snapshot reads empty rather than stale
        assert_eq!(
            balancer.base().stats().zone_snapshot("us-west-2b").instance_count,
            0
        );
    }

    #[tokio::test]
    async fn single_zone_delegates_to_parent_rule() {
        let servers: Vec<Server> = (0..3)
            .map(|i| Server::new(format!("east{i}"), 80).with_zone("us-east-1a"))
            .collect();
        let balancer = build(servers);
        balancer.refresh_servers().await.unwrap();
        assert!(balancer.choose_server(None).await.is_some());
    }
}
