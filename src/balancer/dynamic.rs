// src/balancer/dynamic.rs
use crate::balancer::{BaseLoadBalancer, LoadBalancer};
use crate::error::UpdateError;
use crate::filter::ServerListFilter;
use crate::server::Server;
use crate::source::ServerListSource;
use crate::updater::{PollingServerListUpdater, UpdateAction};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// A balancer whose server list is kept fresh from a discovery source.
///
/// On every cycle the updater fetches the raw list, runs it through the
/// optional filter, swaps it in atomically, and refreshes the stats'
/// zone bookkeeping. A failed fetch keeps the previous list.
pub struct DynamicServerListLoadBalancer {
    lb: Arc<BaseLoadBalancer>,
    source: Arc<dyn ServerListSource>,
    filter: Option<Arc<dyn ServerListFilter>>,
    updater: PollingServerListUpdater,
}

impl DynamicServerListLoadBalancer {
    pub fn new(
        lb: Arc<BaseLoadBalancer>,
        source: Arc<dyn ServerListSource>,
        filter: Option<Arc<dyn ServerListFilter>>,
    ) -> Arc<Self> {
        let interval = lb.config().snapshot().refresh_interval();
        Arc::new(Self {
            lb,
            source,
            filter,
            updater: PollingServerListUpdater::new(interval),
        })
    }

    pub fn base(&self) -> &Arc<BaseLoadBalancer> {
        &self.lb
    }

    pub fn updater(&self) -> &PollingServerListUpdater {
        &self.updater
    }

    /// One fetch → filter → swap pass; returns the filtered list so
    /// subclass-style wrappers can re-partition it.
    pub async fn refresh_servers(&self) -> Result<Vec<Arc<Server>>, UpdateError> {
        let raw = self.source.updated_list().await?;
        let servers: Vec<Arc<Server>> = raw.into_iter().map(Arc::new).collect();
        let filtered = match &self.filter {
            Some(filter) => filter.filtered_list(servers, self.lb.stats()),
            None => servers,
        };
        self.lb.stats().update_server_list(&filtered);
        self.lb.set_servers_list(filtered.clone());
        self.lb.force_ping().await;
        debug!(
            balancer = %self.lb.name(),
            servers = filtered.len(),
            "server list refreshed"
        );
        Ok(filtered)
    }

    /// Start the refresh loop and the pinger; idempotent.
    pub fn start(self: &Arc<Self>) {
        self.updater.start(refresh_action(Arc::downgrade(self)));
        self.lb.start_pinging();
    }

    /// Stop the refresh loop and the pinger; idempotent. In-flight
    /// `choose_server` calls are unaffected.
    pub fn stop(&self) {
        self.updater.stop();
        self.lb.stop_pinging();
    }
}

fn refresh_action(target: Weak<DynamicServerListLoadBalancer>) -> Arc<dyn UpdateAction> {
    Arc::new(move || {
        let target = target.clone();
        async move {
            let Some(balancer) = target.upgrade() else {
                return Ok(());
            };
            match balancer.refresh_servers().await {
                Ok(_) => Ok(()),
                Err(err) => {
                    if let Some(metrics) = balancer.lb.metrics() {
                        metrics.record_refresh_failure(balancer.lb.name());
                    }
                    error!(balancer = %balancer.lb.name(), %err, "refresh failed");
                    Err(err)
                }
            }
        }
    })
}

#[async_trait]
impl LoadBalancer for DynamicServerListLoadBalancer {
    fn add_servers(&self, servers: Vec<Server>) {
        self.lb.add_servers(servers);
    }

    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        self.lb.choose_server(key).await
    }

    fn mark_server_down(&self, server: &Server) {
        self.lb.mark_server_down(server);
    }

    fn get_reachable_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.lb.get_reachable_servers()
    }

    fn get_all_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.lb.get_all_servers()
    }
}

impl Drop for DynamicServerListLoadBalancer {
    fn drop(&mut self) {
        self.stop();
    }
}
