// src/balancer/mod.rs
mod base;
mod dynamic;
mod zone_aware;

pub use base::{BaseLoadBalancer, Builder};
pub use dynamic::DynamicServerListLoadBalancer;
pub use zone_aware::ZoneAwareLoadBalancer;

use crate::config::DynamicConfig;
use crate::error::ConfigError;
use crate::filter::{filter_from_name, ServerListFilter, ZoneAffinityServerListFilter};
use crate::metrics::MetricsCollector;
use crate::ping::ping_from_name;
use crate::rule::{rule_from_name, AvailabilityFilteringRule, Rule};
use crate::server::Server;
use crate::source::{source_from_name, ConfigurationBasedServerList, ServerListSource};
use async_trait::async_trait;
use std::sync::Arc;

/// Operations every load balancer exposes to callers.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Append servers to the pool. The same `host:port` may be added
    /// more than once to weight it more heavily.
    fn add_servers(&self, servers: Vec<Server>);

    /// Pick one server for a request, or `None` when nothing is eligible
    /// right now. Never fails.
    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>>;

    /// Record that a server stopped answering so it leaves rotation
    /// before the next ping or refresh cycle notices.
    fn mark_server_down(&self, server: &Server);

    fn get_reachable_servers(&self) -> Arc<Vec<Arc<Server>>>;

    fn get_all_servers(&self) -> Arc<Vec<Arc<Server>>>;
}

/// A balancer built from configuration; the variant follows
/// `NFLoadBalancerClassName`.
pub enum LoadBalancerHandle {
    Base(Arc<BaseLoadBalancer>),
    Dynamic(Arc<DynamicServerListLoadBalancer>),
    ZoneAware(Arc<ZoneAwareLoadBalancer>),
}

impl LoadBalancerHandle {
    /// Start whatever schedulers the variant carries; idempotent.
    pub fn start(&self) {
        match self {
            Self::Base(lb) => lb.start_pinging(),
            Self::Dynamic(lb) => lb.start(),
            Self::ZoneAware(lb) => lb.start(),
        }
    }

    /// Stop the schedulers; idempotent. In-flight `choose_server` calls
    /// complete normally.
    pub fn stop(&self) {
        match self {
            Self::Base(lb) => lb.stop_pinging(),
            Self::Dynamic(lb) => lb.stop(),
            Self::ZoneAware(lb) => lb.stop(),
        }
    }

    pub fn base(&self) -> &Arc<BaseLoadBalancer> {
        match self {
            Self::Base(lb) => lb,
            Self::Dynamic(lb) => lb.base(),
            Self::ZoneAware(lb) => lb.base(),
        }
    }
}

#[async_trait]
impl LoadBalancer for LoadBalancerHandle {
    fn add_servers(&self, servers: Vec<Server>) {
        self.base().add_servers(servers);
    }

    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        match self {
            Self::Base(lb) => lb.choose_server(key).await,
            Self::Dynamic(lb) => lb.choose_server(key).await,
            Self::ZoneAware(lb) => lb.choose_server(key).await,
        }
    }

    fn mark_server_down(&self, server: &Server) {
        self.base().mark_server_down(server);
    }

    fn get_reachable_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.base().get_reachable_servers()
    }

    fn get_all_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.base().get_all_servers()
    }
}

/// Assemble a balancer from the `*ClassName` keys of the configuration.
///
/// Defaults follow the original system: a zone-aware balancer running
/// the availability-filtering rule over the config-based server list,
/// with no pinger. Unknown names are fatal.
pub fn from_config(
    config: DynamicConfig,
    metrics: Option<Arc<MetricsCollector>>,
) -> Result<LoadBalancerHandle, ConfigError> {
    let snapshot = config.snapshot();
    snapshot.validate()?;

    let rule: Arc<dyn Rule> = match &snapshot.rule_class_name {
        Some(name) => rule_from_name(name, &config)?,
        None => Arc::new(AvailabilityFilteringRule::new(config.clone())),
    };
    let mut builder =
        BaseLoadBalancer::builder(snapshot.client_name.clone(), config.clone()).rule(rule);
    if let Some(name) = &snapshot.ping_class_name {
        builder = builder.ping(ping_from_name(name)?);
    }
    if let Some(metrics) = &metrics {
        builder = builder.metrics(Arc::clone(metrics));
    }
    let base = builder.build();

    let class = snapshot
        .load_balancer_class_name
        .as_deref()
        .unwrap_or("ZoneAwareLoadBalancer");
    if class == "BaseLoadBalancer" {
        return Ok(LoadBalancerHandle::Base(base));
    }

    let source: Arc<dyn ServerListSource> = match &snapshot.server_list_class_name {
        Some(name) => source_from_name(name, &config)?,
        None => Arc::new(ConfigurationBasedServerList::new(config.clone())),
    };
    let filter: Option<Arc<dyn ServerListFilter>> = match &snapshot.server_list_filter_class_name {
        Some(name) => Some(filter_from_name(name, &config)?),
        None if snapshot.enable_zone_affinity || snapshot.enable_zone_exclusivity => {
            let mut affinity = ZoneAffinityServerListFilter::new(config.clone());
            if let Some(metrics) = &metrics {
                affinity = affinity.with_metrics(Arc::clone(metrics));
            }
            Some(Arc::new(affinity))
        }
        None => None,
    };
    match class {
        "DynamicServerListLoadBalancer" => Ok(LoadBalancerHandle::Dynamic(
            DynamicServerListLoadBalancer::new(base, source, filter),
        )),
        "ZoneAwareLoadBalancer" => Ok(LoadBalancerHandle::ZoneAware(ZoneAwareLoadBalancer::new(
            base, source, filter,
        ))),
        other => Err(ConfigError::UnknownName(other.to_string())),
    }
}
