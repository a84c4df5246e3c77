// src/filter/mod.rs
mod subset;
mod zone_affinity;

pub use subset::ServerListSubsetFilter;
pub use zone_affinity::ZoneAffinityServerListFilter;

use crate::server::Server;
use crate::stats::LoadBalancerStats;
use std::sync::Arc;

/// Narrows a raw candidate list down to the servers a balancer should
/// actually use. Runs on every list refresh, before the swap.
pub trait ServerListFilter: Send + Sync {
    fn filtered_list(
        &self,
        servers: Vec<Arc<Server>>,
        stats: &LoadBalancerStats,
    ) -> Vec<Arc<Server>>;
}

/// Instantiate a filter from its configured name
/// (`NIWSServerListFilterClassName`).
pub fn filter_from_name(
    name: &str,
    config: &crate::config::DynamicConfig,
) -> Result<Arc<dyn ServerListFilter>, crate::error::ConfigError> {
    match name {
        "ZoneAffinityServerListFilter" => {
            Ok(Arc::new(ZoneAffinityServerListFilter::new(config.clone())))
        }
        "ServerListSubsetFilter" => Ok(Arc::new(ServerListSubsetFilter::new(config.clone()))),
        other => Err(crate::error::ConfigError::UnknownName(other.to_string())),
    }
}
