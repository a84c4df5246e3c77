// src/predicate/mod.rs
mod availability;
mod composite;
mod zone_affinity;
mod zone_avoidance;

pub use availability::AvailabilityPredicate;
pub use composite::CompositePredicate;
pub use zone_affinity::ZoneAffinityPredicate;
pub use zone_avoidance::{
    available_zones, create_snapshot, random_choose_zone, ZoneAvoidancePredicate,
};

use crate::balancer::{BaseLoadBalancer, LoadBalancer};
use crate::server::Server;
use crate::stats::LoadBalancerStats;
use std::sync::Arc;

/// What a predicate gets to look at: the candidate server plus the
/// caller-supplied selection key, if any.
#[derive(Debug, Clone, Copy)]
pub struct PredicateKey<'a> {
    pub server: &'a Arc<Server>,
    pub load_balancer_key: Option<&'a str>,
}

/// Boolean filter over (server, key), evaluated against live statistics.
pub trait ServerPredicate: Send + Sync {
    fn apply(&self, stats: &LoadBalancerStats, key: &PredicateKey<'_>) -> bool;

    /// All servers from `servers` that pass this predicate, in input order.
    fn eligible_servers(
        &self,
        stats: &LoadBalancerStats,
        servers: &[Arc<Server>],
        load_balancer_key: Option<&str>,
    ) -> Vec<Arc<Server>> {
        servers
            .iter()
            .filter(|server| {
                self.apply(
                    stats,
                    &PredicateKey {
                        server: *server,
                        load_balancer_key,
                    },
                )
            })
            .cloned()
            .collect()
    }

    /// Filter the balancer's full server list, then round-robin over the
    /// filtered sublist using the balancer's shared cyclic counter.
    fn choose_round_robin_after_filtering(
        &self,
        lb: &BaseLoadBalancer,
        load_balancer_key: Option<&str>,
    ) -> Option<Arc<Server>> {
        let servers = lb.get_all_servers();
        let eligible = self.eligible_servers(lb.stats(), &servers, load_balancer_key);
        if eligible.is_empty() {
            return None;
        }
        let index = lb.next_server_index(eligible.len());
        Some(Arc::clone(&eligible[index]))
    }
}

/// Predicate that accepts everything; the terminal fallback in composite
/// cascades.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrue;

impl ServerPredicate for AlwaysTrue {
    fn apply(&self, _stats: &LoadBalancerStats, _key: &PredicateKey<'_>) -> bool {
        true
    }
}
