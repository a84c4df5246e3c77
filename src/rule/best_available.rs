// src/rule/best_available.rs
use crate::balancer::{BaseLoadBalancer, LoadBalancer};
use crate::rule::{RoundRobinRule, Rule};
use crate::server::Server;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Skips servers with a tripped breaker and picks the one carrying the
/// fewest outstanding requests; ties go to the first encountered.
///
/// Pairs well with the subset filter: scanning stays cheap and different
/// clients see different subsets, so the idlest server of the whole farm
/// is not stampeded by everyone at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestAvailableRule {
    fallback: RoundRobinRule,
}

impl BestAvailableRule {
    pub fn new() -> Self {
        Self {
            fallback: RoundRobinRule::new(),
        }
    }
}

#[async_trait]
impl Rule for BestAvailableRule {
    async fn choose(&self, lb: &BaseLoadBalancer, key: Option<&str>) -> Option<Arc<Server>> {
        let servers = lb.get_all_servers();
        let stats = lb.stats();
        let now = Instant::now();
        let mut minimal_concurrent = i64::MAX;
        let mut chosen: Option<Arc<Server>> = None;
        for server in servers.iter() {
            let server_stats = stats.single_server_stat(server);
            if server_stats.is_circuit_breaker_tripped(now) {
                continue;
            }
            let concurrent = server_stats.active_requests_count(now);
            if concurrent < minimal_concurrent {
                minimal_concurrent = concurrent;
                chosen = Some(Arc::clone(server));
            }
        }
        match chosen {
            Some(server) => Some(server),
            None => self.fallback.choose(lb, key).await,
        }
    }

    fn name(&self) -> &'static str {
        "best_available"
    }

    fn clone_rule(&self) -> Arc<dyn Rule> {
        Arc::new(*self)
    }
}
