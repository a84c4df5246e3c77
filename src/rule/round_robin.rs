// src/rule/round_robin.rs
use crate::balancer::{BaseLoadBalancer, LoadBalancer};
use crate::rule::Rule;
use crate::server::Server;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

const MAX_ATTEMPTS: usize = 10;

/// Cycles through the reachable servers using the balancer's shared
/// cyclic counter.
///
/// A chosen server can lose its alive flag between the list snapshot and
/// the pick; up to ten re-picks absorb that race before giving up.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinRule;

impl RoundRobinRule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Rule for RoundRobinRule {
    async fn choose(&self, lb: &BaseLoadBalancer, _key: Option<&str>) -> Option<Arc<Server>> {
        for _ in 0..MAX_ATTEMPTS {
            let up = lb.get_reachable_servers();
            if up.is_empty() {
                warn!(balancer = %lb.name(), "no up servers available");
                return None;
            }
            let index = lb.next_server_index(up.len());
            let server = &up[index];
            if server.is_alive() && server.is_ready_to_serve() {
                return Some(Arc::clone(server));
            }
        }
        warn!(
            balancer = %lb.name(),
            "no alive server found after {MAX_ATTEMPTS} attempts"
        );
        None
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn clone_rule(&self) -> Arc<dyn Rule> {
        Arc::new(*self)
    }
}
