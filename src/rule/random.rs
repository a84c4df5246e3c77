// src/rule/random.rs
use crate::balancer::{BaseLoadBalancer, LoadBalancer};
use crate::rule::Rule;
use crate::server::Server;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tracing::warn;

const MAX_ATTEMPTS: usize = 10;

/// Uniform random choice over the reachable servers, with the same
/// bounded liveness retry as round-robin.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomRule;

impl RandomRule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Rule for RandomRule {
    async fn choose(&self, lb: &BaseLoadBalancer, _key: Option<&str>) -> Option<Arc<Server>> {
        for _ in 0..MAX_ATTEMPTS {
            let up = lb.get_reachable_servers();
            if up.is_empty() {
                return None;
            }
            let index = rand::thread_rng().gen_range(0..up.len());
            let server = &up[index];
            if server.is_alive() && server.is_ready_to_serve() {
                return Some(Arc::clone(server));
            }
        }
        warn!(
            balancer = %lb.name(),
            "no alive server found after {MAX_ATTEMPTS} random attempts"
        );
        None
    }

    fn name(&self) -> &'static str {
        "random"
    }

    fn clone_rule(&self) -> Arc<dyn Rule> {
        Arc::new(*self)
    }
}
