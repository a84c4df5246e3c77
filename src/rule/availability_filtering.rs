// src/rule/availability_filtering.rs
use crate::balancer::BaseLoadBalancer;
use crate::config::DynamicConfig;
use crate::predicate::{AvailabilityPredicate, PredicateKey, ServerPredicate};
use crate::rule::{RoundRobinRule, Rule};
use crate::server::Server;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

const MAX_SAMPLES: usize = 10;

/// Round-robin sampling gated by the availability predicate.
///
/// Rather than filtering the whole list on every call, this rule
/// advances the round-robin cursor and tests one candidate at a time;
/// when most servers are healthy the pick costs O(1). After ten
/// rejected candidates it degrades to the full filter-then-pick path.
pub struct AvailabilityFilteringRule {
    predicate: AvailabilityPredicate,
    sampler: RoundRobinRule,
    config: DynamicConfig,
}

impl AvailabilityFilteringRule {
    pub fn new(config: DynamicConfig) -> Self {
        Self {
            predicate: AvailabilityPredicate::new(config.clone()),
            sampler: RoundRobinRule::new(),
            config,
        }
    }
}

#[async_trait]
impl Rule for AvailabilityFilteringRule {
    async fn choose(&self, lb: &BaseLoadBalancer, key: Option<&str>) -> Option<Arc<Server>> {
        for _ in 0..MAX_SAMPLES {
            let candidate = self.sampler.choose(lb, key).await?;
            let acceptable = self.predicate.apply(
                lb.stats(),
                &PredicateKey {
                    server: &candidate,
                    load_balancer_key: key,
                },
            );
            if acceptable {
                return Some(candidate);
            }
        }
        trace!(
            balancer = %lb.name(),
            "sampling found no available server, filtering the full list"
        );
        self.predicate.choose_round_robin_after_filtering(lb, key)
    }

    fn name(&self) -> &'static str {
        "availability_filtering"
    }

    fn clone_rule(&self) -> Arc<dyn Rule> {
        Arc::new(Self::new(self.config.clone()))
    }
}
