// src/rule/zone_avoidance.rs
use crate::balancer::BaseLoadBalancer;
use crate::config::DynamicConfig;
use crate::predicate::{
    AlwaysTrue, AvailabilityPredicate, CompositePredicate, ServerPredicate, ZoneAvoidancePredicate,
};
use crate::rule::Rule;
use crate::server::Server;
use async_trait::async_trait;
use std::sync::Arc;

/// Filters by zone health and availability, then round-robins over the
/// survivors.
///
/// The cascade: zone-avoidance AND availability as the primary filter,
/// availability alone as the first fallback, everything as the last
/// resort. Each fallback runs against the full list, so a bad zone
/// verdict can never starve selection entirely.
pub struct ZoneAvoidanceRule {
    composite: CompositePredicate,
    config: DynamicConfig,
}

impl ZoneAvoidanceRule {
    pub fn new(config: DynamicConfig) -> Self {
        let composite = CompositePredicate::with_predicates(vec![
            Box::new(ZoneAvoidancePredicate::new(config.clone())),
            Box::new(AvailabilityPredicate::new(config.clone())),
        ])
        .add_fallback_predicate(Box::new(AvailabilityPredicate::new(config.clone())))
        .add_fallback_predicate(Box::new(AlwaysTrue))
        .build();
        Self { composite, config }
    }

    pub fn predicate(&self) -> &CompositePredicate {
        &self.composite
    }
}

#[async_trait]
impl Rule for ZoneAvoidanceRule {
    async fn choose(&self, lb: &BaseLoadBalancer, key: Option<&str>) -> Option<Arc<Server>> {
        self.composite.choose_round_robin_after_filtering(lb, key)
    }

    fn name(&self) -> &'static str {
        "zone_avoidance"
    }

    fn clone_rule(&self) -> Arc<dyn Rule> {
        Arc::new(Self::new(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::LoadBalancer;
    use crate::rule::RoundRobinRule;

    fn balancer() -> Arc<BaseLoadBalancer> {
        let lb = BaseLoadBalancer::builder("test", DynamicConfig::default())
            .rule(Arc::new(RoundRobinRule::new()))
            .build();
        lb.add_servers(vec![
            Server::new("a", 80).with_zone("z1"),
            Server::new("b", 80).with_zone("z1"),
            Server::new("c", 80).with_zone("z2"),
        ]);
        lb
    }

    #[tokio::test]
    async fn rotates_over_eligible_servers() {
        let lb = balancer();
        let rule = ZoneAvoidanceRule::new(DynamicConfig::default());
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            seen.insert(rule.choose(&lb, None).await.unwrap().id().to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn tripped_servers_are_filtered_but_cascade_never_starves() {
        let lb = balancer();
        let servers = lb.get_all_servers();
        for server in servers.iter() {
            for _ in 0..3 {
                lb.stats().note_connection_failure(server);
            }
        }
        // primary and availability fallback both yield nothing; the
        // always-true fallback still returns a server
        let rule = ZoneAvoidanceRule::new(DynamicConfig::default());
        assert!(rule.choose(&lb, None).await.is_some());
    }
}
