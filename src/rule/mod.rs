// src/rule/mod.rs
mod availability_filtering;
mod best_available;
mod random;
mod retry;
mod round_robin;
mod weighted_response_time;
mod zone_avoidance;

pub use availability_filtering::AvailabilityFilteringRule;
pub use best_available::BestAvailableRule;
pub use random::RandomRule;
pub use retry::RetryRule;
pub use round_robin::RoundRobinRule;
pub use weighted_response_time::WeightedResponseTimeRule;
pub use zone_avoidance::ZoneAvoidanceRule;

use crate::balancer::BaseLoadBalancer;
use crate::config::DynamicConfig;
use crate::error::ConfigError;
use crate::server::Server;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Strategy for picking one server per request.
///
/// Rules hold no reference to their balancer; the balancer passes itself
/// into `choose`, which keeps the ownership graph acyclic and lets one
/// rule value serve several balancers in tests.
#[async_trait]
pub trait Rule: Send + Sync {
    /// Pick a server, or `None` when nothing is eligible right now.
    /// Never fails; internal trouble degrades to `None` or a fallback.
    async fn choose(&self, lb: &BaseLoadBalancer, key: Option<&str>) -> Option<Arc<Server>>;

    fn name(&self) -> &'static str;

    /// A fresh instance with the same configuration. Zone-aware
    /// balancers clone the parent rule per sub-balancer so cursor state
    /// never bleeds across zones.
    fn clone_rule(&self) -> Arc<dyn Rule>;

    /// Called once when a balancer adopts this rule; rules that run
    /// background maintenance hook it here.
    fn on_attach(&self, _lb: &Arc<BaseLoadBalancer>) {}
}

impl fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("name", &self.name()).finish()
    }
}

/// Instantiate a rule from its configured name
/// (`NFLoadBalancerRuleClassName`).
pub fn rule_from_name(name: &str, config: &DynamicConfig) -> Result<Arc<dyn Rule>, ConfigError> {
    match name {
        "RoundRobinRule" => Ok(Arc::new(RoundRobinRule::new())),
        "RandomRule" => Ok(Arc::new(RandomRule::new())),
        "RetryRule" => Ok(Arc::new(RetryRule::default())),
        "WeightedResponseTimeRule" => {
            Ok(Arc::new(WeightedResponseTimeRule::new(config.clone())))
        }
        "BestAvailableRule" => Ok(Arc::new(BestAvailableRule::new())),
        "AvailabilityFilteringRule" => {
            Ok(Arc::new(AvailabilityFilteringRule::new(config.clone())))
        }
        "ZoneAvoidanceRule" => Ok(Arc::new(ZoneAvoidanceRule::new(config.clone()))),
        other => Err(ConfigError::UnknownName(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_knows_every_shipped_rule() {
        let config = DynamicConfig::default();
        for name in [
            "RoundRobinRule",
            "RandomRule",
            "RetryRule",
            "WeightedResponseTimeRule",
            "BestAvailableRule",
            "AvailabilityFilteringRule",
            "ZoneAvoidanceRule",
        ] {
            let rule = rule_from_name(name, &config).unwrap();
            assert!(!rule.name().is_empty());
        }
    }

    #[test]
    fn factory_rejects_unknown_names() {
        let err = rule_from_name("LeastSquaresRule", &DynamicConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownName(_)));
    }
}
