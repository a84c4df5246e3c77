// src/predicate/zone_affinity.rs
use crate::predicate::{PredicateKey, ServerPredicate};
use crate::stats::LoadBalancerStats;

/// Accepts only servers in the configured zone (case-insensitive).
/// Servers without zone information never match.
#[derive(Debug, Clone)]
pub struct ZoneAffinityPredicate {
    zone: String,
}

impl ZoneAffinityPredicate {
    pub fn new(zone: impl Into<String>) -> Self {
        Self { zone: zone.into() }
    }
}

impl ServerPredicate for ZoneAffinityPredicate {
    fn apply(&self, _stats: &LoadBalancerStats, key: &PredicateKey<'_>) -> bool {
        key.server
            .zone()
            .is_some_and(|zone| zone.eq_ignore_ascii_case(&self.zone))
    }
}
