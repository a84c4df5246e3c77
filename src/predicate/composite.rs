// src/predicate/composite.rs
use crate::predicate::{PredicateKey, ServerPredicate};
use crate::server::Server;
use crate::stats::LoadBalancerStats;
use std::sync::Arc;

/// Primary predicate (an AND over one or more parts) with an ordered
/// fallback cascade.
///
/// Filtering applies the primary first; if the result is too small, each
/// fallback is tried in turn against the **original** list, not the
/// primary's output. The first satisfactory result wins; if none
/// satisfies, the last attempted result is returned.
pub struct CompositePredicate {
    primary: Vec<Box<dyn ServerPredicate>>,
    fallbacks: Vec<Box<dyn ServerPredicate>>,
    minimal_filtered_servers: usize,
    minimal_filtered_percentage: f64,
}

impl CompositePredicate {
    pub fn with_predicates(primary: Vec<Box<dyn ServerPredicate>>) -> Builder {
        Builder {
            predicate: CompositePredicate {
                primary,
                fallbacks: Vec::new(),
                minimal_filtered_servers: 1,
                minimal_filtered_percentage: 0.0,
            },
        }
    }

    fn satisfies(&self, filtered: usize, total: usize) -> bool {
        filtered >= self.minimal_filtered_servers
            && filtered as f64 > total as f64 * self.minimal_filtered_percentage
    }
}

pub struct Builder {
    predicate: CompositePredicate,
}

impl Builder {
    pub fn add_fallback_predicate(mut self, fallback: Box<dyn ServerPredicate>) -> Self {
        self.predicate.fallbacks.push(fallback);
        self
    }

    pub fn minimal_filtered_servers(mut self, count: usize) -> Self {
        self.predicate.minimal_filtered_servers = count;
        self
    }

    pub fn minimal_filtered_percentage(mut self, percentage: f64) -> Self {
        self.predicate.minimal_filtered_percentage = percentage;
        self
    }

    pub fn build(self) -> CompositePredicate {
        self.predicate
    }
}

impl ServerPredicate for CompositePredicate {
    fn apply(&self, stats: &LoadBalancerStats, key: &PredicateKey<'_>) -> bool {
        self.primary.iter().all(|p| p.apply(stats, key))
    }

    fn eligible_servers(
        &self,
        stats: &LoadBalancerStats,
        servers: &[Arc<Server>],
        load_balancer_key: Option<&str>,
    ) -> Vec<Arc<Server>> {
        let mut result: Vec<Arc<Server>> = servers
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
            .collect();
        let mut fallbacks = self.fallbacks.iter();
        while !self.satisfies(result.len(), servers.len()) {
            match fallbacks.next() {
                Some(fallback) => {
                    result = fallback.eligible_servers(stats, servers, load_balancer_key);
                }
                None => break,
            }
        }
        result
    }
}
