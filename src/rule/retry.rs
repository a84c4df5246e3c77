// src/rule/retry.rs
use crate::balancer::BaseLoadBalancer;
use crate::rule::{RoundRobinRule, Rule};
use crate::server::Server;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_MAX_RETRY: Duration = Duration::from_millis(500);

/// Adds a bounded retry loop around another rule: keep asking the
/// sub-rule until it yields a live server or the wall-clock deadline
/// passes.
///
/// The loop yields to the runtime between attempts and never spawns
/// tasks; the deadline can therefore be overshot by at most one sub-rule
/// call.
pub struct RetryRule {
    sub_rule: Arc<dyn Rule>,
    max_retry: Duration,
}

impl RetryRule {
    pub fn new(sub_rule: Arc<dyn Rule>, max_retry: Duration) -> Self {
        let max_retry = if max_retry.is_zero() {
            DEFAULT_MAX_RETRY
        } else {
            max_retry
        };
        Self { sub_rule, max_retry }
    }

    pub fn max_retry(&self) -> Duration {
        self.max_retry
    }

    fn is_live(server: &Option<Arc<Server>>) -> bool {
        server.as_ref().is_some_and(|s| s.is_alive())
    }
}

impl Default for RetryRule {
    fn default() -> Self {
        Self::new(Arc::new(RoundRobinRule::new()), DEFAULT_MAX_RETRY)
    }
}

#[async_trait]
impl Rule for RetryRule {
    async fn choose(&self, lb: &BaseLoadBalancer, key: Option<&str>) -> Option<Arc<Server>> {
        let deadline = Instant::now() + self.max_retry;
        let mut answer = self.sub_rule.choose(lb, key).await;
        while !Self::is_live(&answer) && Instant::now() < deadline {
            // pause and retry hoping the condition is transient
            tokio::task::yield_now().await;
            answer = self.sub_rule.choose(lb, key).await;
        }
        if Self::is_live(&answer) {
            answer
        } else {
            debug!(balancer = %lb.name(), "retry deadline elapsed without a live server");
            None
        }
    }

    fn name(&self) -> &'static str {
        "retry"
    }

    fn clone_rule(&self) -> Arc<dyn Rule> {
        Arc::new(Self::new(self.sub_rule.clone_rule(), self.max_retry))
    }

    fn on_attach(&self, lb: &Arc<BaseLoadBalancer>) {
        self.sub_rule.on_attach(lb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::{BaseLoadBalancer, LoadBalancer};
    use crate::config::DynamicConfig;

    /// Yields nothing until the configured delay has passed, then
    /// delegates to round-robin.
    struct SlowStart {
        started: Instant,
        ready_after: Duration,
        inner: RoundRobinRule,
    }

    #[async_trait]
    impl Rule for SlowStart {
        async fn choose(&self, lb: &BaseLoadBalancer, key: Option<&str>) -> Option<Arc<Server>> {
            if self.started.elapsed() < self.ready_after {
                return None;
            }
            self.inner.choose(lb, key).await
        }

        fn name(&self) -> &'static str {
            "slow_start"
        }

        fn clone_rule(&self) -> Arc<dyn Rule> {
            unimplemented!("test rule")
        }
    }

    fn balancer_with_servers() -> Arc<BaseLoadBalancer> {
        let lb = BaseLoadBalancer::builder("test", DynamicConfig::default())
            .rule(Arc::new(RoundRobinRule::new()))
            .build();
        lb.add_servers(vec![Server::new("a", 80)]);
        lb
    }

    #[tokio::test]
    async fn returns_once_sub_rule_recovers() {
        let lb = balancer_with_servers();
        let rule = RetryRule::new(
            Arc::new(SlowStart {
                started: Instant::now(),
                ready_after: Duration::from_millis(30),
                inner: RoundRobinRule::new(),
            }),
            Duration::from_millis(300),
        );
        let chosen = rule.choose(&lb, None).await;
        assert_eq!(chosen.unwrap().id(), "a:80");
    }

    #[tokio::test]
    async fn gives_up_at_the_deadline() {
        let lb = balancer_with_servers();
        let rule = RetryRule::new(
            Arc::new(SlowStart {
                started: Instant::now(),
                ready_after: Duration::from_secs(3600),
                inner: RoundRobinRule::new(),
            }),
            Duration::from_millis(80),
        );
        let started = Instant::now();
        let chosen = rule.choose(&lb, None).await;
        assert!(chosen.is_none());
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn zero_max_retry_falls_back_to_default() {
        let rule = RetryRule::new(Arc::new(RoundRobinRule::new()), Duration::ZERO);
        assert_eq!(rule.max_retry(), Duration::from_millis(500));
    }
}
