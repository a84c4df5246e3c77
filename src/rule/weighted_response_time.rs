// src/rule/weighted_response_time.rs
use crate::balancer::{BaseLoadBalancer, LoadBalancer};
use crate::config::DynamicConfig;
use crate::rule::{RoundRobinRule, Rule};
use crate::server::Server;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

const MAX_ATTEMPTS: usize = 10;
// below this total weight the samples are too thin to bias selection
const MIN_TOTAL_WEIGHT: f64 = 0.001;

/// Biases selection toward servers with faster average response times.
///
/// A background task recomputes a cumulative weight array from the
/// balancer's stats on a fixed cadence and publishes it with an atomic
/// swap; `choose` draws uniformly against whichever array it observed at
/// entry. Until enough samples accumulate the rule behaves as
/// round-robin.
pub struct WeightedResponseTimeRule {
    config: DynamicConfig,
    weights: Arc<ArcSwap<Vec<f64>>>,
    fallback: RoundRobinRule,
    task: Mutex<Option<WeightTask>>,
}

struct WeightTask {
    shutdown: tokio::sync::watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WeightedResponseTimeRule {
    pub fn new(config: DynamicConfig) -> Self {
        Self {
            config,
            weights: Arc::new(ArcSwap::from_pointee(Vec::new())),
            fallback: RoundRobinRule::new(),
            task: Mutex::new(None),
        }
    }

    /// Rebuild the cumulative weight array: each server's slice is the
    /// total average response time minus its own, so faster servers get
    /// proportionally wider slices.
    fn recompute_weights(lb: &BaseLoadBalancer, weights: &ArcSwap<Vec<f64>>) {
        let servers = lb.get_all_servers();
        let stats = lb.stats();
        let averages: Vec<f64> = servers
            .iter()
            .map(|server| stats.single_server_stat(server).response_time_avg())
            .collect();
        let total: f64 = averages.iter().sum();
        let mut accumulated = Vec::with_capacity(averages.len());
        let mut sum = 0.0;
        for average in &averages {
            sum += total - average;
            accumulated.push(sum);
        }
        trace!(servers = servers.len(), total, "recomputed response time weights");
        weights.store(Arc::new(accumulated));
    }

    /// Force an immediate recompute; used by the maintenance task and by
    /// tests that do not want to wait for the timer.
    pub fn refresh_weights(&self, lb: &BaseLoadBalancer) {
        Self::recompute_weights(lb, &self.weights);
    }
}

#[async_trait]
impl Rule for WeightedResponseTimeRule {
    async fn choose(&self, lb: &BaseLoadBalancer, key: Option<&str>) -> Option<Arc<Server>> {
        for _ in 0..MAX_ATTEMPTS {
            let servers = lb.get_all_servers();
            if servers.is_empty() {
                return None;
            }
            let weights = self.weights.load_full();
            let max_total_weight = weights.last().copied().unwrap_or(0.0);
            // a stale or degenerate array means we cannot sample fairly
            if weights.len() != servers.len() || max_total_weight < MIN_TOTAL_WEIGHT {
                return self.fallback.choose(lb, key).await;
            }
            let draw = rand::thread_rng().gen_range(0.0..max_total_weight);
            let index = weights
                .iter()
                .position(|weight| *weight >= draw)
                .unwrap_or(weights.len() - 1);
            let server = &servers[index];
            if server.is_alive() && server.is_ready_to_serve() {
                return Some(Arc::clone(server));
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "weighted_response_time"
    }

    fn clone_rule(&self) -> Arc<dyn Rule> {
        Arc::new(Self::new(self.config.clone()))
    }

    fn on_attach(&self, lb: &Arc<BaseLoadBalancer>) {
        let mut slot = self.task.lock();
        if slot.is_some() {
            return;
        }
        Self::recompute_weights(lb, &self.weights);
        let interval = self.config.snapshot().weight_task_interval();
        let weights = Arc::clone(&self.weights);
        let weak: Weak<BaseLoadBalancer> = Arc::downgrade(lb);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // weights were just computed
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match weak.upgrade() {
                            Some(lb) => Self::recompute_weights(&lb, &weights),
                            None => {
                                debug!("balancer dropped, stopping weight maintenance");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *slot = Some(WeightTask {
            shutdown: shutdown_tx,
            handle,
        });
    }
}

impl Drop for WeightedResponseTimeRule {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }
    }
}
