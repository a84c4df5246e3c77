// src/balancer/base.rs
use crate::balancer::LoadBalancer;
use crate::config::DynamicConfig;
use crate::metrics::MetricsCollector;
use crate::ping::Ping;
use crate::rule::{RoundRobinRule, Rule};
use crate::server::Server;
use crate::stats::LoadBalancerStats;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Owner of the server list and its statistics.
///
/// The balancer itself implements no picking policy: `choose_server`
/// hands the call to the configured [`Rule`], which reads list snapshots
/// and stats back off this struct. Both lists live behind atomic
/// pointers, so a rule always works against a complete pre- or post-swap
/// list and never a mix.
pub struct BaseLoadBalancer {
    name: String,
    config: DynamicConfig,
    rule: Arc<dyn Rule>,
    ping: Option<Arc<dyn Ping>>,
    all_servers: ArcSwap<Vec<Arc<Server>>>,
    up_servers: ArcSwap<Vec<Arc<Server>>>,
    stats: Arc<LoadBalancerStats>,
    next_server_counter: AtomicI32,
    metrics: Option<Arc<MetricsCollector>>,
    ping_task: Mutex<Option<PingTask>>,
    // serializes list writers; readers go through the atomic pointers
    update_lock: Mutex<()>,
}

struct PingTask {
    shutdown: tokio::sync::watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Builder {
    name: String,
    config: DynamicConfig,
    rule: Option<Arc<dyn Rule>>,
    ping: Option<Arc<dyn Ping>>,
    stats: Option<Arc<LoadBalancerStats>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Builder {
    pub fn rule(mut self, rule: Arc<dyn Rule>) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn ping(mut self, ping: Arc<dyn Ping>) -> Self {
        self.ping = Some(ping);
        self
    }

    /// Share an existing stats object instead of creating one; the
    /// zone-aware balancer does this so sub-balancers feed the parent's
    /// zone snapshots.
    pub fn stats(mut self, stats: Arc<LoadBalancerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Arc<BaseLoadBalancer> {
        let stats = self.stats.unwrap_or_else(|| {
            Arc::new(LoadBalancerStats::new(
                self.name.clone(),
                self.config.snapshot().server_stats.clone(),
            ))
        });
        let rule: Arc<dyn Rule> = self.rule.unwrap_or_else(|| Arc::new(RoundRobinRule::new()));
        let lb = Arc::new(BaseLoadBalancer {
            name: self.name,
            config: self.config,
            rule,
            ping: self.ping,
            all_servers: ArcSwap::from_pointee(Vec::new()),
            up_servers: ArcSwap::from_pointee(Vec::new()),
            stats,
            next_server_counter: AtomicI32::new(0),
            metrics: self.metrics,
            ping_task: Mutex::new(None),
            update_lock: Mutex::new(()),
        });
        lb.rule.on_attach(&lb);
        lb
    }
}

impl BaseLoadBalancer {
    pub fn builder(name: impl Into<String>, config: DynamicConfig) -> Builder {
        Builder {
            name: name.into(),
            config,
            rule: None,
            ping: None,
            stats: None,
            metrics: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DynamicConfig {
        &self.config
    }

    pub fn rule(&self) -> &Arc<dyn Rule> {
        &self.rule
    }

    pub fn stats(&self) -> &LoadBalancerStats {
        &self.stats
    }

    pub fn stats_handle(&self) -> Arc<LoadBalancerStats> {
        Arc::clone(&self.stats)
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Take the current value of the shared cyclic counter, advance it,
    /// and reduce the taken value by `modulo`.
    ///
    /// The counter wraps at `i32::MAX` rather than overflowing, so the
    /// modulo never sees a negative value.
    pub fn next_server_index(&self, modulo: usize) -> usize {
        debug_assert!(modulo > 0);
        loop {
            let current = self.next_server_counter.load(Ordering::Acquire);
            let next = (current + 1) % i32::MAX;
            if self
                .next_server_counter
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return current as usize % modulo;
            }
        }
    }

    /// Replace the entire server list atomically.
    ///
    /// Without a pinger every server in the new list is presumed alive;
    /// with one, cached alive flags carry over until the next probe
    /// cycle. Zone bookkeeping on the stats object is the dynamic
    /// balancer's job, so sub-balancers sharing a stats object cannot
    /// clobber each other's zone maps here.
    pub fn set_servers_list(&self, servers: Vec<Arc<Server>>) {
        let _guard = self.update_lock.lock();
        self.install_servers(servers);
    }

    fn install_servers(&self, servers: Vec<Arc<Server>>) {
        if self.ping.is_none() {
            for server in &servers {
                server.set_alive(true);
            }
        }
        self.all_servers.store(Arc::new(servers));
        self.publish_up_servers();
        debug!(
            balancer = %self.name,
            all = self.all_servers.load().len(),
            up = self.up_servers.load().len(),
            "server list updated"
        );
    }

    fn publish_up_servers(&self) {
        let all = self.all_servers.load_full();
        let up: Vec<Arc<Server>> = all.iter().filter(|s| s.is_alive()).cloned().collect();
        if let Some(metrics) = &self.metrics {
            metrics.update_pool_size(&self.name, all.len(), up.len());
        }
        self.up_servers.store(Arc::new(up));
    }

    /// Run one probe pass over the full list and republish the up list.
    pub async fn force_ping(&self) {
        let Some(ping) = &self.ping else {
            return;
        };
        let all = self.all_servers.load_full();
        let probes = all.iter().map(|server| {
            let ping = Arc::clone(ping);
            let server = Arc::clone(server);
            async move {
                let alive = ping.is_alive(&server).await;
                server.set_alive(alive);
                alive
            }
        });
        let results = futures::future::join_all(probes).await;
        let alive_count = results.iter().filter(|alive| **alive).count();
        debug!(
            balancer = %self.name,
            alive = alive_count,
            total = results.len(),
            "ping pass complete"
        );
        self.publish_up_servers();
    }

    /// Start the periodic liveness probe; a no-op without a pinger or
    /// when already running.
    pub fn start_pinging(self: &Arc<Self>) {
        if self.ping.is_none() {
            return;
        }
        let mut slot = self.ping_task.lock();
        if slot.is_some() {
            return;
        }
        let interval = self.config.snapshot().ping_interval();
        let weak: Weak<BaseLoadBalancer> = Arc::downgrade(self);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!(balancer = %name, ?interval, "pinger started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match weak.upgrade() {
                            Some(lb) => lb.force_ping().await,
                            None => break,
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(balancer = %name, "pinger shutting down");
                            break;
                        }
                    }
                }
            }
        });
        *slot = Some(PingTask {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the periodic probe; idempotent.
    pub fn stop_pinging(&self) {
        if let Some(task) = self.ping_task.lock().take() {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }
    }
}

#[async_trait]
impl LoadBalancer for BaseLoadBalancer {
    /// Append servers; duplicates are allowed and act as weighting.
    fn add_servers(&self, servers: Vec<Server>) {
        if servers.is_empty() {
            return;
        }
        let _guard = self.update_lock.lock();
        let current = self.all_servers.load_full();
        let mut merged: Vec<Arc<Server>> = current.as_ref().clone();
        merged.extend(servers.into_iter().map(Arc::new));
        self.install_servers(merged);
    }

    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        let chosen = self.rule.choose(self, key).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_choose(&self.name, chosen.is_some());
        }
        chosen
    }

    /// Flip the cached liveness bit; the server stays out of the up list
    /// until a refresh or ping cycle restores it.
    fn mark_server_down(&self, server: &Server) {
        let _guard = self.update_lock.lock();
        let all = self.all_servers.load_full();
        let mut flipped = false;
        for candidate in all.iter() {
            if candidate.id() == server.id() && candidate.is_alive() {
                candidate.set_alive(false);
                flipped = true;
            }
        }
        if flipped {
            warn!(balancer = %self.name, server = %server.id(), "server marked down");
            self.publish_up_servers();
        }
    }

    fn get_reachable_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.up_servers.load_full()
    }

    fn get_all_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.all_servers.load_full()
    }
}

impl Drop for BaseLoadBalancer {
    fn drop(&mut self) {
        self.stop_pinging();
    }
}
