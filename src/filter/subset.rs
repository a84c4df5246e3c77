// src/filter/subset.rs
use crate::config::DynamicConfig;
use crate::filter::{ServerListFilter, ZoneAffinityServerListFilter};
use crate::server::Server;
use crate::stats::LoadBalancerStats;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Keeps the balancer on a stable, bounded subset of a large farm.
///
/// Across refreshes the subset is carried over, minus servers that left
/// the candidate pool or crossed the unhealthiness thresholds. If fewer
/// than `forceEliminatePercent × size` were dropped that way, the
/// unhealthiest survivors are force-dropped to meet the quota, and the
/// subset is refilled back to size with random picks from the pool.
pub struct ServerListSubsetFilter {
    config: DynamicConfig,
    zone_affinity: ZoneAffinityServerListFilter,
    current_subset: Mutex<HashSet<Arc<Server>>>,
}

impl ServerListSubsetFilter {
    pub fn new(config: DynamicConfig) -> Self {
        Self {
            zone_affinity: ZoneAffinityServerListFilter::new(config.clone()),
            config,
            current_subset: Mutex::new(HashSet::new()),
        }
    }

    /// Shuffle the first `to_choose` positions (partial Fisher–Yates)
    /// and keep them.
    fn random_choose(mut servers: Vec<Arc<Server>>, to_choose: usize) -> Vec<Arc<Server>> {
        let size = servers.len();
        if to_choose >= size {
            return servers;
        }
        let mut rng = rand::thread_rng();
        for i in 0..to_choose {
            let index = rng.gen_range(0..size);
            servers.swap(i, index);
        }
        servers.truncate(to_choose);
        servers
    }

    /// Order with the least healthy first: most failures, then most
    /// concurrent connections.
    fn sort_by_health(servers: &mut [Arc<Server>], stats: &LoadBalancerStats, now: Instant) {
        servers.sort_by(|a, b| {
            let stats_a = stats.single_server_stat(a);
            let stats_b = stats.single_server_stat(b);
            stats_b
                .failure_count()
                .cmp(&stats_a.failure_count())
                .then_with(|| {
                    stats_b
                        .active_requests_count(now)
                        .cmp(&stats_a.active_requests_count(now))
                })
        });
    }
}

impl ServerListFilter for ServerListSubsetFilter {
    fn filtered_list(
        &self,
        servers: Vec<Arc<Server>>,
        stats: &LoadBalancerStats,
    ) -> Vec<Arc<Server>> {
        let zone_affinity_filtered = self.zone_affinity.filtered_list(servers, stats);
        let config = self.config.snapshot();
        let settings = &config.subset_filter;
        let now = Instant::now();

        let mut candidates: HashSet<Arc<Server>> =
            zone_affinity_filtered.iter().cloned().collect();
        let mut current = self.current_subset.lock();
        let mut new_subset: HashSet<Arc<Server>> = current.clone();

        for server in current.iter() {
            if !candidates.contains(server) {
                // this server is down or out of service
                new_subset.remove(server);
            } else {
                let server_stats = stats.single_server_stat(server);
                if server_stats.active_requests_count(now)
                    > settings.elimination_connection_threshold
                    || server_stats.failure_count() as i64 > settings.elimination_failure_threshold
                {
                    new_subset.remove(server);
                    // keep it out of the refill pool too
                    candidates.remove(server);
                }
            }
        }

        let target_size = settings.size;
        let num_eliminated = current.len().saturating_sub(new_subset.len());
        let min_elimination = (target_size as f32 * settings.force_eliminate_percent) as usize;
        let mut num_to_force_eliminate = 0;
        if target_size < new_subset.len() {
            // the target shrank under the carried subset
            num_to_force_eliminate = new_subset.len() - target_size;
        } else if min_elimination > num_eliminated {
            num_to_force_eliminate = min_elimination - num_eliminated;
        }
        num_to_force_eliminate = num_to_force_eliminate.min(new_subset.len());

        if num_to_force_eliminate > 0 {
            let mut sorted: Vec<Arc<Server>> = new_subset.iter().cloned().collect();
            Self::sort_by_health(&mut sorted, stats, now);
            for server in sorted.into_iter().take(num_to_force_eliminate) {
                new_subset.remove(&server);
                candidates.remove(&server);
            }
            debug!(
                forced = num_to_force_eliminate,
                "force-eliminated unhealthiest subset members"
            );
        }

        if new_subset.len() < target_size {
            let num_to_choose = target_size - new_subset.len();
            for member in &new_subset {
                candidates.remove(member);
            }
            if num_to_choose > candidates.len() {
                // not enough healthy candidates, redraw from the full pool
                candidates = zone_affinity_filtered.iter().cloned().collect();
                for member in &new_subset {
                    candidates.remove(member);
                }
            }
            let chosen =
                Self::random_choose(candidates.into_iter().collect::<Vec<_>>(), num_to_choose);
            new_subset.extend(chosen);
        }

        *current = new_subset.clone();
        new_subset.into_iter().collect()
    }
}
