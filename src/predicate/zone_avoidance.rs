// src/predicate/zone_avoidance.rs
use crate::config::DynamicConfig;
use crate::predicate::{PredicateKey, ServerPredicate};
use crate::stats::{LoadBalancerStats, ZoneSnapshot};
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

// Two zone loads within this window are considered tied.
const LOAD_EPSILON: f64 = 0.000001;

/// Snapshot every known zone of `stats`.
pub fn create_snapshot(stats: &LoadBalancerStats) -> BTreeMap<String, ZoneSnapshot> {
    stats
        .available_zones()
        .into_iter()
        .map(|zone| {
            let snapshot = stats.zone_snapshot(&zone);
            (zone, snapshot)
        })
        .collect()
}

/// Zones that remain eligible after evicting dead zones and, when load
/// warrants it, the single worst-loaded zone.
///
/// Zones with no instances, with (almost) every breaker tripped, or with
/// a negative load are dropped outright. If the highest per-server load
/// across the surviving zones stays below `triggering_load` and nothing
/// was dropped, the full set is returned unchanged; otherwise one zone is
/// drawn from the worst-loaded tie group, weighted by instance count, and
/// evicted.
pub fn available_zones(
    snapshot: &BTreeMap<String, ZoneSnapshot>,
    triggering_load: f64,
    triggering_blackout_percentage: f64,
) -> HashSet<String> {
    if snapshot.is_empty() {
        return HashSet::new();
    }
    let mut available: HashSet<String> = snapshot.keys().cloned().collect();
    if available.len() == 1 {
        return available;
    }
    let mut worst_zones: HashSet<String> = HashSet::new();
    let mut max_load_per_server = 0.0f64;
    let mut limited_zone_availability = false;

    for (zone, zone_snapshot) in snapshot {
        if zone_snapshot.instance_count == 0 {
            available.remove(zone);
            limited_zone_availability = true;
            continue;
        }
        let load_per_server = zone_snapshot.load_per_server;
        let blackout_ratio =
            zone_snapshot.circuit_tripped_count as f64 / zone_snapshot.instance_count as f64;
        if blackout_ratio >= triggering_blackout_percentage || load_per_server < 0.0 {
            available.remove(zone);
            limited_zone_availability = true;
        } else if (load_per_server - max_load_per_server).abs() < LOAD_EPSILON {
            // equal enough considering double rounding
            worst_zones.insert(zone.clone());
        } else if load_per_server > max_load_per_server {
            max_load_per_server = load_per_server;
            worst_zones.clear();
            worst_zones.insert(zone.clone());
        }
    }

    if max_load_per_server < triggering_load && !limited_zone_availability {
        // no zone override needed
        return available;
    }
    if max_load_per_server >= triggering_load {
        if let Some(zone_to_avoid) = random_choose_zone(snapshot, &worst_zones) {
            debug!(zone = %zone_to_avoid, load = max_load_per_server, "evicting worst zone");
            available.remove(&zone_to_avoid);
        }
    }
    available
}

/// Draw one zone from `choose_from`, weighted by instance count so that
/// small zones are not over-selected when several tie for worst.
pub fn random_choose_zone(
    snapshot: &BTreeMap<String, ZoneSnapshot>,
    choose_from: &HashSet<String>,
) -> Option<String> {
    // iterate in sorted order so the cumulative walk is stable
    let mut candidates: Vec<&String> = choose_from.iter().collect();
    candidates.sort();
    let first = candidates.first()?.to_string();
    if candidates.len() == 1 {
        return Some(first);
    }
    let total: usize = candidates
        .iter()
        .filter_map(|zone| snapshot.get(*zone))
        .map(|s| s.instance_count)
        .sum();
    if total == 0 {
        return Some(first);
    }
    let index = rand::thread_rng().gen_range(1..=total);
    let mut sum = 0;
    for zone in candidates {
        sum += snapshot.get(zone).map_or(0, |s| s.instance_count);
        if index <= sum {
            return Some(zone.clone());
        }
    }
    Some(first)
}

/// Rejects servers whose zone the avoidance algorithm has evicted.
#[derive(Debug, Clone)]
pub struct ZoneAvoidancePredicate {
    config: DynamicConfig,
}

impl ZoneAvoidancePredicate {
    pub fn new(config: DynamicConfig) -> Self {
        Self { config }
    }
}

impl ServerPredicate for ZoneAvoidancePredicate {
    fn apply(&self, stats: &LoadBalancerStats, key: &PredicateKey<'_>) -> bool {
        let config = self.config.snapshot();
        if !config.zone_aware.enabled {
            return true;
        }
        let zone = match key.server.zone() {
            Some(zone) => zone.to_ascii_lowercase(),
            // no zone information, accept
            None => return true,
        };
        if stats.available_zones().len() <= 1 {
            return true;
        }
        let snapshot = create_snapshot(stats);
        if !snapshot.contains_key(&zone) {
            return true;
        }
        available_zones(
            &snapshot,
            config.zone_aware.triggering_load_per_server_threshold,
            config.zone_aware.avoid_zone_with_blackout_percentage,
        )
        .contains(&zone)
    }
}
