// src/config/models.rs
use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Per-client configuration. Field names follow the wire spellings of the
/// original property system, including its historical typos, so existing
/// config files keep working.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Comma-separated `host:port` list for the static server list source.
    #[serde(rename = "ListOfServers", default)]
    pub list_of_servers: Option<String>,

    /// Zone this client itself runs in; used by the zone-affinity filter.
    #[serde(default)]
    pub zone: Option<String>,

    #[serde(rename = "NFLoadBalancerClassName", default)]
    pub load_balancer_class_name: Option<String>,

    #[serde(rename = "NFLoadBalancerRuleClassName", default)]
    pub rule_class_name: Option<String>,

    #[serde(rename = "NFLoadBalancerPingClassName", default)]
    pub ping_class_name: Option<String>,

    #[serde(rename = "NIWSServerListClassName", default)]
    pub server_list_class_name: Option<String>,

    #[serde(rename = "NIWSServerListFilterClassName", default)]
    pub server_list_filter_class_name: Option<String>,

    #[serde(rename = "ServerListRefreshIntervalMs", default = "default_refresh_interval_ms")]
    pub server_list_refresh_interval_ms: u64,

    /// Liveness probe cadence, in seconds.
    #[serde(rename = "NFLoadBalancerPingInterval", default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(rename = "ServerWeightTaskTimerInterval", default = "default_weight_interval_ms")]
    pub server_weight_task_timer_interval_ms: u64,

    #[serde(rename = "EnableZoneAffinity", default)]
    pub enable_zone_affinity: bool,

    #[serde(rename = "EnableZoneExclusivity", default)]
    pub enable_zone_exclusivity: bool,

    #[serde(rename = "zoneAffinity", default)]
    pub zone_affinity: ZoneAffinityConfig,

    #[serde(rename = "ServerListSubsetFilter", default)]
    pub subset_filter: SubsetFilterConfig,

    #[serde(
        rename = "ZoneAwareNIWSDiscoveryLoadBalancer",
        alias = "zoneAware",
        default
    )]
    pub zone_aware: ZoneAwareConfig,

    #[serde(
        rename = "availabilityFilteringRule",
        alias = "niws.loadbalancer.availabilityFilteringRule",
        default
    )]
    pub availability_filtering: AvailabilityConfig,

    #[serde(rename = "serverStats", default)]
    pub server_stats: ServerStatsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        // serde fills every field from its default fn
        serde_json::from_str("{}").expect("empty config must deserialize")
    }
}

impl ClientConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.server_list_refresh_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn weight_task_interval(&self) -> Duration {
        Duration::from_millis(self.server_weight_task_timer_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn fraction(key: &'static str, value: f64) -> Result<(), ConfigError> {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{value} is not within [0, 1]"),
                });
            }
            Ok(())
        }
        if self.server_list_refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "ServerListRefreshIntervalMs",
                reason: "must be positive".into(),
            });
        }
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "NFLoadBalancerPingInterval",
                reason: "must be positive".into(),
            });
        }
        fraction(
            "zoneAffinity.maxBlackOutServesrPercentage",
            self.zone_affinity.max_blackout_server_percentage,
        )?;
        fraction(
            "ServerListSubsetFilter.forceEliminatePercent",
            self.subset_filter.force_eliminate_percent as f64,
        )?;
        fraction(
            "ZoneAwareNIWSDiscoveryLoadBalancer.avoidZoneWithBlackoutPercetage",
            self.zone_aware.avoid_zone_with_blackout_percentage,
        )?;
        if self.subset_filter.size == 0 {
            return Err(ConfigError::Invalid {
                key: "ServerListSubsetFilter.size",
                reason: "must be positive".into(),
            });
        }
        if self.server_stats.connection_failure_count_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "serverStats.connectionFailureCountThreshold",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Guard thresholds for the zone-affinity filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneAffinityConfig {
    #[serde(rename = "maxLoadPerServer", default = "default_max_load_per_server")]
    pub max_load_per_server: f64,

    // spelling preserved from the original property key
    #[serde(
        rename = "maxBlackOutServesrPercentage",
        default = "default_max_blackout_percentage"
    )]
    pub max_blackout_server_percentage: f64,

    #[serde(rename = "minAvailableServers", default = "default_min_available_servers")]
    pub min_available_servers: u32,
}

impl Default for ZoneAffinityConfig {
    fn default() -> Self {
        Self {
            max_load_per_server: default_max_load_per_server(),
            max_blackout_server_percentage: default_max_blackout_percentage(),
            min_available_servers: default_min_available_servers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubsetFilterConfig {
    #[serde(rename = "size", default = "default_subset_size")]
    pub size: usize,

    #[serde(rename = "forceEliminatePercent", default = "default_force_eliminate_percent")]
    pub force_eliminate_percent: f32,

    // spellings preserved from the original property keys
    #[serde(rename = "eliminationConnectionThresold", default)]
    pub elimination_connection_threshold: i64,

    #[serde(rename = "eliminationFailureThresold", default)]
    pub elimination_failure_threshold: i64,
}

impl Default for SubsetFilterConfig {
    fn default() -> Self {
        Self {
            size: default_subset_size(),
            force_eliminate_percent: default_force_eliminate_percent(),
            elimination_connection_threshold: 0,
            elimination_failure_threshold: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneAwareConfig {
    #[serde(rename = "enabled", default = "default_true")]
    pub enabled: bool,

    #[serde(
        rename = "triggeringLoadPerServerThreshold",
        default = "default_triggering_load"
    )]
    pub triggering_load_per_server_threshold: f64,

    // spelling preserved from the original property key
    #[serde(
        rename = "avoidZoneWithBlackoutPercetage",
        default = "default_blackout_percentage"
    )]
    pub avoid_zone_with_blackout_percentage: f64,
}

impl Default for ZoneAwareConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            triggering_load_per_server_threshold: default_triggering_load(),
            avoid_zone_with_blackout_percentage: default_blackout_percentage(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AvailabilityConfig {
    /// Per-server concurrent request cap; `None` means unbounded.
    #[serde(rename = "activeConnectionsLimit", default)]
    pub active_connections_limit: Option<i64>,

    #[serde(rename = "filterCircuitTripped", default = "default_true")]
    pub filter_circuit_tripped: bool,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            active_connections_limit: None,
            filter_circuit_tripped: true,
        }
    }
}

/// Circuit-breaker and decay tunables for per-server stats.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerStatsConfig {
    #[serde(
        rename = "connectionFailureCountThreshold",
        default = "default_failure_threshold"
    )]
    pub connection_failure_count_threshold: u32,

    #[serde(
        rename = "circuitTripTimeoutFactorSeconds",
        default = "default_trip_timeout_factor_secs"
    )]
    pub circuit_trip_timeout_factor_secs: u64,

    #[serde(
        rename = "circuitTripMaxTimeoutSeconds",
        default = "default_trip_max_timeout_secs"
    )]
    pub circuit_trip_max_timeout_secs: u64,

    #[serde(
        rename = "activeRequestsCountTimeoutSeconds",
        default = "default_active_requests_timeout_secs"
    )]
    pub active_requests_count_timeout_secs: u64,

    #[serde(rename = "expireMinutes", default = "default_stats_expire_minutes")]
    pub expire_minutes: u64,
}

impl Default for ServerStatsConfig {
    fn default() -> Self {
        Self {
            connection_failure_count_threshold: default_failure_threshold(),
            circuit_trip_timeout_factor_secs: default_trip_timeout_factor_secs(),
            circuit_trip_max_timeout_secs: default_trip_max_timeout_secs(),
            active_requests_count_timeout_secs: default_active_requests_timeout_secs(),
            expire_minutes: default_stats_expire_minutes(),
        }
    }
}

impl ServerStatsConfig {
    pub fn blackout_base(&self) -> Duration {
        Duration::from_secs(self.circuit_trip_timeout_factor_secs)
    }

    pub fn max_blackout(&self) -> Duration {
        Duration::from_secs(self.circuit_trip_max_timeout_secs)
    }

    pub fn active_requests_timeout(&self) -> Duration {
        Duration::from_secs(self.active_requests_count_timeout_secs)
    }

    pub fn stats_expiry(&self) -> Duration {
        Duration::from_secs(self.expire_minutes * 60)
    }
}

fn default_client_name() -> String {
    "default".to_string()
}

fn default_refresh_interval_ms() -> u64 {
    30_000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_weight_interval_ms() -> u64 {
    30_000
}

fn default_max_load_per_server() -> f64 {
    0.6
}

fn default_max_blackout_percentage() -> f64 {
    0.8
}

fn default_min_available_servers() -> u32 {
    2
}

fn default_subset_size() -> usize {
    20
}

fn default_force_eliminate_percent() -> f32 {
    0.1
}

fn default_triggering_load() -> f64 {
    0.2
}

fn default_blackout_percentage() -> f64 {
    0.99999
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_trip_timeout_factor_secs() -> u64 {
    10
}

fn default_trip_max_timeout_secs() -> u64 {
    30
}

fn default_active_requests_timeout_secs() -> u64 {
    600
}

fn default_stats_expire_minutes() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
