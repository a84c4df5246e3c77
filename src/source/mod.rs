// src/source/mod.rs
use crate::config::DynamicConfig;
use crate::error::UpdateError;
use crate::server::{parse_server_list, Server};
use async_trait::async_trait;

/// Supplier of raw candidate server lists, typically backed by a
/// discovery service. The balancer filters whatever this yields.
#[async_trait]
pub trait ServerListSource: Send + Sync {
    /// List to seed the balancer with at startup.
    async fn initial_list(&self) -> Result<Vec<Server>, UpdateError>;

    /// Fresh list for a periodic refresh.
    async fn updated_list(&self) -> Result<Vec<Server>, UpdateError>;
}

/// Static source reading the `ListOfServers` key from the shared config
/// snapshot on every call, so config updates flow into the next refresh.
pub struct ConfigurationBasedServerList {
    config: DynamicConfig,
}

impl ConfigurationBasedServerList {
    pub fn new(config: DynamicConfig) -> Self {
        Self { config }
    }

    fn derive(&self) -> Result<Vec<Server>, UpdateError> {
        let snapshot = self.config.snapshot();
        let raw = snapshot.list_of_servers.as_deref().unwrap_or_default();
        parse_server_list(raw).map_err(|err| UpdateError::Source(err.to_string()))
    }
}

#[async_trait]
impl ServerListSource for ConfigurationBasedServerList {
    async fn initial_list(&self) -> Result<Vec<Server>, UpdateError> {
        self.derive()
    }

    async fn updated_list(&self) -> Result<Vec<Server>, UpdateError> {
        self.derive()
    }
}

/// Fixed in-memory source; handy for tests and embedders that manage
/// discovery themselves.
pub struct StaticServerList {
    servers: Vec<(String, u16, Option<String>)>,
}

impl StaticServerList {
    pub fn new(servers: &[Server]) -> Self {
        Self {
            servers: servers
                .iter()
                .map(|s| {
                    (
                        s.host().to_string(),
                        s.port(),
                        s.zone().map(str::to_string),
                    )
                })
                .collect(),
        }
    }

    fn materialize(&self) -> Vec<Server> {
        self.servers
            .iter()
            .map(|(host, port, zone)| {
                let server = Server::new(host.clone(), *port);
                match zone {
                    Some(zone) => server.with_zone(zone.clone()),
                    None => server,
                }
            })
            .collect()
    }
}

#[async_trait]
impl ServerListSource for StaticServerList {
    async fn initial_list(&self) -> Result<Vec<Server>, UpdateError> {
        Ok(self.materialize())
    }

    async fn updated_list(&self) -> Result<Vec<Server>, UpdateError> {
        Ok(self.materialize())
    }
}

/// Instantiate a source from its configured name
/// (`NIWSServerListClassName`).
pub fn source_from_name(
    name: &str,
    config: &DynamicConfig,
) -> Result<std::sync::Arc<dyn ServerListSource>, crate::error::ConfigError> {
    match name {
        "ConfigurationBasedServerList" => Ok(std::sync::Arc::new(
            ConfigurationBasedServerList::new(config.clone()),
        )),
        other => Err(crate::error::ConfigError::UnknownName(other.to_string())),
    }
}
