// src/server/mod.rs
use crate::error::ConfigError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Zone reported for servers that were registered without one.
pub const UNKNOWN_ZONE: &str = "unknown";

/// A candidate endpoint, identified by `host:port` and optionally tagged
/// with the zone it runs in.
///
/// Identity (host, port, zone) is immutable after construction; only the
/// two runtime flags change, and they are atomics so a server can be
/// shared freely between the balancer, the pinger and in-flight requests.
#[derive(Debug)]
pub struct Server {
    host: String,
    port: u16,
    zone: Option<String>,
    id: String,
    alive: AtomicBool,
    ready_to_serve: AtomicBool,
}

impl Server {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let id = format!("{}:{}", host, port);
        Self {
            host,
            port,
            zone: None,
            id,
            alive: AtomicBool::new(false),
            ready_to_serve: AtomicBool::new(true),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, the equality key for this server.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// Zone used for aggregation; servers without a zone are grouped
    /// under [`UNKNOWN_ZONE`].
    pub fn zone_or_unknown(&self) -> &str {
        self.zone.as_deref().unwrap_or(UNKNOWN_ZONE)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    pub fn is_ready_to_serve(&self) -> bool {
        self.ready_to_serve.load(Ordering::Acquire)
    }

    pub fn set_ready_to_serve(&self, ready: bool) {
        self.ready_to_serve.store(ready, Ordering::Release);
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Server {}

impl Hash for Server {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for Server {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidServer(s.to_string()))?;
        if host.is_empty() {
            return Err(ConfigError::InvalidServer(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidServer(s.to_string()))?;
        Ok(Server::new(host, port))
    }
}

/// Parse a comma-separated `host:port` list. Tokens are trimmed and empty
/// tokens are skipped.
pub fn parse_server_list(value: &str) -> Result<Vec<Server>, ConfigError> {
    let mut servers = Vec::new();
    for token in value.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        servers.push(token.parse()?);
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let server: Server = "web1.example.com:7001".parse().unwrap();
        assert_eq!(server.host(), "web1.example.com");
        assert_eq!(server.port(), 7001);
        assert_eq!(server.id(), "web1.example.com:7001");
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!("no-port".parse::<Server>().is_err());
        assert!(":8080".parse::<Server>().is_err());
        assert!("host:notaport".parse::<Server>().is_err());
    }

    #[test]
    fn list_parsing_skips_empty_tokens() {
        let servers = parse_server_list(" a:80, ,b:81,,c:82 ").unwrap();
        let ids: Vec<_> = servers.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["a:80", "b:81", "c:82"]);
    }

    #[test]
    fn equality_is_by_id_only() {
        let a = Server::new("a", 80).with_zone("us-east-1a");
        let b = Server::new("a", 80).with_zone("us-west-2b");
        b.set_alive(true);
        assert_eq!(a, b);
    }

    #[test]
    fn zone_defaults_to_unknown_for_aggregation() {
        let server = Server::new("a", 80);
        assert_eq!(server.zone(), None);
        assert_eq!(server.zone_or_unknown(), UNKNOWN_ZONE);
    }
}
