// src/ping/mod.rs
use crate::server::Server;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Liveness probe for a single server.
#[async_trait]
pub trait Ping: Send + Sync {
    async fn is_alive(&self, server: &Server) -> bool;

    fn name(&self) -> &'static str;
}

/// Probe that reports whatever it was configured to report. Useful as a
/// stand-in when liveness is managed elsewhere, and in tests.
#[derive(Debug, Clone)]
pub struct ConstantPing {
    constant: bool,
}

impl ConstantPing {
    pub fn new(constant: bool) -> Self {
        Self { constant }
    }
}

impl Default for ConstantPing {
    fn default() -> Self {
        Self { constant: true }
    }
}

#[async_trait]
impl Ping for ConstantPing {
    async fn is_alive(&self, _server: &Server) -> bool {
        self.constant
    }

    fn name(&self) -> &'static str {
        "constant"
    }
}

/// HTTP GET probe: a server is alive when the configured path answers
/// with a success status within the timeout.
pub struct HttpPing {
    client: reqwest::Client,
    path: String,
    secure: bool,
}

impl HttpPing {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            path: path.into(),
            secure: false,
        })
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn url_for(&self, server: &Server) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let path = self.path.trim_start_matches('/');
        format!("{}://{}:{}/{}", scheme, server.host(), server.port(), path)
    }
}

#[async_trait]
impl Ping for HttpPing {
    async fn is_alive(&self, server: &Server) -> bool {
        let url = self.url_for(server);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let alive = response.status().is_success();
                if !alive {
                    debug!(%server, status = %response.status(), "ping got non-success status");
                }
                alive
            }
            Err(err) => {
                debug!(%server, %err, "ping failed");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Instantiate a probe from its configured name
/// (`NFLoadBalancerPingClassName`).
///
/// `HttpPing` built this way probes `/` with a two second timeout;
/// anything fancier is supplied programmatically.
pub fn ping_from_name(name: &str) -> Result<std::sync::Arc<dyn Ping>, crate::error::ConfigError> {
    match name {
        "ConstantPing" | "PingConstant" => Ok(std::sync::Arc::new(ConstantPing::default())),
        "HttpPing" => {
            let ping = HttpPing::new("/", Duration::from_secs(2)).map_err(|err| {
                crate::error::ConfigError::Invalid {
                    key: "NFLoadBalancerPingClassName",
                    reason: err.to_string(),
                }
            })?;
            Ok(std::sync::Arc::new(ping))
        }
        other => Err(crate::error::ConfigError::UnknownName(other.to_string())),
    }
}
