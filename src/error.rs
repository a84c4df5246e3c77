// src/error.rs

/// Errors raised while building components from configuration.
///
/// These are fatal for the component being constructed and surface to the
/// constructor caller; selection itself never returns an error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("unknown implementation name: {0}")]
    UnknownName(String),

    #[error("invalid server address '{0}', expected host:port")]
    InvalidServer(String),
}

/// Errors raised by a server list refresh.
///
/// The updater logs these, counts them as missed cycles and keeps the
/// previous list.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("server list source failed: {0}")]
    Source(String),
}
