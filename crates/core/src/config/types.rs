use thiserror::Error;

/// Validated, in-memory configuration consumed by the coordinator and proxy.
///
/// The core never touches `std::env` directly; [`super::env::load`] is the
/// only place that does, and it hands callers one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Shell command line executed via the login shell's `-c` flag.
  pub command: String,
  /// Idle period with no observed activity before the backend is stopped.
  pub timeout_seconds: u64,
  /// Loopback port the backend is expected to bind.
  pub command_port: u16,
  /// Port the proxy listens on for client connections.
  pub listen_port: u16,
  /// Host the proxy binds to.
  pub listen_host: String,
  /// Optional loopback healthcheck/metrics HTTP listener.
  pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
  pub metrics_port: u16,
  pub metrics_host: String,
  pub healthcheck_path: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("missing required environment variable {0}")]
  Missing(&'static str),
  #[error("environment variable {name} has an invalid value {value:?}: {reason}")]
  Invalid {
    name: &'static str,
    value: String,
    reason: &'static str,
  },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
