use std::env;

use super::types::{Config, ConfigError, ObservabilityConfig, Result};
use super::validate::validate;

/// Load and validate configuration from the process environment.
///
/// This is the only place in the crate that reads `std::env`; everything
/// downstream operates on the validated [`Config`] value.
pub fn load() -> Result<Config> {
  load_from(|name| env::var(name).ok())
}

/// Same as [`load`] but sourced from an arbitrary lookup function, so tests
/// can exercise parsing without mutating the real process environment.
pub(crate) fn load_from(get: impl Fn(&'static str) -> Option<String>) -> Result<Config> {
  let command = required(&get, "SLEEPING_BEAUTY_COMMAND")?;
  let timeout_seconds = required_parse(&get, "SLEEPING_BEAUTY_TIMEOUT_SECONDS")?;
  let command_port = required_parse(&get, "SLEEPING_BEAUTY_COMMAND_PORT")?;
  let listen_port = required_parse(&get, "SLEEPING_BEAUTY_LISTEN_PORT")?;
  let listen_host = get("SLEEPING_BEAUTY_LISTEN_HOST").unwrap_or_else(|| "0.0.0.0".to_string());

  let observability = match get("SLEEPING_BEAUTY_METRICS_PORT") {
    None => None,
    Some(raw) => {
      let metrics_port = parse(&raw, "SLEEPING_BEAUTY_METRICS_PORT")?;
      let metrics_host = get("SLEEPING_BEAUTY_METRICS_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
      let healthcheck_path =
        get("SLEEPING_BEAUTY_HEALTHCHECK_PATH").unwrap_or_else(|| "/healthz".to_string());
      Some(ObservabilityConfig {
        metrics_port,
        metrics_host,
        healthcheck_path,
      })
    }
  };

  let cfg = Config {
    command,
    timeout_seconds,
    command_port,
    listen_port,
    listen_host,
    observability,
  };
  validate(&cfg)?;
  Ok(cfg)
}

fn required(get: &impl Fn(&'static str) -> Option<String>, name: &'static str) -> Result<String> {
  get(name).ok_or(ConfigError::Missing(name))
}

fn required_parse<T: std::str::FromStr>(
  get: &impl Fn(&'static str) -> Option<String>,
  name: &'static str,
) -> Result<T> {
  let raw = required(get, name)?;
  parse(&raw, name)
}

fn parse<T: std::str::FromStr>(raw: &str, name: &'static str) -> Result<T> {
  raw.parse().map_err(|_| ConfigError::Invalid {
    name,
    value: raw.to_string(),
    reason: "not a valid unsigned integer",
  })
}
