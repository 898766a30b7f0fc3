use super::types::{Config, ConfigError, Result};

pub(super) fn validate(cfg: &Config) -> Result<()> {
  if cfg.command.trim().is_empty() {
    return Err(ConfigError::Invalid {
      name: "SLEEPING_BEAUTY_COMMAND",
      value: cfg.command.clone(),
      reason: "must not be empty",
    });
  }
  if cfg.timeout_seconds == 0 {
    return Err(ConfigError::Invalid {
      name: "SLEEPING_BEAUTY_TIMEOUT_SECONDS",
      value: "0".to_string(),
      reason: "must be at least 1 second",
    });
  }
  if cfg.command_port == 0 {
    return Err(ConfigError::Invalid {
      name: "SLEEPING_BEAUTY_COMMAND_PORT",
      value: "0".to_string(),
      reason: "must be at least 1",
    });
  }
  if cfg.listen_port == 0 {
    return Err(ConfigError::Invalid {
      name: "SLEEPING_BEAUTY_LISTEN_PORT",
      value: "0".to_string(),
      reason: "must be at least 1",
    });
  }
  if cfg.listen_host.trim().is_empty() {
    return Err(ConfigError::Invalid {
      name: "SLEEPING_BEAUTY_LISTEN_HOST",
      value: cfg.listen_host.clone(),
      reason: "must not be empty",
    });
  }
  if let Some(obs) = &cfg.observability {
    if obs.metrics_port == 0 {
      return Err(ConfigError::Invalid {
        name: "SLEEPING_BEAUTY_METRICS_PORT",
        value: "0".to_string(),
        reason: "must be at least 1",
      });
    }
    if obs.metrics_host.trim().is_empty() {
      return Err(ConfigError::Invalid {
        name: "SLEEPING_BEAUTY_METRICS_HOST",
        value: obs.metrics_host.clone(),
        reason: "must not be empty",
      });
    }
    if obs.healthcheck_path.is_empty() {
      return Err(ConfigError::Invalid {
        name: "SLEEPING_BEAUTY_HEALTHCHECK_PATH",
        value: obs.healthcheck_path.clone(),
        reason: "must not be empty",
      });
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::types::Config;

  fn base() -> Config {
    Config {
      command: "python3 -m http.server 6666".to_string(),
      timeout_seconds: 10,
      command_port: 6666,
      listen_port: 4444,
      listen_host: "0.0.0.0".to_string(),
      observability: None,
    }
  }

  #[test]
  fn rejects_empty_command() {
    let mut cfg = base();
    cfg.command = "  ".to_string();
    assert!(validate(&cfg).is_err());
  }

  #[test]
  fn rejects_zero_timeout() {
    let mut cfg = base();
    cfg.timeout_seconds = 0;
    assert!(validate(&cfg).is_err());
  }

  #[test]
  fn accepts_well_formed_config() {
    assert!(validate(&base()).is_ok());
  }

  #[test]
  fn rejects_zero_command_port() {
    let mut cfg = base();
    cfg.command_port = 0;
    assert!(validate(&cfg).is_err());
  }

  #[test]
  fn rejects_zero_listen_port() {
    let mut cfg = base();
    cfg.listen_port = 0;
    assert!(validate(&cfg).is_err());
  }

  #[test]
  fn rejects_zero_metrics_port() {
    let mut cfg = base();
    cfg.observability = Some(crate::config::types::ObservabilityConfig {
      metrics_port: 0,
      metrics_host: "0.0.0.0".to_string(),
      healthcheck_path: "/healthz".to_string(),
    });
    assert!(validate(&cfg).is_err());
  }
}
