use std::time::Duration;

use sleepingd_core::config;
use sleepingd_core::coordinator::Coordinator;
use sleepingd_core::diag;
use sleepingd_core::logging;
use sleepingd_core::observability::{BackendStatus, ObservabilityServer};
use sleepingd_core::proxy::Proxy;
use tokio::signal::unix::{signal, SignalKind};

const SWITCH_PRECISION: Duration = Duration::from_millis(100);
const TERMINATION_GRACE_PERIOD: Duration = Duration::from_secs(10);
const LISTENING_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
  logging::init();

  let cfg = match config::env::load() {
    Ok(cfg) => cfg,
    Err(err) => diag::must(&err),
  };

  let status = BackendStatus::new();
  let coordinator = Coordinator::with_backend_status(
    cfg.command.clone(),
    cfg.command_port,
    Duration::from_secs(cfg.timeout_seconds),
    SWITCH_PRECISION,
    TERMINATION_GRACE_PERIOD,
    LISTENING_TIMEOUT,
    status.clone(),
  );

  if let Err(err) = coordinator.preflight().await {
    diag::must(err);
  }

  let observability_server = match &cfg.observability {
    Some(obs_cfg) => match ObservabilityServer::bind(obs_cfg, status.clone()).await {
      Ok(server) => Some(server),
      Err(err) => diag::must(&err),
    },
    None => None,
  };

  let proxy = match Proxy::bind(
    &cfg.listen_host,
    cfg.listen_port,
    cfg.command_port,
    coordinator.new_connection_hook(),
    coordinator.data_hook(),
  )
  .await
  {
    Ok(proxy) => proxy,
    Err(err) => diag::must(&err),
  };

  diag::log(format_args!(
    "listening on {}:{}, proxying to 127.0.0.1:{} with {} command line: {}",
    cfg.listen_host,
    cfg.listen_port,
    cfg.command_port,
    sleepingd_core::shell::login_shell(),
    cfg.command,
  ));

  let exit_signal = wait_for_shutdown_signal().await;

  proxy.close().await;
  if let Some(server) = observability_server {
    server.close().await;
  }
  if let Err(err) = coordinator.shutdown().await {
    diag::log_error(err);
  }

  std::process::exit(128 + exit_signal);
}

/// Waits for SIGINT or SIGTERM and returns the signal number, matching the
/// `128 + signum` exit code the process is documented to use.
async fn wait_for_shutdown_signal() -> i32 {
  let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
  let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
  tokio::select! {
    _ = sigint.recv() => libc_signum::SIGINT,
    _ = sigterm.recv() => libc_signum::SIGTERM,
  }
}

/// Signal numbers are platform-defined constants, not something `tokio`
/// exposes directly once you're past `SignalKind`; both values below are
/// fixed across every POSIX platform Rust targets.
mod libc_signum {
  pub const SIGINT: i32 = 2;
  pub const SIGTERM: i32 = 15;
}
