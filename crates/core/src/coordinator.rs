//! The top-level state machine: on each new client connection, ensures the
//! backend is started and listening, then pings the dead man's switch; on
//! switch expiry, stops the backend. A single mutex around the
//! [`SubprocessManager`] serializes these two event handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::warn;

use crate::dead_mans_switch::DeadMansSwitch;
use crate::diag;
use crate::observability::BackendStatus;
use crate::proxy::{BoxFuture, DataHook, NewConnectionHook};
use crate::subprocess::SubprocessManager;

struct Inner {
  subprocess: Mutex<SubprocessManager>,
  command_port: u16,
  backend_status: BackendStatus,
}

pub struct Coordinator {
  inner: Arc<Inner>,
  switch: DeadMansSwitch,
}

impl Coordinator {
  pub fn new(
    command: String,
    command_port: u16,
    timeout: Duration,
    switch_precision: Duration,
    termination_grace_period: Duration,
    listening_timeout: Duration,
  ) -> Self {
    Self::with_backend_status(
      command,
      command_port,
      timeout,
      switch_precision,
      termination_grace_period,
      listening_timeout,
      BackendStatus::new(),
    )
  }

  /// Same as [`Coordinator::new`], but shares a [`BackendStatus`] handle with
  /// an observability listener so `/metrics` reflects the real subprocess
  /// state instead of a value nothing ever updates.
  pub fn with_backend_status(
    command: String,
    command_port: u16,
    timeout: Duration,
    switch_precision: Duration,
    termination_grace_period: Duration,
    listening_timeout: Duration,
    backend_status: BackendStatus,
  ) -> Self {
    let inner = Arc::new(Inner {
      subprocess: Mutex::new(SubprocessManager::new(
        command,
        termination_grace_period,
        listening_timeout,
      )),
      command_port,
      backend_status,
    });

    let expiry_inner = Arc::clone(&inner);
    let switch = DeadMansSwitch::new(timeout, switch_precision, move || {
      let inner = Arc::clone(&expiry_inner);
      tokio::spawn(async move {
        Coordinator::handle_expiry(inner).await;
      });
    });

    Self { inner, switch }
  }

  /// Dials the command port before the proxy starts accepting connections.
  /// A successful connect means something else already owns the port.
  pub async fn preflight(&self) -> anyhow::Result<()> {
    if TcpStream::connect(("127.0.0.1", self.inner.command_port))
      .await
      .is_ok()
    {
      bail!(
        "command port {} is already in use by another process",
        self.inner.command_port
      );
    }
    Ok(())
  }

  /// The proxy's per-connection hook: start the backend if needed, wait for
  /// it to be listening, then ping the switch. Runs before the upstream is
  /// dialed, so the client's first byte is the one that pays the cold-start
  /// cost.
  pub fn new_connection_hook(&self) -> NewConnectionHook {
    let inner = Arc::clone(&self.inner);
    let switch = self.switch.clone();
    Arc::new(move || -> BoxFuture<std::io::Result<()>> {
      let inner = Arc::clone(&inner);
      let switch = switch.clone();
      Box::pin(async move { Self::handle_activity(inner, switch).await })
    })
  }

  /// The proxy's per-byte hook: pings the switch. Never touches the
  /// subprocess mutex, so it never blocks on a lifecycle transition.
  pub fn data_hook(&self) -> DataHook {
    let switch = self.switch.clone();
    Arc::new(move || switch.ping())
  }

  async fn handle_activity(inner: Arc<Inner>, switch: DeadMansSwitch) -> std::io::Result<()> {
    let mut subprocess = inner.subprocess.lock().await;
    if let Err(err) = subprocess.ensure_started() {
      diag::must(&err);
    }
    inner.backend_status.set_running(true);
    if let Err(err) = subprocess.ensure_listening(inner.command_port).await {
      diag::must(&err);
    }
    drop(subprocess);
    switch.ping();
    Ok(())
  }

  /// A race is possible here: a new activity event may arrive while an
  /// expiry is mid-stop. The mutex serializes them; worst case a client
  /// observes a cold start immediately after an idle shutdown, which is
  /// expected behavior, not a bug.
  async fn handle_expiry(inner: Arc<Inner>) {
    let mut subprocess = inner.subprocess.lock().await;
    if let Err(err) = subprocess.ensure_stopped().await {
      diag::must(&err);
    }
    inner.backend_status.set_running(false);
    if let Err(err) = subprocess.ensure_not_listening(inner.command_port).await {
      warn!(error = %err, "could not confirm backend port freed; next connection will re-probe");
    }
  }

  /// Graceful shutdown path for SIGINT/SIGTERM: stop the backend and return,
  /// leaving the proxy listener's own close to the caller.
  pub async fn shutdown(&self) -> anyhow::Result<()> {
    let mut subprocess = self.inner.subprocess.lock().await;
    subprocess
      .ensure_stopped()
      .await
      .context("stopping subprocess during shutdown")?;
    self.inner.backend_status.set_running(false);
    Ok(())
  }
}
