//! Idempotent lifecycle over a single child process group: start, graceful
//! stop, and port-readiness probes for the backend the proxy forwards to.

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::warn;

use crate::diag;
use crate::shell::login_shell;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POST_KILL_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SubprocessError {
  #[error("failed to spawn subprocess: {0}")]
  Spawn(#[source] std::io::Error),
  #[error("failed to signal process group {pgid}: {source}")]
  Signal {
    pgid: i32,
    #[source]
    source: nix::Error,
  },
  #[error("subprocess (pid {pid}) did not exit after SIGTERM and SIGKILL")]
  DidNotExit { pid: u32 },
  #[error("timed out after {0:?} waiting for backend port to become listening")]
  ListeningTimeout(Duration),
  #[error("failed to wait on subprocess: {0}")]
  Wait(#[source] std::io::Error),
}

type Result<T> = std::result::Result<T, SubprocessError>;

struct RunningChild {
  child: Child,
  pid: i32,
}

/// Owns at most one running child at a time. All public methods are
/// idempotent: calling `ensure_started` on an already-running child, or
/// `ensure_stopped` on no child, is a cheap no-op.
pub struct SubprocessManager {
  command: String,
  termination_grace_period: Duration,
  listening_timeout: Duration,
  child: Option<RunningChild>,
  listening: bool,
}

impl SubprocessManager {
  pub fn new(command: String, termination_grace_period: Duration, listening_timeout: Duration) -> Self {
    Self {
      command,
      termination_grace_period,
      listening_timeout,
      child: None,
      listening: false,
    }
  }

  pub fn is_listening(&self) -> bool {
    self.listening
  }

  pub fn is_running(&self) -> bool {
    self.child.is_some()
  }

  pub fn ensure_started(&mut self) -> Result<()> {
    if self.child.is_some() {
      return Ok(());
    }
    let shell = login_shell();
    diag::log(format_args!("starting subprocess"));

    let mut cmd = Command::new(&shell);
    cmd
      .arg("-c")
      .arg(&self.command)
      .stdin(Stdio::null())
      .stdout(Stdio::inherit())
      .stderr(Stdio::inherit());
    // SAFETY: the closure only calls async-signal-safe libc functions
    // (setpgid) between fork and exec, as required by `pre_exec`.
    unsafe {
      cmd.pre_exec(|| {
        nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
          .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
      });
    }

    let child = cmd.spawn().map_err(SubprocessError::Spawn)?;
    let pid = child.id().expect("freshly spawned child always has a pid") as i32;
    self.child = Some(RunningChild { child, pid });
    self.listening = false;
    Ok(())
  }

  pub async fn ensure_stopped(&mut self) -> Result<()> {
    let Some(mut running) = self.child.take() else {
      return Ok(());
    };
    diag::log(format_args!("stopping subprocess"));

    signal_group(running.pid, Signal::SIGTERM)?;
    if wait_for_exit(&mut running.child, self.termination_grace_period).await {
      self.listening = false;
      return Ok(());
    }

    warn!(event = "subprocess_sigkill", pid = running.pid, "grace period elapsed, sending SIGKILL");
    signal_group(running.pid, Signal::SIGKILL)?;
    if wait_for_exit(&mut running.child, POST_KILL_GRACE).await {
      self.listening = false;
      return Ok(());
    }

    let pid = running.pid as u32;
    self.child = Some(running);
    Err(SubprocessError::DidNotExit { pid })
  }

  /// Busy-polls a loopback connect until it succeeds or `listening_timeout`
  /// elapses. Idempotent: a no-op once `listening` is already true.
  pub async fn ensure_listening(&mut self, port: u16) -> Result<()> {
    if self.listening {
      return Ok(());
    }
    let deadline = tokio::time::Instant::now() + self.listening_timeout;
    loop {
      if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
        self.listening = true;
        return Ok(());
      }
      if tokio::time::Instant::now() >= deadline {
        return Err(SubprocessError::ListeningTimeout(self.listening_timeout));
      }
      sleep(POLL_INTERVAL).await;
    }
  }

  /// Symmetric probe: polls until a connect fails, bounded by the same
  /// timeout. A timeout here is not fatal — see the coordinator's expiry
  /// handler, which logs and swallows it.
  pub async fn ensure_not_listening(&mut self, port: u16) -> Result<()> {
    if !self.listening {
      return Ok(());
    }
    let deadline = tokio::time::Instant::now() + self.listening_timeout;
    loop {
      if TcpStream::connect(("127.0.0.1", port)).await.is_err() {
        self.listening = false;
        return Ok(());
      }
      if tokio::time::Instant::now() >= deadline {
        return Err(SubprocessError::ListeningTimeout(self.listening_timeout));
      }
      sleep(POLL_INTERVAL).await;
    }
  }
}

fn signal_group(pgid: i32, sig: Signal) -> Result<()> {
  signal::kill(Pid::from_raw(-pgid), sig).map_err(|source| SubprocessError::Signal { pgid, source })
}

/// Waits up to `timeout` for the child to be reaped, polling `try_wait`
/// rather than `.wait()` so a grace period can elapse without blocking
/// forever on a child that ignored the signal.
async fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    match child.try_wait() {
      Ok(Some(_status)) => return true,
      Ok(None) => {}
      Err(_) => return false,
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    sleep(POLL_INTERVAL).await;
  }
}
