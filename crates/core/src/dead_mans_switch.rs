//! A resettable one-shot timer that invokes a callback after a quiet period.
//!
//! An earlier design exposed a ping channel and an expiry channel; sending on
//! the ping channel after expiry deadlocked (see
//! [`tests::repeated_ping_after_fire_does_not_deadlock`]). This version polls
//! instead: a ping arms a background task that re-checks the deadline every
//! `precision` until it has elapsed, then calls the callback and goes
//! inactive until the next ping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct State {
  last_ping: Instant,
  check_scheduled: bool,
}

struct Inner {
  timeout: Duration,
  precision: Duration,
  state: Mutex<State>,
  callback: Box<dyn Fn() + Send + Sync>,
}

/// Handle to a running dead man's switch. Cloning shares the same timer.
#[derive(Clone)]
pub struct DeadMansSwitch {
  inner: Arc<Inner>,
}

impl DeadMansSwitch {
  pub fn new(
    timeout: Duration,
    precision: Duration,
    callback: impl Fn() + Send + Sync + 'static,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        timeout,
        precision,
        state: Mutex::new(State {
          last_ping: Instant::now(),
          check_scheduled: false,
        }),
        callback: Box::new(callback),
      }),
    }
  }

  /// Reset the deadline to `now + timeout`. Idempotent and cheap enough to
  /// call on every byte forwarded through the proxy.
  pub fn ping(&self) {
    let mut state = self.inner.state.lock().expect("dead man's switch state poisoned");
    state.last_ping = Instant::now();
    if !state.check_scheduled {
      state.check_scheduled = true;
      drop(state);
      schedule_check(Arc::clone(&self.inner));
    }
  }
}

fn schedule_check(inner: Arc<Inner>) {
  tokio::spawn(async move {
    loop {
      tokio::time::sleep(inner.precision).await;
      let mut state = inner.state.lock().expect("dead man's switch state poisoned");
      if state.last_ping.elapsed() >= inner.timeout {
        state.check_scheduled = false;
        drop(state);
        (inner.callback)();
        return;
      }
      drop(state);
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;

  struct Phase {
    name: &'static str,
    duration_ms: u64,
    send_ping: bool,
  }

  fn wait(name: &'static str, duration_ms: u64) -> Phase {
    Phase {
      name,
      duration_ms,
      send_ping: false,
    }
  }

  fn ping(name: &'static str) -> Phase {
    Phase {
      name,
      duration_ms: 0,
      send_ping: true,
    }
  }

  async fn run_phases(timeout_ms: u64, phases: Vec<Phase>, expect_expiry_during: &str) {
    let (tx, rx) = mpsc::channel();
    let switch = DeadMansSwitch::new(
      Duration::from_millis(timeout_ms),
      Duration::from_millis(10),
      move || {
        let _ = tx.send(());
      },
    );
    switch.ping();

    for phase in phases {
      if phase.send_ping {
        switch.ping();
        continue;
      }
      tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(phase.duration_ms)) => {}
        _ = wait_for_expiry(&rx) => {
          assert_eq!(expect_expiry_during, phase.name, "switch fired during the wrong phase");
          return;
        }
      }
    }
    panic!("dead man's switch never fired");
  }

  async fn wait_for_expiry(rx: &mpsc::Receiver<()>) {
    loop {
      if rx.try_recv().is_ok() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn fires_with_no_pings() {
    run_phases(100, vec![wait("wait", 200)], "wait").await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn fires_later_when_pinged() {
    run_phases(
      200,
      vec![
        wait("wait 1", 100),
        ping("ping 1"),
        wait("wait 2", 100),
        ping("ping 2"),
        wait("wait 3", 300),
        wait("wait 4", 100),
      ],
      "wait 3",
    )
    .await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn fires_when_ping_was_not_enough() {
    run_phases(
      200,
      vec![
        wait("short wait", 100),
        ping("ping"),
        wait("long wait part 1", 150),
        wait("long wait part 2", 150),
      ],
      "long wait part 2",
    )
    .await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn later_pings_replace_earlier_ones() {
    run_phases(
      200,
      vec![
        wait("short wait", 100),
        ping("ping 1"),
        wait("another short wait", 100),
        ping("ping 2"),
        ping("ping 3"),
        wait("long wait part 1", 150),
        wait("long wait part 2", 150),
        wait("long wait part 3", 150),
      ],
      "long wait part 2",
    )
    .await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn repeated_ping_after_fire_does_not_deadlock() {
    let switch = DeadMansSwitch::new(Duration::from_millis(100), Duration::from_millis(10), || {});
    switch.ping();
    tokio::time::sleep(Duration::from_millis(200)).await;
    switch.ping();
    switch.ping();
  }
}
