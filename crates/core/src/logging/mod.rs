use std::sync::OnceLock;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize structured logging to stderr, filtered by `RUST_LOG` (default `info`).
///
/// Idempotent in practice: a second call observes `try_init` fail and ignores
/// it, the same way the rest of startup treats already-initialized global
/// state.
pub fn init() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
  let _ = WORKER_GUARD.set(guard);

  let fmt_layer = fmt::layer()
    .with_target(false)
    .with_writer(writer)
    .with_ansi(false);

  let _ = tracing_subscriber::registry()
    .with(filter)
    .with(fmt_layer)
    .try_init();

  info!(event = "logging_initialized", "logging initialized");
}
