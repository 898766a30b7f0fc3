//! Accepts client connections and wires each one to a lazily-dialed upstream
//! through a pair of [`crate::activity::ActivityCopier`]-style copy loops.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::activity::{activity_channel, copy_with_activity};
use crate::lazy_conn::{ByteSink, ByteSource, LazyConn, OpenPolicy};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Invoked once per client connection, before the upstream dial. In practice
/// this is the coordinator's activity event: ensure the backend is started
/// and listening, then ping the dead man's switch.
pub type NewConnectionHook = Arc<dyn Fn() -> BoxFuture<io::Result<()>> + Send + Sync>;

/// Invoked for every activity signal produced while copying bytes.
pub type DataHook = Arc<dyn Fn() + Send + Sync>;

/// A TCP socket shared between a reader and a writer. Tokio documents `&TcpStream`
/// as implementing both `AsyncRead` and `AsyncWrite`, so concurrent halves can
/// share one handle without splitting it — the same handle works for both the
/// client connection and, once dialed, the upstream connection inside a `LazyConn`.
#[derive(Clone)]
pub struct TcpEndpoint(Arc<TcpStream>);

impl TcpEndpoint {
  pub fn new(stream: TcpStream) -> Self {
    Self(Arc::new(stream))
  }
}

impl ByteSource for TcpEndpoint {
  async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
    let mut stream = &*self.0;
    stream.read(buf).await
  }
}

impl ByteSink for TcpEndpoint {
  async fn write(&self, buf: &[u8]) -> io::Result<usize> {
    let mut stream = &*self.0;
    stream.write(buf).await
  }

  async fn shutdown(&self) -> io::Result<()> {
    let mut stream = &*self.0;
    stream.shutdown().await
  }
}

pub struct Proxy {
  accept_task: JoinHandle<()>,
  shutdown_tx: watch::Sender<bool>,
  local_addr: SocketAddr,
}

impl Proxy {
  pub async fn bind(
    listen_host: &str,
    listen_port: u16,
    upstream_port: u16,
    new_connection: NewConnectionHook,
    data: DataHook,
  ) -> io::Result<Self> {
    let listener = TcpListener::bind((listen_host, listen_port)).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    info!(event = "proxy_listening", addr = %local_addr, upstream_port, "proxy accept loop started");

    let accept_task = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = shutdown_rx.changed() => {
            info!(event = "proxy_shutdown", "shutdown requested; stopping accept loop");
            break;
          }
          accepted = listener.accept() => {
            match accepted {
              Ok((stream, peer)) => {
                let new_connection = Arc::clone(&new_connection);
                let data = Arc::clone(&data);
                tokio::spawn(handle_client(stream, peer, upstream_port, new_connection, data));
              }
              Err(err) => {
                error!(error = %err, "accept error; continuing to accept");
              }
            }
          }
        }
      }
    });

    Ok(Self {
      accept_task,
      shutdown_tx,
      local_addr,
    })
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Closes the listener. In-flight client sessions are left to finish
  /// naturally; this only stops new connections from being accepted.
  pub async fn close(self) {
    let _ = self.shutdown_tx.send(true);
    let _ = self.accept_task.await;
  }
}

async fn handle_client(
  client_stream: TcpStream,
  peer: SocketAddr,
  upstream_port: u16,
  new_connection: NewConnectionHook,
  data: DataHook,
) {
  debug!(event = "client_connected", %peer, "client connected");
  let client = TcpEndpoint::new(client_stream);

  let policy = OpenPolicy {
    open_on_read: false,
    open_on_write: true,
  };
  let upstream: Arc<LazyConn<TcpEndpoint>> = Arc::new(LazyConn::new(policy, move || async move {
    new_connection().await?;
    let stream = TcpStream::connect(("127.0.0.1", upstream_port)).await?;
    Ok(TcpEndpoint::new(stream))
  }));

  let (tx, mut rx) = activity_channel();
  let drainer = tokio::spawn(async move {
    while rx.recv().await.is_some() {
      data();
    }
  });

  let client_to_upstream = {
    let client = client.clone();
    let upstream = Arc::clone(&upstream);
    let tx = tx.clone();
    tokio::spawn(async move { copy_with_activity(&client, &*upstream, &tx).await })
  };

  let result = copy_with_activity(&*upstream, &client, &tx).await;
  drop(tx);

  let _ = upstream.close().await;
  let _ = client.shutdown().await;
  let _ = client_to_upstream.await;
  let _ = drainer.await;

  match result {
    Ok(()) => debug!(event = "client_disconnected", %peer, "client session ended"),
    Err(err) => debug!(event = "client_disconnected", %peer, error = %err, "client session ended with error"),
  }
}
