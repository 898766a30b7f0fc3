//! A connection proxy whose underlying socket is dialed lazily, on first
//! read or write depending on policy, and which survives close-before-open.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

/// Selects which operation triggers the lazy open. The proxy always uses
/// `open_on_read = false, open_on_write = true`: the upstream should not be
/// dialed until the client has actually sent a byte.
#[derive(Debug, Clone, Copy)]
pub struct OpenPolicy {
  pub open_on_read: bool,
  pub open_on_write: bool,
}

/// A byte-readable endpoint. Implemented for [`crate::proxy::TcpEndpoint`].
pub trait ByteSource: Send + Sync {
  fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// A byte-writable, closable endpoint.
pub trait ByteSink: Send + Sync {
  fn write(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
  fn shutdown(&self) -> impl Future<Output = io::Result<()>> + Send;
}

type BoxOpen<T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send>>;
type OpenerFn<T> = Box<dyn FnOnce() -> BoxOpen<T> + Send>;

enum State<T> {
  Uninitialized,
  Open(T),
  Closed(io::ErrorKind, Arc<str>),
}

struct Inner<T> {
  state: State<T>,
  opener: Option<OpenerFn<T>>,
}

pub struct LazyConn<T> {
  policy: OpenPolicy,
  inner: Mutex<Inner<T>>,
  opened: Notify,
}

impl<T> LazyConn<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new<F, Fut>(policy: OpenPolicy, opener: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<T>> + Send + 'static,
  {
    let opener: OpenerFn<T> = Box::new(move || Box::pin(opener()));
    Self {
      policy,
      inner: Mutex::new(Inner {
        state: State::Uninitialized,
        opener: Some(opener),
      }),
      opened: Notify::new(),
    }
  }

  /// Drives the open transition. Holding the lock across the opener's await
  /// is deliberate: concurrent readers/writers that arrive mid-open serialize
  /// on this lock rather than racing to dial twice.
  async fn ensure_open(&self) -> io::Result<T> {
    let mut inner = self.inner.lock().await;
    match &inner.state {
      State::Open(conn) => return Ok(conn.clone()),
      State::Closed(kind, msg) => return Err(io::Error::new(*kind, msg.to_string())),
      State::Uninitialized => {}
    }
    let opener = inner
      .opener
      .take()
      .expect("lazy conn reached Uninitialized with no opener");
    match opener().await {
      Ok(conn) => {
        inner.state = State::Open(conn.clone());
        drop(inner);
        self.opened.notify_waiters();
        Ok(conn)
      }
      Err(err) => {
        let kind = err.kind();
        let msg: Arc<str> = err.to_string().into();
        inner.state = State::Closed(kind, Arc::clone(&msg));
        drop(inner);
        self.opened.notify_waiters();
        Err(io::Error::new(kind, msg.to_string()))
      }
    }
  }

  /// Waits for another caller's open (or close) to resolve the connection,
  /// without triggering the open itself. Registers interest on `opened`
  /// before inspecting the state so a concurrent resolution can't be missed
  /// between the check and the wait.
  async fn wait_until_resolved(&self) -> io::Result<T> {
    loop {
      let notified = self.opened.notified();
      {
        let inner = self.inner.lock().await;
        match &inner.state {
          State::Open(conn) => return Ok(conn.clone()),
          State::Closed(kind, msg) => return Err(io::Error::new(*kind, msg.to_string())),
          State::Uninitialized => {}
        }
      }
      notified.await;
    }
  }

  async fn resolve_for_read(&self) -> io::Result<T> {
    if self.policy.open_on_read {
      self.ensure_open().await
    } else {
      self.wait_until_resolved().await
    }
  }

  async fn resolve_for_write(&self) -> io::Result<T> {
    if self.policy.open_on_write {
      self.ensure_open().await
    } else {
      self.wait_until_resolved().await
    }
  }
}

impl<T> LazyConn<T>
where
  T: ByteSource + Clone + Send + Sync + 'static,
{
  pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
    let conn = self.resolve_for_read().await?;
    conn.read(buf).await
  }
}

impl<T> LazyConn<T>
where
  T: ByteSink + Clone + Send + Sync + 'static,
{
  pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
    let conn = self.resolve_for_write().await?;
    conn.write(buf).await
  }

  /// Idempotent. Closing an uninitialized connection moves it straight to
  /// closed without ever invoking the opener, and wakes anyone blocked
  /// waiting for the open to resolve.
  pub async fn close(&self) -> io::Result<()> {
    let mut inner = self.inner.lock().await;
    let placeholder = State::Closed(io::ErrorKind::NotConnected, Arc::from(""));
    match std::mem::replace(&mut inner.state, placeholder) {
      State::Uninitialized => {
        inner.state = State::Closed(
          io::ErrorKind::NotConnected,
          Arc::from("use of lazy connection that was closed before being initialized"),
        );
        inner.opener = None;
        drop(inner);
        self.opened.notify_waiters();
        Ok(())
      }
      State::Open(conn) => {
        let result = conn.shutdown().await;
        inner.state = State::Closed(io::ErrorKind::NotConnected, Arc::from("closed by caller already"));
        drop(inner);
        self.opened.notify_waiters();
        result
      }
      closed @ State::Closed(..) => {
        inner.state = closed;
        Ok(())
      }
    }
  }
}

impl<T> ByteSource for LazyConn<T>
where
  T: ByteSource + Clone + Send + Sync + 'static,
{
  async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
    LazyConn::read(self, buf).await
  }
}

impl<T> ByteSink for LazyConn<T>
where
  T: ByteSink + Clone + Send + Sync + 'static,
{
  async fn write(&self, buf: &[u8]) -> io::Result<usize> {
    LazyConn::write(self, buf).await
  }

  async fn shutdown(&self) -> io::Result<()> {
    LazyConn::close(self).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::Mutex as AsyncMutex;

  #[derive(Clone, Default)]
  struct MockConn {
    inner: Arc<AsyncMutex<Vec<u8>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
    writes: Arc<AtomicUsize>,
  }

  impl ByteSource for MockConn {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
      let mut data = self.inner.lock().await;
      let n = data.len().min(buf.len());
      buf[..n].copy_from_slice(&data[..n]);
      data.drain(..n);
      Ok(n)
    }
  }

  impl ByteSink for MockConn {
    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
      self.writes.fetch_add(1, Ordering::SeqCst);
      self.inner.lock().await.extend_from_slice(buf);
      Ok(buf.len())
    }

    async fn shutdown(&self) -> io::Result<()> {
      self.closed.store(true, Ordering::SeqCst);
      Ok(())
    }
  }

  fn proxy_policy() -> OpenPolicy {
    OpenPolicy {
      open_on_read: false,
      open_on_write: true,
    }
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn write_opens_and_unblocks_pending_read() {
    let conn = MockConn::default();
    let opened_conn = conn.clone();
    let lc: Arc<LazyConn<MockConn>> =
      Arc::new(LazyConn::new(proxy_policy(), move || async move { Ok(opened_conn) }));

    let reader = {
      let lc = Arc::clone(&lc);
      tokio::spawn(async move {
        let mut buf = [0u8; 16];
        lc.read(&mut buf).await.map(|n| buf[..n].to_vec())
      })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!reader.is_finished(), "read should block before any write opens the conn");

    lc.write(b"hi").await.expect("write opens connection");
    let bytes = reader.await.unwrap().expect("read succeeds after open");
    assert_eq!(bytes, b"hi");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn close_before_open_never_invokes_opener() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let invoked_clone = Arc::clone(&invoked);
    let lc: LazyConn<MockConn> = LazyConn::new(proxy_policy(), move || async move {
      invoked_clone.fetch_add(1, Ordering::SeqCst);
      Ok(MockConn::default())
    });

    lc.close().await.expect("close before open is ok");

    let write_err = lc.write(b"x").await.unwrap_err();
    assert_eq!(write_err.kind(), io::ErrorKind::NotConnected);
    assert_eq!(invoked.load(Ordering::SeqCst), 0, "opener must never run");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn close_after_open_closes_underlying_conn_once() {
    let conn = MockConn::default();
    let opened_conn = conn.clone();
    let lc: LazyConn<MockConn> =
      LazyConn::new(proxy_policy(), move || async move { Ok(opened_conn) });

    lc.write(b"hello").await.expect("write opens connection");
    lc.close().await.expect("first close succeeds");
    assert!(conn.closed.load(Ordering::SeqCst));

    let err = lc.write(b"more").await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn double_close_is_a_no_op() {
    let lc: LazyConn<MockConn> =
      LazyConn::new(proxy_policy(), move || async move { Ok(MockConn::default()) });
    lc.close().await.expect("first close");
    lc.close().await.expect("second close is fine too");
  }
}
