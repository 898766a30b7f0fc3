//! Copies bytes between two endpoints, signaling activity on every non-empty
//! read/write so a [`crate::dead_mans_switch::DeadMansSwitch`] can be pinged.

use std::io;

use tokio::sync::mpsc;

use crate::lazy_conn::{ByteSink, ByteSource};

const BUFFER_SIZE: usize = 32 * 1024;

/// Tokio's `mpsc` has no zero-capacity variant; capacity 1 is the closest
/// analogue to an unbuffered rendezvous channel and still guarantees the
/// copier can never outrun the drainer by more than one signal.
pub fn activity_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
  mpsc::channel(1)
}

/// Copies `src` into `dst` until EOF, sending on `activity` before and after
/// every non-empty write. A zero-byte read is always treated as EOF — unlike
/// Go's `io.Reader`, tokio's `AsyncRead` does not distinguish a spurious
/// empty read from end of stream.
pub async fn copy_with_activity<S, D>(
  src: &S,
  dst: &D,
  activity: &mpsc::Sender<()>,
) -> io::Result<()>
where
  S: ByteSource,
  D: ByteSink,
{
  let mut buf = vec![0u8; BUFFER_SIZE];
  loop {
    let n = src.read(&mut buf).await?;
    if n == 0 {
      return Ok(());
    }
    let _ = activity.send(()).await;
    write_all(dst, &buf[..n]).await?;
    let _ = activity.send(()).await;
  }
}

async fn write_all<D: ByteSink>(dst: &D, mut buf: &[u8]) -> io::Result<()> {
  while !buf.is_empty() {
    let n = dst.write(buf).await?;
    if n == 0 {
      return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned zero bytes"));
    }
    buf = &buf[n..];
  }
  Ok(())
}
