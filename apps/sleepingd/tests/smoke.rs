use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Command, Stdio};
use std::time::Duration;

/// End-to-end: start the real binary against a tiny hand-rolled echo backend,
/// confirm a client request round-trips, then confirm the backend is gone
/// again after the idle timeout elapses.
#[test]
fn cold_starts_backend_and_stops_it_after_idle_timeout() {
  let listen_port = free_port();
  let command_port = free_port();

  // `nc`-less one-shot TCP echo server the child shell can exec into.
  let command = format!(
    "python3 -c \"import socket;s=socket.socket();s.setsockopt(socket.SOL_SOCKET,socket.SO_REUSEADDR,1);s.bind(('127.0.0.1',{command_port}));s.listen(1);c,_=s.accept();c.sendall(c.recv(4096));c.close()\""
  );

  let mut child = Command::new(env!("CARGO_BIN_EXE_sleepingd"))
    .env("SLEEPING_BEAUTY_COMMAND", &command)
    .env("SLEEPING_BEAUTY_TIMEOUT_SECONDS", "1")
    .env("SLEEPING_BEAUTY_COMMAND_PORT", command_port.to_string())
    .env("SLEEPING_BEAUTY_LISTEN_PORT", listen_port.to_string())
    .stdout(Stdio::null())
    .stderr(Stdio::piped())
    .spawn()
    .expect("spawn sleepingd");

  std::thread::sleep(Duration::from_millis(300));

  let mut client = connect_with_retry(listen_port);
  client.write_all(b"hello").unwrap();
  let mut buf = [0u8; 5];
  client.read_exact(&mut buf).unwrap();
  assert_eq!(&buf, b"hello");
  drop(client);

  std::thread::sleep(Duration::from_millis(1500));
  assert!(
    TcpStream::connect(("127.0.0.1", command_port)).is_err(),
    "backend should be stopped after the idle timeout"
  );

  let _ = child.kill();
  let _ = child.wait();
}

fn connect_with_retry(port: u16) -> TcpStream {
  for _ in 0..50 {
    if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
      return stream;
    }
    std::thread::sleep(Duration::from_millis(20));
  }
  panic!("proxy never started accepting connections on {port}");
}

fn free_port() -> u16 {
  let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);
  port
}
