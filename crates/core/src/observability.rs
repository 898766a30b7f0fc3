//! Optional loopback HTTP healthcheck/metrics listener.
//!
//! The original implementation's env config carried `MetricsPort`/`MetricsHost`
//! fields that the distilled spec dropped; this restores them as an additive,
//! off-by-default feature. Enabling or disabling it does not change the
//! behavior of the proxy or coordinator.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// Shared flag the coordinator's subprocess manager can be polled through to
/// report whether the backend is currently believed to be running.
#[derive(Clone, Default)]
pub struct BackendStatus(Arc<AtomicBool>);

impl BackendStatus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_running(&self, running: bool) {
    self.0.store(running, Ordering::Relaxed);
  }

  pub fn is_running(&self) -> bool {
    self.0.load(Ordering::Relaxed)
  }
}

pub struct ObservabilityServer {
  task: JoinHandle<()>,
}

impl ObservabilityServer {
  pub async fn bind(config: &ObservabilityConfig, status: BackendStatus) -> io::Result<Self> {
    let listener = TcpListener::bind((config.metrics_host.as_str(), config.metrics_port)).await?;
    let healthcheck_path = config.healthcheck_path.clone();

    info!(
      event = "observability_listening",
      addr = %listener.local_addr()?,
      path = %healthcheck_path,
      "healthcheck/metrics listener started"
    );

    let task = tokio::spawn(async move {
      loop {
        match listener.accept().await {
          Ok((stream, _addr)) => {
            let path = healthcheck_path.clone();
            let status = status.clone();
            tokio::spawn(async move {
              let io = TokioIo::new(stream);
              let service = service_fn(move |req| handle(req, path.clone(), status.clone()));
              if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %err, "observability connection error");
              }
            });
          }
          Err(err) => {
            error!(error = %err, "observability accept error; closing listener");
            break;
          }
        }
      }
    });

    Ok(Self { task })
  }

  pub async fn close(self) {
    self.task.abort();
    let _ = self.task.await;
  }
}

async fn handle(
  req: Request<IncomingBody>,
  healthcheck_path: String,
  status: BackendStatus,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
  match req.uri().path() {
    path if path == healthcheck_path => Response::builder()
      .status(StatusCode::OK)
      .body(Full::from(Bytes::from_static(b"ok"))),
    "/metrics" => {
      let running = if status.is_running() { 1 } else { 0 };
      let body = format!("sleepingd_backend_running {running}\n");
      Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Full::from(Bytes::from(body)))
    }
    _ => Response::builder()
      .status(StatusCode::NOT_FOUND)
      .body(Full::from(Bytes::from_static(b"not found"))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::BodyExt;
  use hyper::client::conn::http1 as client_http1;
  use tokio::net::TcpStream;

  async fn get(addr: std::net::SocketAddr, path: &str) -> (StatusCode, String) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = client_http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
      let _ = conn.await;
    });
    let req = Request::builder()
      .uri(path)
      .body(http_body_util::Empty::<Bytes>::new())
      .unwrap();
    let resp = sender.send_request(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn healthcheck_path_returns_ok() {
    let probe = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = ObservabilityConfig {
      metrics_port: port,
      metrics_host: "127.0.0.1".to_string(),
      healthcheck_path: "/healthz".to_string(),
    };
    let status = BackendStatus::new();
    let server = ObservabilityServer::bind(&config, status.clone()).await.unwrap();
    let addr: std::net::SocketAddr = (std::net::Ipv4Addr::LOCALHOST, port).into();

    let (status_code, body) = get(addr, "/healthz").await;
    assert_eq!(status_code, StatusCode::OK);
    assert_eq!(body, "ok");

    status.set_running(true);
    let (status_code, body) = get(addr, "/metrics").await;
    assert_eq!(status_code, StatusCode::OK);
    assert_eq!(body, "sleepingd_backend_running 1\n");

    server.close().await;
  }
}
