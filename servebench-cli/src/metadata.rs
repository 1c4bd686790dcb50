//! Metadata Endpoint
//!
//! Small HTTP endpoint that answers every request with the resolved
//! [`Configuration`] as JSON, so tooling can ask a running harness what it
//! is serving. The harness itself is synchronous; the endpoint gets its own
//! tokio runtime and stops through a shutdown signal when dropped.

use axum::{Json, Router, extract::State};
use servebench_core::Configuration;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Background JSON endpoint
#[derive(Debug)]
pub struct MetadataServer {
    addr: SocketAddr,
    runtime: Runtime,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl MetadataServer {
    /// Bind `addr` and start answering with `config`
    pub fn start(addr: SocketAddr, config: &Configuration) -> io::Result<Self> {
        let body = serde_json::to_value(config).map_err(io::Error::other)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("servebench-metadata")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind(addr))?;
        let addr = listener.local_addr()?;
        let app = create_app(body);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server_handle = runtime.spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "metadata server error");
            }
        });

        info!(%addr, "metadata server listening");
        Ok(Self {
            addr,
            runtime,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving and wait for the listener to close
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            if self.runtime.block_on(handle).is_err() {
                warn!("metadata server task panicked");
            }
        }
    }
}

impl Drop for MetadataServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Every path and method gets the configuration
fn create_app(config: serde_json::Value) -> Router {
    Router::new()
        .fallback(configuration_handler)
        .with_state(Arc::new(config))
}

async fn configuration_handler(
    State(config): State<Arc<serde_json::Value>>,
) -> Json<serde_json::Value> {
    Json(config.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn fetch(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_serves_configuration() {
        let config = Configuration::builder("facebook/opt-13b", 0.9, "d.json")
            .port(8123)
            .build()
            .unwrap();
        let mut server = MetadataServer::start("127.0.0.1:0".parse().unwrap(), &config).unwrap();

        let response = fetch(
            server.local_addr(),
            "GET /metadata HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.to_ascii_lowercase().contains("content-type: application/json"));
        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["model"], "facebook/opt-13b");
        assert_eq!(json["port"], 8123);

        server.stop();
        assert!(TcpStream::connect(server.local_addr()).is_err());
    }

    #[test]
    fn test_any_path_answers() {
        let config = Configuration::builder("m", 0.9, "d.json").build().unwrap();
        let server = MetadataServer::start("127.0.0.1:0".parse().unwrap(), &config).unwrap();

        let response = fetch(
            server.local_addr(),
            "POST /anything/else HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("\"model\":\"m\""));
    }

    #[test]
    fn test_bind_conflict_is_error() {
        let config = Configuration::builder("m", 0.9, "d.json").build().unwrap();
        let first = MetadataServer::start("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        assert!(MetadataServer::start(first.local_addr(), &config).is_err());
    }
}
