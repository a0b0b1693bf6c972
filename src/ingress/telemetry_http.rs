//! Telemetry HTTP listener (SPEC_FULL.md §4.7, §6): a `GET /` drains every
//! queued cycle snapshot and returns them as a JSON array of snapshots, one
//! entry per drained cycle. Framing mirrors the teacher's
//! `subsystems/comms/http.rs` -- manual request-line parsing, manual
//! response framing, no HTTP framework in the dependency stack for this.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::queue::TelemetryQueue;
use crate::runtime::{Task, TaskFuture};

const MAX_HEADER_BYTES: usize = 8 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TelemetryHttp {
    bind_addr: String,
    queue: Arc<TelemetryQueue>,
}

impl TelemetryHttp {
    pub fn new(bind_addr: impl Into<String>, queue: Arc<TelemetryQueue>) -> Self {
        Self { bind_addr: bind_addr.into(), queue }
    }
}

impl Task for TelemetryHttp {
    fn id(&self) -> &str {
        "telemetry-http"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> TaskFuture {
        Box::pin(run(self.bind_addr, self.queue, shutdown))
    }
}

async fn run(bind_addr: String, queue: Arc<TelemetryQueue>, shutdown: CancellationToken) -> Result<(), AppError> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Bind(format!("telemetry http bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "telemetry http listening");
    serve(listener, queue, shutdown).await
}

async fn serve(listener: TcpListener, queue: Arc<TelemetryQueue>, shutdown: CancellationToken) -> Result<(), AppError> {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("telemetry http shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "telemetry http client connected");
                        let queue = queue.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, queue).await {
                                warn!("telemetry connection handling failed: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("telemetry accept error: {e}"),
                }
            }
        }
    }

    Ok(())
}

async fn handle_connection(mut socket: TcpStream, queue: Arc<TelemetryQueue>) -> Result<(), AppError> {
    let Some((method, path)) = read_request_line(&mut socket).await? else {
        return Ok(());
    };

    if method != "GET" {
        write_response(&mut socket, "405 Method Not Allowed", b"method not allowed\n").await?;
        return Ok(());
    }

    match path.as_str() {
        "/" => {
            // A JSON array of the drained snapshots (SPEC_FULL.md §4.7): one
            // entry per drained cycle, each entry itself the cycle's list of
            // timestamp buckets. Not flattened -- draining two cycles must
            // yield two array entries, not one merged bucket list.
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, queue.drain()).await.unwrap_or_default();
            let body = serde_json::to_vec(&drained).unwrap_or_else(|_| b"[]".to_vec());
            write_response(&mut socket, "200 OK", &body).await?;
        }
        _ => {
            write_response(&mut socket, "404 Not Found", b"not found\n").await?;
        }
    }

    Ok(())
}

async fn read_request_line(socket: &mut TcpStream) -> Result<Option<(String, String)>, AppError> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(AppError::Bind("http request truncated".into()));
        }

        buffer.extend_from_slice(&chunk[..n]);

        if buffer.len() > MAX_HEADER_BYTES {
            return Err(AppError::Bind("http request headers too large".into()));
        }

        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let request = String::from_utf8(buffer).map_err(|_| AppError::Bind("http request was not valid utf-8".into()))?;
    let first_line = request.lines().next().ok_or_else(|| AppError::Bind("empty http request".into()))?;

    let mut parts = first_line.split_whitespace();
    let method = parts.next().ok_or_else(|| AppError::Bind("missing http method".into()))?;
    let path = parts.next().ok_or_else(|| AppError::Bind("missing http path".into()))?;

    Ok(Some((method.to_string(), path.to_string())))
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &[u8]) -> Result<(), AppError> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    socket.write_all(header.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{TelemetryPoint, TelemetryValue, TimestampBucket};
    use tokio::io::AsyncWriteExt as _;

    async fn read_all(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn telemetry_path_returns_drained_snapshot() {
        let queue = Arc::new(TelemetryQueue::new(4));
        queue
            .push(vec![TimestampBucket {
                timestamp: 1.0,
                points: vec![TelemetryPoint { name: "donatello.vcu_state".into(), timestamp: 1.0, value: TelemetryValue::String("idle".into()) }],
            }])
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let server = tokio::spawn(serve(listener, queue.clone(), shutdown_task));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let response = read_all(&mut stream).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("donatello.vcu_state"));

        shutdown.cancel();
        let _ = server.await;
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let queue = Arc::new(TelemetryQueue::new(4));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let server = tokio::spawn(serve(listener, queue, shutdown_task));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let response = read_all(&mut stream).await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));

        shutdown.cancel();
        let _ = server.await;
    }
}
