//! End-to-end exercise of the command socket, cycle engine, and telemetry
//! HTTP listener wired together the way `main.rs` wires them, without
//! going through a real driver connection (no PSU/remote-shell fixture is
//! available in CI, so the test VCU only has a `generic` leaf).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use vcuhil::component;
use vcuhil::config::{Config, SubcomponentConfig, VcuConfig};
use vcuhil::cycle::CycleEngine;
use vcuhil::ingress::command_socket::CommandSocket;
use vcuhil::ingress::telemetry_http::TelemetryHttp;
use vcuhil::log_writer::LogWriter;
use vcuhil::queue::{self, TelemetryQueue};
use vcuhil::runtime::{self, Task};
use vcuhil::sink::NullSink;

fn test_config(cmd_port: u16, telem_port: u16) -> Config {
    let mut vcu: VcuConfig = BTreeMap::new();
    vcu.insert("misc".into(), SubcomponentConfig::Generic {});
    let mut vcus = BTreeMap::new();
    vcus.insert("donatello".into(), vcu);
    Config { cmd_port, telem_port, log_path: "unused.log".into(), sink_url: None, vcus }
}

#[tokio::test]
async fn command_dispatch_shows_up_in_drained_telemetry() {
    let cmd_port = 17060;
    let telem_port = 17666;
    let config = test_config(cmd_port, telem_port);

    let tree = component::build_tree(&config);
    let (command_tx, command_rx) = queue::command_channel();
    let telemetry_queue = Arc::new(TelemetryQueue::default());
    let tmp = NamedTempFile::new().unwrap();
    let log_writer = LogWriter::open(tmp.path()).await.unwrap();

    let cycle_engine = CycleEngine::new(tree, command_rx, telemetry_queue.clone(), log_writer, Box::new(NullSink));
    let command_socket = CommandSocket::new(format!("127.0.0.1:{cmd_port}"), command_tx);
    let telemetry_http = TelemetryHttp::new(format!("127.0.0.1:{telem_port}"), telemetry_queue);

    let shutdown = CancellationToken::new();
    let tasks: Vec<Box<dyn Task>> = vec![Box::new(cycle_engine), Box::new(command_socket), Box::new(telemetry_http)];
    let handle = runtime::spawn_tasks(tasks, shutdown.clone());

    // Give the listeners a moment to bind before connecting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut cmd_stream = TcpStream::connect(("127.0.0.1", cmd_port)).await.unwrap();
    cmd_stream
        .write_all(b"{\"operation\":9,\"target\":\"donatello\",\"options\":null}\n")
        .await
        .unwrap();
    let mut reader = BufReader::new(&mut cmd_stream);
    let mut reply = String::new();
    reader.read_line(&mut reply).await.unwrap();
    assert_eq!(reply.trim(), "[\"ACK\"]");
    drop(cmd_stream);

    // Let at least one cycle tick run.
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let mut telem_stream = TcpStream::connect(("127.0.0.1", telem_port)).await.unwrap();
    telem_stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    telem_stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("donatello.vcu_state"));
    assert!(response.contains("\"booting\"") || response.contains("\"idle\""));

    shutdown.cancel();
    let _ = handle.join().await;
}
