//! vcuhil — hardware-in-the-loop supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init logger at "info"
//!   3. Load config (CLI-provided path, else `vcuhil.toml`, else defaults)
//!   4. Build the component tree from the configured VCU fleet
//!   5. Spawn the cycle engine and dual ingress under one shared
//!      cancellation token
//!   6. Wait for Ctrl-C, then shut down cooperatively

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use vcuhil::component;
use vcuhil::config;
use vcuhil::cycle::CycleEngine;
use vcuhil::error::AppError;
use vcuhil::ingress::command_socket::CommandSocket;
use vcuhil::ingress::telemetry_http::TelemetryHttp;
use vcuhil::log_writer::LogWriter;
use vcuhil::logger;
use vcuhil::queue::{self, TelemetryQueue};
use vcuhil::runtime::{self, Task};
use vcuhil::sink::{HttpLineSink, NullSink, TimeSeriesSink};

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    if let Err(e) = runtime.block_on(run()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    logger::init("info", false, None)?;

    let config_path = std::env::args().nth(1);
    let config = config::load(config_path.as_deref())?;

    info!(
        cmd_port = config.cmd_port,
        telem_port = config.telem_port,
        vcu_count = config.vcus.len(),
        "config loaded"
    );

    let tree = component::build_tree(&config);

    let (command_tx, command_rx) = queue::command_channel();
    let telemetry_queue = Arc::new(TelemetryQueue::default());
    let log_writer = LogWriter::open(&config.log_path).await?;
    let sink: Box<dyn TimeSeriesSink> = match &config.sink_url {
        Some(url) => Box::new(HttpLineSink::new(url.clone())),
        None => Box::new(NullSink),
    };

    let shutdown = CancellationToken::new();

    let cycle_engine = CycleEngine::new(tree, command_rx, telemetry_queue.clone(), log_writer, sink);
    let command_socket = CommandSocket::new(format!("0.0.0.0:{}", config.cmd_port), command_tx);
    let telemetry_http = TelemetryHttp::new(format!("0.0.0.0:{}", config.telem_port), telemetry_queue);

    let tasks: Vec<Box<dyn Task>> = vec![Box::new(cycle_engine), Box::new(command_socket), Box::new(telemetry_http)];
    let handle = runtime::spawn_tasks(tasks, shutdown.clone());

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            ctrl_c_shutdown.cancel();
        }
    });

    handle.join().await
}
