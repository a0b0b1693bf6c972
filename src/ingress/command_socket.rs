//! Command socket: accepts newline-delimited JSON command envelopes
//! (SPEC_FULL.md §4.7) and forwards parsed commands into the cycle
//! engine's unbounded queue. One connection may submit many commands in
//! sequence; each line gets its own `["ACK"]` / `["INVALID JSON"]` /
//! `["INVALID CMD"]` reply before the next line is read.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{self, Command, WireAck};
use crate::error::AppError;
use crate::runtime::{Task, TaskFuture};

pub struct CommandSocket {
    bind_addr: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl CommandSocket {
    pub fn new(bind_addr: impl Into<String>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { bind_addr: bind_addr.into(), commands }
    }
}

impl Task for CommandSocket {
    fn id(&self) -> &str {
        "command-socket"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> TaskFuture {
        Box::pin(run(self.bind_addr, self.commands, shutdown))
    }
}

async fn run(bind_addr: String, commands: mpsc::UnboundedSender<Command>, shutdown: CancellationToken) -> Result<(), AppError> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Bind(format!("command socket bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "command socket listening");
    serve(listener, commands, shutdown).await
}

async fn serve(listener: TcpListener, commands: mpsc::UnboundedSender<Command>, shutdown: CancellationToken) -> Result<(), AppError> {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("command socket shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "command client connected");
                        let commands = commands.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, commands).await {
                                warn!("command connection handling failed: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("command accept error: {e}"),
                }
            }
        }
    }

    Ok(())
}

/// Reads exactly one line per connection, replies, and closes (SPEC_FULL.md
/// §4.7 / `original_source/vcuhil_service.py::json_server`'s
/// `readline()` + reply + `writer.close()` shape). A connection that
/// closes without sending anything is simply dropped.
async fn handle_connection(socket: TcpStream, commands: mpsc::UnboundedSender<Command>) -> Result<(), AppError> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let Some(line) = lines.next_line().await? else {
        return Ok(());
    };

    let ack = match command::parse_line(&line) {
        Ok(command) => {
            let _ = commands.send(command);
            WireAck::Ack
        }
        Err(command::EnvelopeError::InvalidJson) => WireAck::InvalidJson,
        Err(command::EnvelopeError::InvalidCommand) => WireAck::InvalidCommand,
    };
    let mut reply = serde_json::to_string(&ack.as_json()).unwrap_or_else(|_| "[\"INVALID JSON\"]".to_string());
    reply.push('\n');
    write_half.write_all(reply.as_bytes()).await?;
    write_half.shutdown().await?;

    Ok(())
}
