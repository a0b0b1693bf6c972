//! Reference `Driver` for a remote shell endpoint (SGA/HPA in the
//! glossary). Used both as a leaf Component's driver and by the pinger
//! subtask (SPEC_FULL.md §4.5) to probe liveness and fetch a version
//! string. HPA reaches its host by tunneling through SGA's; this driver
//! models that by simply dialing a different configured host when a
//! `tunnel_via` host is set, rather than implementing a real SSH tunnel.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use crate::driver::{CommandFault, Driver, DriverState};
use crate::telemetry::TelemetryValue;

pub const REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RemoteShellDriver {
    host: String,
    port: u16,
    tunnel_via: Option<String>,
    conn: Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>,
}

impl RemoteShellDriver {
    pub fn new(host: impl Into<String>, port: u16, tunnel_via: Option<String>) -> Self {
        Self { host: host.into(), port, tunnel_via, conn: None }
    }

    /// Send one line and read the reply line, bounded by the remote-call
    /// timeout. Returns `Ok(None)` on timeout or transport error rather than
    /// propagating, so a caller probing liveness can simply treat `None` as
    /// "not connected" without tearing down the task (SPEC_FULL.md §4.5).
    pub async fn probe_line(&mut self, command: &str) -> Option<String> {
        let (reader, writer) = self.conn.as_mut()?;
        let result = timeout(REMOTE_CALL_TIMEOUT, async {
            writer.write_all(command.as_bytes()).await.ok()?;
            writer.write_all(b"\n").await.ok()?;
            let mut line = String::new();
            reader.read_line(&mut line).await.ok()?;
            Some(line.trim_end().to_string())
        })
        .await;
        result.ok().flatten()
    }

    pub fn endpoint(&self) -> &str {
        self.tunnel_via.as_deref().unwrap_or(&self.host)
    }
}

#[async_trait]
impl Driver for RemoteShellDriver {
    async fn open(&mut self) -> Result<(), CommandFault> {
        if self.conn.is_some() {
            return Ok(());
        }
        let stream = timeout(REMOTE_CALL_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| CommandFault::Warning("remote shell connect timed out".into()))?
            .map_err(|e| CommandFault::Warning(format!("remote shell connect failed: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        self.conn = Some((BufReader::new(read_half), write_half));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CommandFault> {
        self.conn = None;
        Ok(())
    }

    async fn read_state(&mut self) -> Result<DriverState, CommandFault> {
        let connected = self.conn.is_some();
        Ok(vec![("connected".into(), TelemetryValue::Boolean(connected))])
    }

    async fn invoke(&mut self, verb: &str, arg: &Value) -> Result<(), CommandFault> {
        match verb {
            "line" => {
                let text = arg
                    .as_str()
                    .ok_or_else(|| CommandFault::Warning("line verb expects a string argument".into()))?;
                self.probe_line(text)
                    .await
                    .map(|_| ())
                    .ok_or_else(|| CommandFault::Warning("remote shell did not respond".into()))
            }
            other => Err(CommandFault::Warning(format!("unrecognized remote-shell command '{other}'"))),
        }
    }
}
