//! Reference `Driver` for a line-oriented serial transport. Generic over
//! `AsyncRead + AsyncWrite` so tests can drive it with an in-memory duplex
//! pair instead of a real TTY (no serial-port crate is in the teacher's
//! dependency stack, and the device drivers are explicitly out of the
//! core's scope per SPEC_FULL.md §1).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use crate::driver::{CommandFault, Driver, DriverState};
use crate::telemetry::TelemetryValue;

const REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SerialLineDriver<T> {
    device: String,
    transport: Option<BufReader<T>>,
    last_line: Option<String>,
}

impl<T> SerialLineDriver<T> {
    pub fn new(device: impl Into<String>) -> Self {
        Self { device: device.into(), transport: None, last_line: None }
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> Driver for SerialLineDriver<T> {
    async fn open(&mut self) -> Result<(), CommandFault> {
        // Transport construction happens outside the driver (it depends on
        // the concrete `T`); `open` here only asserts the precondition that
        // the caller has already attached one via `attach`.
        if self.transport.is_none() {
            return Err(CommandFault::Fatal(format!(
                "serial line '{}' has no transport attached",
                self.device
            )));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CommandFault> {
        self.transport = None;
        Ok(())
    }

    async fn read_state(&mut self) -> Result<DriverState, CommandFault> {
        Ok(vec![(
            "last_line".into(),
            TelemetryValue::String(self.last_line.clone().unwrap_or_default()),
        )])
    }

    async fn invoke(&mut self, verb: &str, arg: &Value) -> Result<(), CommandFault> {
        match verb {
            "line" => {
                let text = arg
                    .as_str()
                    .ok_or_else(|| CommandFault::Warning("line verb expects a string argument".into()))?;
                let transport = self
                    .transport
                    .as_mut()
                    .ok_or_else(|| CommandFault::Fatal("serial line not open".into()))?;

                timeout(REMOTE_CALL_TIMEOUT, async {
                    transport.get_mut().write_all(text.as_bytes()).await?;
                    transport.get_mut().write_all(b"\n").await?;
                    let mut line = String::new();
                    transport.read_line(&mut line).await?;
                    Ok::<_, std::io::Error>(line.trim_end().to_string())
                })
                .await
                .map_err(|_| CommandFault::Warning("serial round trip timed out".into()))?
                .map_err(|e| CommandFault::Warning(format!("serial I/O failed: {e}")))
                .map(|line| self.last_line = Some(line))
            }
            other => Err(CommandFault::Warning(format!("unrecognized serial command '{other}'"))),
        }
    }
}

impl<T: AsyncRead + Unpin> SerialLineDriver<T> {
    /// Attach a concrete transport (a real TTY in production, an in-memory
    /// duplex pair in tests).
    pub fn attach(&mut self, transport: T) {
        self.transport = Some(BufReader::new(transport));
    }
}
