//! Reference `Driver` for a Sorensen-style programmable power supply,
//! talking a line-based request/response text protocol over TCP.
//!
//! Grounded on `original_source/hilcode/supply_commander.py`'s
//! `SorensenXPF6020DP`: the same query/set verbs and the same
//! response-trimming rules, driven directly (no background comm-loop task —
//! the cycle already serializes access, so each call awaits its own
//! round trip).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use crate::driver::{CommandFault, Driver, DriverState};
use crate::telemetry::TelemetryValue;

const REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PowerSupplyDriver {
    host: String,
    port: u16,
    conn: Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>,
}

impl PowerSupplyDriver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, conn: None }
    }

    async fn query(&mut self, command: &str) -> Result<String, CommandFault> {
        let (reader, writer) = self
            .conn
            .as_mut()
            .ok_or_else(|| CommandFault::Fatal("psu driver not open".into()))?;

        timeout(REMOTE_CALL_TIMEOUT, async {
            writer
                .write_all(command.as_bytes())
                .await
                .map_err(|e| CommandFault::Warning(format!("psu write failed: {e}")))?;
            let mut line = String::new();
            reader
                .read_line(&mut line)
                .await
                .map_err(|e| CommandFault::Warning(format!("psu read failed: {e}")))?;
            Ok(line.trim_end().to_string())
        })
        .await
        .map_err(|_| CommandFault::Warning("psu round trip timed out".into()))?
    }

    async fn send(&mut self, command: &str) -> Result<(), CommandFault> {
        let (_, writer) = self
            .conn
            .as_mut()
            .ok_or_else(|| CommandFault::Fatal("psu driver not open".into()))?;
        timeout(REMOTE_CALL_TIMEOUT, writer.write_all(command.as_bytes()))
            .await
            .map_err(|_| CommandFault::Warning("psu write timed out".into()))?
            .map_err(|e| CommandFault::Warning(format!("psu write failed: {e}")))
    }

    fn trim_trailing_unit(s: &str) -> Result<f64, CommandFault> {
        let trimmed = s.strip_suffix(|_: char| true).unwrap_or(s);
        trimmed
            .parse::<f64>()
            .map_err(|e| CommandFault::Warning(format!("psu returned unparsable reading '{s}': {e}")))
    }

    fn trim_setpoint_prefix(s: &str) -> Result<f64, CommandFault> {
        let trimmed = s.get(3..).unwrap_or(s);
        trimmed
            .parse::<f64>()
            .map_err(|e| CommandFault::Warning(format!("psu returned unparsable setpoint '{s}': {e}")))
    }
}

#[async_trait]
impl Driver for PowerSupplyDriver {
    async fn open(&mut self) -> Result<(), CommandFault> {
        if self.conn.is_some() {
            return Ok(());
        }
        let stream = timeout(REMOTE_CALL_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| CommandFault::Fatal("psu connect timed out".into()))?
            .map_err(|e| CommandFault::Fatal(format!("psu connect failed: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        self.conn = Some((BufReader::new(read_half), write_half));
        self.send("*RST").await
    }

    async fn close(&mut self) -> Result<(), CommandFault> {
        self.conn = None;
        Ok(())
    }

    async fn read_state(&mut self) -> Result<DriverState, CommandFault> {
        let idn = self.query("*IDN?").await?;
        let mut state: DriverState = vec![("idn".into(), TelemetryValue::String(idn))];

        for (ch, prefix) in [(1, "pri"), (2, "red")] {
            let meas_volt = Self::trim_trailing_unit(&self.query(&format!("V{ch}O?")).await?)?;
            let meas_curr = Self::trim_trailing_unit(&self.query(&format!("I{ch}O?")).await?)?;
            let set_volt = Self::trim_setpoint_prefix(&self.query(&format!("V{ch}?")).await?)?;
            let set_curr = Self::trim_setpoint_prefix(&self.query(&format!("I{ch}?")).await?)?;
            let output_raw = self.query(&format!("OP{ch}?")).await?;
            let output_enabled = output_raw.trim().parse::<i64>().unwrap_or(0) != 0;

            state.push((format!("{prefix}_meas_volt"), TelemetryValue::Unit { value: meas_volt, unit: "volts".into() }));
            state.push((format!("{prefix}_meas_curr"), TelemetryValue::Unit { value: meas_curr, unit: "amperes".into() }));
            state.push((format!("{prefix}_set_volt"), TelemetryValue::Unit { value: set_volt, unit: "volts".into() }));
            state.push((format!("{prefix}_set_curr"), TelemetryValue::Unit { value: set_curr, unit: "amperes".into() }));
            state.push((format!("{prefix}_output_enable"), TelemetryValue::Boolean(output_enabled)));
        }

        Ok(state)
    }

    async fn invoke(&mut self, verb: &str, arg: &Value) -> Result<(), CommandFault> {
        match verb {
            "set_voltage_channel1" => self.send(&format!("V1 {}", as_f64(arg)?)).await,
            "set_voltage_channel2" => self.send(&format!("V2 {}", as_f64(arg)?)).await,
            "set_current_channel1" => self.send(&format!("I1 {}", as_f64(arg)?)).await,
            "set_current_channel2" => self.send(&format!("I2 {}", as_f64(arg)?)).await,
            "set_output_channel1" => self.send(&format!("OP1 {}", as_bool_int(arg)?)).await,
            "set_output_channel2" => self.send(&format!("OP2 {}", as_bool_int(arg)?)).await,
            "set_defaults" => {
                let defaults = arg.as_object().ok_or_else(|| {
                    CommandFault::Warning("set_defaults requires an options object".into())
                })?;
                let get = |key: &str| -> Result<f64, CommandFault> {
                    defaults
                        .get(key)
                        .and_then(Value::as_f64)
                        .ok_or_else(|| CommandFault::Warning(format!("set_defaults missing '{key}'")))
                };
                let ch1_v = get("ch1_voltage")?;
                let ch2_v = get("ch2_voltage")?;
                let ch1_i = get("ch1_current")?;
                let ch2_i = get("ch2_current")?;
                let ch1_oe = defaults.get("ch1_output").and_then(Value::as_bool).unwrap_or(false);
                let ch2_oe = defaults.get("ch2_output").and_then(Value::as_bool).unwrap_or(false);

                self.send(&format!("V1 {ch1_v}")).await?;
                self.send(&format!("V2 {ch2_v}")).await?;
                self.send(&format!("I1 {ch1_i}")).await?;
                self.send(&format!("I2 {ch2_i}")).await?;
                self.send(&format!("OP1 {}", ch1_oe as u8)).await?;
                self.send(&format!("OP2 {}", ch2_oe as u8)).await
            }
            other => Err(CommandFault::Warning(format!("unrecognized psu command '{other}'"))),
        }
    }
}

fn as_f64(arg: &Value) -> Result<f64, CommandFault> {
    arg.as_f64().ok_or_else(|| CommandFault::Warning("expected a numeric value".into()))
}

fn as_bool_int(arg: &Value) -> Result<u8, CommandFault> {
    if let Some(b) = arg.as_bool() {
        return Ok(b as u8);
    }
    if let Some(n) = arg.as_i64() {
        return Ok((n != 0) as u8);
    }
    Err(CommandFault::Warning("expected a boolean or integer value".into()))
}
