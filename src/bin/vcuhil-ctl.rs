//! `vcuhil-ctl` — command-line client for the vcuhil command socket.
//!
//! Connects over TCP and sends a single newline-delimited JSON command
//! envelope, printing the wire reply to stdout.
//!
//! # Usage
//!
//! ```text
//! vcuhil-ctl [--host <host>] [--port <port>] [--telem-port <port>] <action> [target] [options-json]
//!
//! Actions:
//!   enable <vcu>                       power on and start booting
//!   power-off <vcu>                    power off the VCU
//!   bring-offline <vcu>                take the VCU offline
//!   recovery <vcu>                     enter recovery mode
//!   restart <vcu>                      restart (re-enter booting)
//!   booted-force <vcu>                 force-mark as booted (idle)
//!   psu <vcu.subcomponent> <options>   send a power-supply driver command
//!   serial <vcu.subcomponent> <opts>   send a serial-line driver command
//!   telemetry                          drain the telemetry queue over HTTP
//!
//! Flags:
//!   --host <host>         override host (default: 127.0.0.1)
//!   --port <port>         override command-socket port (default: 6060)
//!   --telem-port <port>   override telemetry-http port (default: 6666)
//!   --help, -h            print this help
//! ```

use std::process;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

// ── Wire types (mirrored from vcuhil::command) ─────────────────────────────
// Kept minimal and inline so this binary has no dependency on internal crate
// modules. Must match the server-side serde representation exactly.

#[derive(Debug, serde::Serialize)]
struct CommandEnvelope {
    operation: i64,
    target: String,
    options: serde_json::Value,
}

struct Args {
    host: Option<String>,
    port: Option<u16>,
    telem_port: Option<u16>,
    action: Option<String>,
    rest: Vec<String>,
}

fn parse_args() -> Args {
    let mut host = None;
    let mut port = None;
    let mut telem_port = None;
    let mut action = None;
    let mut rest = Vec::new();
    let mut iter = std::env::args().skip(1).peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--host" => host = iter.next(),
            "--port" => port = iter.next().and_then(|p| p.parse().ok()),
            "--telem-port" => telem_port = iter.next().and_then(|p| p.parse().ok()),
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--" => {
                rest.extend(iter);
                break;
            }
            _ if action.is_none() => action = Some(arg),
            _ => rest.push(arg),
        }
    }

    Args { host, port, telem_port, action, rest }
}

fn print_help() {
    eprintln!("usage: vcuhil-ctl [--host <host>] [--port <port>] [--telem-port <port>] <action> [target] [options-json]");
    eprintln!();
    eprintln!("actions:");
    eprintln!("  enable <vcu>                       power on and start booting");
    eprintln!("  power-off <vcu>                    power off the VCU");
    eprintln!("  bring-offline <vcu>                take the VCU offline");
    eprintln!("  recovery <vcu>                     enter recovery mode");
    eprintln!("  restart <vcu>                      restart (re-enter booting)");
    eprintln!("  booted-force <vcu>                 force-mark as booted (idle)");
    eprintln!("  psu <vcu.subcomponent> <options>   send a power-supply driver command");
    eprintln!("  serial <vcu.subcomponent> <opts>   send a serial-line driver command");
    eprintln!("  telemetry                          drain the telemetry queue over HTTP");
    eprintln!();
    eprintln!("flags:");
    eprintln!("  --host <host>         override host (default: 127.0.0.1)");
    eprintln!("  --port <port>         override command-socket port (default: 6060)");
    eprintln!("  --telem-port <port>   override telemetry-http port (default: 6666)");
    eprintln!("  --help, -h            print this help");
}

fn build_envelope(action: &str, rest: &[String]) -> Result<CommandEnvelope, String> {
    let target = |rest: &[String]| -> Result<String, String> {
        rest.first().cloned().ok_or_else(|| format!("usage: vcuhil-ctl {action} <target>"))
    };

    let (operation, target, options) = match action {
        "enable" => (9, target(rest)?, serde_json::Value::Null),
        "power-off" => (8, target(rest)?, serde_json::Value::Null),
        "bring-offline" => (7, target(rest)?, serde_json::Value::Null),
        "recovery" => (3, target(rest)?, serde_json::Value::Null),
        "restart" => (4, target(rest)?, serde_json::Value::Null),
        "booted-force" => (10, target(rest)?, serde_json::Value::Null),
        "psu" => {
            let target = target(rest)?;
            let options = parse_options(rest.get(1))?;
            (1, target, options)
        }
        "serial" => {
            let target = target(rest)?;
            let options = parse_options(rest.get(1))?;
            (2, target, options)
        }
        other => return Err(format!("unknown action: {other}\n  run 'vcuhil-ctl --help' for usage")),
    };

    Ok(CommandEnvelope { operation, target, options })
}

fn parse_options(raw: Option<&String>) -> Result<serde_json::Value, String> {
    match raw {
        Some(json) => serde_json::from_str(json).map_err(|e| format!("invalid options JSON: {e}")),
        None => Ok(serde_json::Value::Null),
    }
}

fn main() {
    let args = parse_args();

    let action = match args.action {
        Some(ref a) => a.clone(),
        None => {
            eprintln!("error: no action given");
            eprintln!("  run 'vcuhil-ctl --help' for usage");
            process::exit(1);
        }
    };

    let host = args.host.unwrap_or_else(|| "127.0.0.1".to_string());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    let result = if action == "telemetry" {
        let telem_port = args.telem_port.unwrap_or(6666);
        rt.block_on(run_telemetry(host, telem_port))
    } else {
        let envelope = match build_envelope(&action, &args.rest) {
            Ok(e) => e,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        };
        let port = args.port.unwrap_or(6060);
        rt.block_on(run(host, port, envelope))
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(host: String, port: u16, envelope: CommandEnvelope) -> Result<(), String> {
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| format!("cannot connect to {host}:{port}: {e}\n  is the supervisor running?"))?;

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let mut request = serde_json::to_string(&envelope).map_err(|e| format!("serialise error: {e}"))?;
    request.push('\n');

    writer.write_all(request.as_bytes()).await.map_err(|e| format!("send error: {e}"))?;

    let line = lines
        .next_line()
        .await
        .map_err(|e| format!("recv error: {e}"))?
        .ok_or_else(|| "supervisor closed connection without responding".to_string())?;

    println!("{line}");
    Ok(())
}

/// Drain the telemetry queue over HTTP: a raw `GET /` request, reading the
/// response until the server closes the connection (it always sends
/// `Connection: close`).
async fn run_telemetry(host: String, telem_port: u16) -> Result<(), String> {
    let mut stream = TcpStream::connect((host.as_str(), telem_port))
        .await
        .map_err(|e| format!("cannot connect to {host}:{telem_port}: {e}\n  is the supervisor running?"))?;

    stream
        .write_all(format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .map_err(|e| format!("send error: {e}"))?;

    let mut response = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut response)
        .await
        .map_err(|e| format!("recv error: {e}"))?;
    let response = String::from_utf8_lossy(&response);

    let body = response.split("\r\n\r\n").nth(1).unwrap_or("");
    println!("{body}");
    Ok(())
}
