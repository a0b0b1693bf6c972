//! Configuration loading.
//!
//! Reads a single TOML file describing the supervisor's listeners and the
//! static VCU fleet (SPEC_FULL.md §6), `dotenvy`-overlaid so ports and paths
//! can be overridden from the environment without editing the checked-in
//! file. Split into a raw `serde` shape and a resolved [`Config`], the way
//! the teacher splits `core::config::raw` from its resolved config — minus
//! the teacher's `[meta] base = "..."` inheritance chain, which this
//! single-file config model has no use for.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_CMD_PORT: u16 = 6060;
pub const DEFAULT_TELEM_PORT: u16 = 6666;
pub const DEFAULT_LOG_PATH: &str = "vcuhil.log";

/// One subcomponent's connection parameters, tagged by `type`. The core
/// treats this as opaque aside from the discriminator (SPEC_FULL.md §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubcomponentConfig {
    PowerSupply {
        host: String,
        port: u16,
    },
    RemoteShell {
        hostname: String,
        #[serde(default = "default_shell_port")]
        port: u16,
        #[serde(default)]
        tunnel_via: Option<String>,
    },
    SerialLine {
        device: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    Vlan {
        vlan: u32,
    },
    Generic {},
}

fn default_shell_port() -> u16 {
    22
}

fn default_baud() -> u32 {
    115_200
}

/// Subcomponent name -> config, for one VCU.
pub type VcuConfig = BTreeMap<String, SubcomponentConfig>;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    supervisor: RawSupervisor,
    #[serde(default)]
    vcu: BTreeMap<String, VcuConfig>,
}

#[derive(Debug, Deserialize)]
struct RawSupervisor {
    #[serde(default = "default_cmd_port")]
    cmd_port: u16,
    #[serde(default = "default_telem_port")]
    telem_port: u16,
    #[serde(default = "default_log_path")]
    log_path: String,
    #[serde(default)]
    sink_url: Option<String>,
}

impl Default for RawSupervisor {
    fn default() -> Self {
        Self {
            cmd_port: default_cmd_port(),
            telem_port: default_telem_port(),
            log_path: default_log_path(),
            sink_url: None,
        }
    }
}

fn default_cmd_port() -> u16 {
    DEFAULT_CMD_PORT
}

fn default_telem_port() -> u16 {
    DEFAULT_TELEM_PORT
}

fn default_log_path() -> String {
    DEFAULT_LOG_PATH.to_string()
}

/// Fully-resolved supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub cmd_port: u16,
    pub telem_port: u16,
    pub log_path: PathBuf,
    pub sink_url: Option<String>,
    pub vcus: BTreeMap<String, VcuConfig>,
}

/// Load config from the given path, or fall back to a config-less default
/// (no VCUs, default ports) when no path is given and `vcuhil.toml` does not
/// exist in the current directory.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let cmd_port_override = std::env::var("VCUHIL_CMD_PORT").ok().and_then(|v| v.parse().ok());
    let telem_port_override = std::env::var("VCUHIL_TELEM_PORT").ok().and_then(|v| v.parse().ok());

    let path = config_path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("vcuhil.toml"));

    if !path.exists() {
        if config_path.is_some() {
            return Err(AppError::Config(format!("config file not found: {}", path.display())));
        }
        return Ok(Config {
            cmd_port: cmd_port_override.unwrap_or(DEFAULT_CMD_PORT),
            telem_port: telem_port_override.unwrap_or(DEFAULT_TELEM_PORT),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            sink_url: None,
            vcus: BTreeMap::new(),
        });
    }

    load_from(&path, cmd_port_override, telem_port_override)
}

pub fn load_from(
    path: &Path,
    cmd_port_override: Option<u16>,
    telem_port_override: Option<u16>,
) -> Result<Config, AppError> {
    let raw_text = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed: RawConfig = toml::from_str(&raw_text)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    Ok(Config {
        cmd_port: cmd_port_override.unwrap_or(parsed.supervisor.cmd_port),
        telem_port: telem_port_override.unwrap_or(parsed.supervisor.telem_port),
        log_path: PathBuf::from(parsed.supervisor.log_path),
        sink_url: parsed.supervisor.sink_url,
        vcus: parsed.vcu,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_TOML: &str = r#"
[supervisor]
cmd_port = 6060
telem_port = 6666
log_path = "vcuhil.log"

[vcu.donatello.psu]
type = "power_supply"
host = "psu-donatello"
port = 9221

[vcu.donatello.sga]
type = "remote_shell"
hostname = "sga-donatello"

[vcu.donatello.hpa]
type = "remote_shell"
hostname = "hpa-donatello"
tunnel_via = "sga"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_sample_fleet_config() {
        let f = write_toml(SAMPLE_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.cmd_port, 6060);
        assert_eq!(cfg.telem_port, 6666);
        assert_eq!(cfg.vcus.len(), 1);
        let donatello = &cfg.vcus["donatello"];
        assert_eq!(donatello.len(), 3);
        match &donatello["psu"] {
            SubcomponentConfig::PowerSupply { host, port } => {
                assert_eq!(host, "psu-donatello");
                assert_eq!(*port, 9221);
            }
            other => panic!("expected power_supply, got {other:?}"),
        }
    }

    #[test]
    fn port_overrides_win_over_file() {
        let f = write_toml(SAMPLE_TOML);
        let cfg = load_from(f.path(), Some(9000), None).unwrap();
        assert_eq!(cfg.cmd_port, 9000);
        assert_eq!(cfg.telem_port, 6666);
    }

    #[test]
    fn missing_explicit_file_errors() {
        let result = load(Some("/nonexistent/vcuhil.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn no_file_and_no_explicit_path_falls_back_to_defaults() {
        let cwd_file = Path::new("vcuhil.toml");
        if !cwd_file.exists() {
            let cfg = load(None).unwrap();
            assert_eq!(cfg.cmd_port, DEFAULT_CMD_PORT);
            assert_eq!(cfg.telem_port, DEFAULT_TELEM_PORT);
            assert!(cfg.vcus.is_empty());
        }
    }

    #[test]
    fn remote_shell_tunnel_via_parses() {
        let f = write_toml(SAMPLE_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        match &cfg.vcus["donatello"]["hpa"] {
            SubcomponentConfig::RemoteShell { tunnel_via, .. } => {
                assert_eq!(tunnel_via.as_deref(), Some("sga"));
            }
            other => panic!("expected remote_shell, got {other:?}"),
        }
    }
}
