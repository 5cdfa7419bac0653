use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::CaptureConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub cdr: CdrConfig,
}

/// Correlation engine limits and paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SIP signaling port
    pub sip_port: u16,

    /// Seconds of silence before a call is evicted
    pub idle_timeout_secs: u64,

    /// Sweep cadence on the packet-timeline clock (seconds)
    pub sweep_interval_secs: u64,

    /// Longest dialog identifier accepted
    pub max_call_id_len: usize,

    /// Write per-call pcap archives
    pub archive: bool,

    /// Directory for per-call archives
    pub spool_dir: PathBuf,

    /// Flush the archive after every packet
    pub packet_buffered: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sip_port: crate::sip::SIP_PORT,
            idle_timeout_secs: 300,
            sweep_interval_secs: 15,
            max_call_id_len: 128,
            archive: true,
            spool_dir: PathBuf::from("/var/spool/sipmon"),
            packet_buffered: false,
        }
    }
}

/// CDR persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdrConfig {
    /// Store CDRs for finished calls
    pub enabled: bool,

    /// SQLite database path
    pub db_path: PathBuf,
}

impl Default for CdrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: PathBuf::from("/var/lib/sipmon/cdr.db"),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load from an explicit path, or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
