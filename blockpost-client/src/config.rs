//! Load config from file and environment; CLI flags are applied on top in main.

use blockpost_core::DigestAlgorithm;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration. File: ~/.config/blockpost/config.toml or /etc/blockpost/config.toml.
/// Env overrides: BLOCKPOST_HOST, BLOCKPOST_PORT, BLOCKPOST_ID, BLOCKPOST_IO_TIMEOUT_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Peer host (default 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: String,
    /// Peer port (default 1379).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identity seed sent as username.
    #[serde(default)]
    pub identity: String,
    /// Digest used to derive the login credential. Must match what the peer checks.
    #[serde(default)]
    pub credential_digest: DigestAlgorithm,
    /// Digest compared against the peer's `md5` field after the last block.
    #[serde(default)]
    pub integrity_digest: DigestAlgorithm,
    /// Per-frame send/receive deadline; none waits forever.
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    1379
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            identity: String::new(),
            credential_digest: DigestAlgorithm::default(),
            integrity_digest: DigestAlgorithm::default(),
            io_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.filter(|&s| s > 0).map(Duration::from_secs)
    }
}

/// Load config: merge default, then config file (explicit path or first found), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => load_path(p)?,
        None => load_file()?.unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

/// Apply env overrides through `lookup`; unparseable numbers are ignored.
pub fn apply_env(c: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(s) = lookup("BLOCKPOST_HOST") {
        c.host = s;
    }
    if let Some(s) = lookup("BLOCKPOST_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Some(s) = lookup("BLOCKPOST_ID") {
        c.identity = s;
    }
    if let Some(s) = lookup("BLOCKPOST_IO_TIMEOUT_SECS") {
        if let Ok(t) = s.parse::<u64>() {
            c.io_timeout_secs = Some(t);
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/blockpost/config.toml"));
    }
    out.push(PathBuf::from("/etc/blockpost/config.toml"));
    out
}

fn load_file() -> Result<Option<Config>, ConfigError> {
    for p in config_paths() {
        if p.exists() {
            return load_path(&p).map(Some);
        }
    }
    Ok(None)
}

fn load_path(p: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
        path: p.to_path_buf(),
        source,
    })?;
    parse(&s).map_err(|source| ConfigError::Parse {
        path: p.to_path_buf(),
        source,
    })
}

pub fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
