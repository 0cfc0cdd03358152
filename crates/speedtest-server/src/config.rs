use std::time::Duration;

use anyhow::{Context, bail};
use speedtest_engine::{DEFAULT_PROBE_TIMEOUT, Peer, parse_peers};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8645;
const FALLBACK_SERVER_ID: &str = "speedtest";

/// Which transfer mechanism delegated tests use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Peer speed-test servers over HTTP
    Http,
    /// In-process generator → sink
    Loopback,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub server_id: String,
    pub peers: Vec<Peer>,
    pub engine: EngineKind,
    pub probe_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get("SPEEDTEST_HOST").unwrap_or_else(|| DEFAULT_HOST.into());
        let port: u16 = match get("SPEEDTEST_PORT").or_else(|| get("PORT")) {
            Some(v) => v.trim().parse().with_context(|| format!("invalid port {:?}", v))?,
            None => DEFAULT_PORT,
        };
        let server_id = get("SPEEDTEST_SERVER_ID").unwrap_or_else(default_server_id);

        let peers = match get("SPEEDTEST_PEERS") {
            Some(list) => parse_peers(&list),
            None => parse_peers(&format!("http://127.0.0.1:{}", port)),
        };

        let engine = match get("SPEEDTEST_ENGINE").as_deref().map(str::trim) {
            None | Some("http") => EngineKind::Http,
            Some("loopback") => EngineKind::Loopback,
            Some(other) => bail!("unknown SPEEDTEST_ENGINE {:?} (expected http or loopback)", other),
        };

        let probe_timeout = match get("SPEEDTEST_PROBE_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(
                v.trim()
                    .parse()
                    .with_context(|| format!("invalid SPEEDTEST_PROBE_TIMEOUT_MS {:?}", v))?,
            ),
            None => DEFAULT_PROBE_TIMEOUT,
        };

        Ok(Self {
            host,
            port,
            server_id,
            peers,
            engine,
            probe_timeout,
        })
    }
}

/// Hostname when it can be found, else a fixed name.
fn default_server_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| FALLBACK_SERVER_ID.into())
}
