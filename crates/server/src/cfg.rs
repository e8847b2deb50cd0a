use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rtr::Timing;
use serde::Deserialize;
use tracing::info;

/// Runtime configuration for the cache server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub max_clients: usize,
    /// Number of deltas kept for incremental updates.
    pub history_depth: usize,
    pub timing: Timing,
    pub max_pdu_size: usize,
    pub source_path: Option<PathBuf>,
    pub source_reload_interval: Duration,
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let candidate = path.map(PathBuf::from).unwrap_or_else(default_config_path);
        if !candidate.exists() {
            if let Some(explicit) = path {
                info!(path = %explicit.display(), "configuration file not found, using defaults");
            }
            return Ok(config);
        }

        let contents = fs::read_to_string(&candidate)
            .with_context(|| format!("failed to read config at {}", candidate.display()))?;
        let raw: RawServerConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", candidate.display()))?;

        if let Some(listen) = raw.listen {
            config.listen = listen;
        }
        if let Some(max_clients) = raw.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(depth) = raw.history_depth {
            config.history_depth = depth;
        }
        if let Some(refresh) = raw.refresh_interval_secs {
            config.timing.refresh = refresh;
        }
        if let Some(retry) = raw.retry_interval_secs {
            config.timing.retry = retry;
        }
        if let Some(expire) = raw.expire_interval_secs {
            config.timing.expire = expire;
        }
        if let Some(size) = raw.max_pdu_size {
            config.max_pdu_size = size;
        }
        if let Some(source) = raw.source {
            if let Some(path) = source.path {
                config.source_path = Some(path);
            }
            if let Some(interval) = source.reload_interval_secs {
                anyhow::ensure!(
                    interval > 0,
                    "source reload_interval_secs must be at least 1 in {}",
                    candidate.display()
                );
                config.source_reload_interval = Duration::from_secs(interval);
            }
        }

        info!(path = %candidate.display(), "loaded configuration overrides");
        Ok(config)
    }

    /// Routers drop their data after the expire interval, so a session
    /// silent for that long is considered gone.
    pub fn expire_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.timing.expire))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8323)),
            max_clients: 256,
            history_depth: 100,
            timing: Timing::default(),
            max_pdu_size: 64 * 1024,
            source_path: None,
            source_reload_interval: Duration::from_secs(60),
        }
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("rtr-server.toml")
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawServerConfig {
    listen: Option<SocketAddr>,
    max_clients: Option<usize>,
    history_depth: Option<usize>,
    refresh_interval_secs: Option<u32>,
    retry_interval_secs: Option<u32>,
    expire_interval_secs: Option<u32>,
    max_pdu_size: Option<usize>,
    source: Option<RawSourceConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawSourceConfig {
    path: Option<PathBuf>,
    reload_interval_secs: Option<u64>,
}
