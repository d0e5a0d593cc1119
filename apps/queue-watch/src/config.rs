//! Client configuration.
//!
//! Read from `~/.config/geoqueue/realtime.json`. Every field is optional;
//! the endpoint can be overridden with `GEOQUEUE_ENDPOINT` (channel) and
//! `GEOQUEUE_API` (REST base URL).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use geoqueue_jobs::ReconcileConfig;
use geoqueue_realtime::{KeepaliveConfig, ManagerConfig, ReconnectConfig};

pub const ENV_ENDPOINT: &str = "GEOQUEUE_ENDPOINT";
pub const ENV_API: &str = "GEOQUEUE_API";

const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws/queue/";
const DEFAULT_API_BASE: &str = "http://localhost:8000/api/queue";

/// On-disk shape of `realtime.json`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    api_base: Option<String>,
    #[serde(default)]
    max_reconnect_attempts: Option<u32>,
    #[serde(default)]
    heartbeat_interval_secs: Option<u64>,
    #[serde(default)]
    pong_timeout_secs: Option<u64>,
    #[serde(default)]
    grace_cycles: Option<u32>,
    /// `0` disables the periodic refresh.
    #[serde(default)]
    refresh_interval_secs: Option<u64>,
}

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Realtime channel endpoint.
    pub endpoint: String,
    /// Base URL of the REST API used for single jobs and snapshots.
    pub api_base: String,
    pub reconnect: ReconnectConfig,
    pub keepalive: KeepaliveConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_base: DEFAULT_API_BASE.into(),
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            reconcile: ReconcileConfig {
                refresh_interval: Some(Duration::from_secs(60)),
                ..ReconcileConfig::default()
            },
        }
    }
}

impl WatchConfig {
    /// Loads the config file, then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_overrides(
            std::env::var(ENV_ENDPOINT).ok(),
            std::env::var(ENV_API).ok(),
        );
        Ok(config)
    }

    /// Loads `path` over the defaults. A missing file yields the defaults;
    /// an unparsable one is logged and ignored.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<ConfigFile>(&content) {
            Ok(file) => config.merge(file),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse realtime config, using defaults"
            ),
        }
        Ok(config)
    }

    fn merge(&mut self, file: ConfigFile) {
        if let Some(endpoint) = file.endpoint.filter(|s| !s.is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(api_base) = file.api_base.filter(|s| !s.is_empty()) {
            self.api_base = api_base;
        }
        if let Some(max) = file.max_reconnect_attempts {
            self.reconnect.max_attempts = max;
        }
        if let Some(secs) = file.heartbeat_interval_secs.filter(|s| *s > 0) {
            self.keepalive.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.pong_timeout_secs.filter(|s| *s > 0) {
            self.keepalive.pong_timeout = Duration::from_secs(secs);
        }
        if let Some(cycles) = file.grace_cycles {
            self.reconcile.grace_cycles = cycles;
        }
        if let Some(secs) = file.refresh_interval_secs {
            self.reconcile.refresh_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
    }

    fn apply_overrides(&mut self, endpoint: Option<String>, api_base: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|s| !s.is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(api_base) = api_base.filter(|s| !s.is_empty()) {
            self.api_base = api_base;
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            reconnect: self.reconnect.clone(),
            keepalive: self.keepalive.clone(),
            ..ManagerConfig::new(self.endpoint.clone())
        }
    }
}

/// `~/.config/geoqueue/realtime.json`, or the platform equivalent.
pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("geoqueue").join("realtime.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
            && !xdg.is_empty()
        {
            return Ok(PathBuf::from(xdg));
        }
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config"))
    }
}
