//! Bridge configuration – reads/writes `~/.synapse/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use synapse_middleware::codec::{DEFAULT_MAX_PAYLOAD, DEFAULT_RX_CAPACITY};
use synapse_middleware::{BridgeConfig, RouteSpec, bridge::DEFAULT_PORT, default_routes};

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "SYNAPSE_CONFIG";

/// Persisted configuration stored in `~/.synapse/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port the bridge listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Pause after a failed accept, in milliseconds.
    #[serde(default = "default_accept_backoff_ms")]
    pub accept_backoff_ms: u64,

    /// Bound on one bridge wait, in milliseconds. Also the idle heartbeat
    /// period.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Consecutive transport errors before the client is dropped.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    #[serde(default = "default_max_payload")]
    pub max_payload: usize,

    #[serde(default = "default_rx_capacity")]
    pub rx_capacity: usize,

    /// `[[routes]]` tables: `kind`, `topic`, `direction`.
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteSpec>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_accept_backoff_ms() -> u64 {
    1000
}
fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_error_threshold() -> u32 {
    100
}
fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}
fn default_rx_capacity() -> usize {
    DEFAULT_RX_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            accept_backoff_ms: default_accept_backoff_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            error_threshold: default_error_threshold(),
            max_payload: default_max_payload(),
            rx_capacity: default_rx_capacity(),
            routes: default_routes(),
        }
    }
}

impl Config {
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            port: self.port,
            accept_backoff: Duration::from_millis(self.accept_backoff_ms),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            error_threshold: self.error_threshold,
            max_payload: self.max_payload,
            rx_capacity: self.rx_capacity,
            routes: self.routes.clone(),
        }
    }
}

/// Return the config path: `$SYNAPSE_CONFIG`, else `~/.synapse/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".synapse").join("config.toml")
}

/// Load the config, falling back to defaults when no file exists.
/// Environment overrides are applied either way.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `SYNAPSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SYNAPSE_PORT` | `port` |
/// | `SYNAPSE_ERROR_THRESHOLD` | `error_threshold` |
/// | `SYNAPSE_POLL_TIMEOUT_MS` | `poll_timeout_ms` |
/// | `SYNAPSE_ACCEPT_BACKOFF_MS` | `accept_backoff_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(port) = env_parse::<u16>("SYNAPSE_PORT") {
        cfg.port = port;
    }
    if let Some(threshold) = env_parse::<u32>("SYNAPSE_ERROR_THRESHOLD") {
        cfg.error_threshold = threshold;
    }
    if let Some(ms) = env_parse::<u64>("SYNAPSE_POLL_TIMEOUT_MS") {
        cfg.poll_timeout_ms = ms;
    }
    if let Some(ms) = env_parse::<u64>("SYNAPSE_ACCEPT_BACKOFF_MS") {
        cfg.accept_backoff_ms = ms;
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok()?.trim().parse().ok()
}

/// Save the config to disk, creating the parent directory if necessary.
pub fn save(cfg: &Config) -> Result<PathBuf, String> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
