//! Daemon configuration loading with built-in defaults and environment overrides.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the daemon looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/ssbd.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SSBD_CONFIG_PATH";
const SERVER_URL_ENV: &str = "SSBD_SERVER_URL";
const GAME_ENV: &str = "SSBD_GAME";

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the daemon.
pub struct AppConfig {
    /// Scoreboard WebSocket endpoint.
    pub server_url: String,
    /// Registry name of the game adapter.
    pub game: String,
    /// Path of the persisted machine identity.
    pub identity_path: PathBuf,
    /// QR scanner device node.
    pub scanner_device: PathBuf,
    /// Upper bound on opening the scoreboard connection.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a correlated response.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    /// Interval between keepalive pings.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keepalive_interval: Duration,
    /// Pause between tearing down and reopening the connection.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_settle: Duration,
    /// Quiet period after a scan during which further bytes are discarded.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub scan_debounce: Duration,
    /// How long a player's slot stays on screen after login.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub display_duration: Duration,
    /// Poll interval of the score file watcher.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub watch_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "wss://scoreboard.web.net/ws".into(),
            game: "hwn".into(),
            identity_path: PathBuf::from("/.ssbd.json"),
            scanner_device: PathBuf::from("/dev/ttyQR"),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(10),
            reconnect_settle: Duration::from_millis(100),
            scan_debounce: Duration::from_millis(1000),
            display_duration: Duration::from_secs(20),
            watch_interval: Duration::from_millis(500),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), game = %config.game, "loaded daemon config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_overrides(|key| env::var(key).ok())
    }

    /// Apply `SSBD_SERVER_URL` / `SSBD_GAME` style overrides from `lookup`.
    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if let Some(url) = non_empty(SERVER_URL_ENV) {
            info!(url = %url, "server url overridden from environment");
            self.server_url = url;
        }
        if let Some(game) = non_empty(GAME_ENV) {
            self.game = game;
        }
        self
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
