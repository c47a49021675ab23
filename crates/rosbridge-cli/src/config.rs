//! Configuration – reads/writes `~/.rosbridge/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rosbridge_client::BridgeConfig;

/// Topic names the binary wires up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topics {
    /// Robot pose stream (`nav_msgs/Odometry`).
    #[serde(default = "default_odometry_topic")]
    pub odometry: String,

    /// Ultrasonic range readings (`std_msgs/String`).
    #[serde(default = "default_ultrasound_topic")]
    pub ultrasound: String,

    /// Velocity commands (`geometry_msgs/Twist`).
    #[serde(default = "default_cmd_vel_topic")]
    pub cmd_vel: String,

    /// Free-form status text (`std_msgs/String`).
    #[serde(default = "default_debug_output_topic")]
    pub debug_output: String,

    #[serde(default = "default_max_linear_speed_topic")]
    pub max_linear_speed: String,

    #[serde(default = "default_max_angular_speed_topic")]
    pub max_angular_speed: String,
}

fn default_odometry_topic() -> String {
    "/robot_gps_pose".to_string()
}
fn default_ultrasound_topic() -> String {
    "/ultrasonic_data".to_string()
}
fn default_cmd_vel_topic() -> String {
    "/cmd_vel".to_string()
}
fn default_debug_output_topic() -> String {
    "/debug_output".to_string()
}
fn default_max_linear_speed_topic() -> String {
    "/waypoint/max_linear_speed".to_string()
}
fn default_max_angular_speed_topic() -> String {
    "/waypoint/max_angular_speed".to_string()
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            odometry: default_odometry_topic(),
            ultrasound: default_ultrasound_topic(),
            cmd_vel: default_cmd_vel_topic(),
            debug_output: default_debug_output_topic(),
            max_linear_speed: default_max_linear_speed_topic(),
            max_angular_speed: default_max_angular_speed_topic(),
        }
    }
}

/// Persisted configuration stored in `~/.rosbridge/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// rosbridge server host, optionally with a `ws://` / `wss://` scheme.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Consumer loop rate; one inbound callback runs per tick.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Published to the robot once connected (m/s).
    #[serde(default = "default_max_linear_speed")]
    pub max_linear_speed: f32,

    /// Published to the robot once connected (rad/s).
    #[serde(default = "default_max_angular_speed")]
    pub max_angular_speed: f32,

    #[serde(default)]
    pub topics: Topics,
}

fn default_host() -> String {
    rosbridge_client::DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    rosbridge_client::DEFAULT_PORT
}
fn default_tick_hz() -> u32 {
    30
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_shutdown_timeout_ms() -> u64 {
    2_000
}
fn default_max_linear_speed() -> f32 {
    0.5
}
fn default_max_angular_speed() -> f32 {
    1.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tick_hz: default_tick_hz(),
            connect_timeout_ms: default_connect_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_linear_speed: default_max_linear_speed(),
            max_angular_speed: default_max_angular_speed(),
            topics: Topics::default(),
        }
    }
}

impl Config {
    /// Connection settings for the client library.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.host.clone(), self.port)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
    }

    /// Time between consumer ticks.  A zero rate is treated as 1 Hz.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_hz.max(1)
    }
}

/// Return the config path: `ROSBRIDGE_CONFIG` if set, else
/// `~/.rosbridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROSBRIDGE_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rosbridge").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
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

/// Apply `ROSBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROSBRIDGE_HOST` | `host` |
/// | `ROSBRIDGE_PORT` | `port` |
/// | `ROSBRIDGE_TICK_HZ` | `tick_hz` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ROSBRIDGE_HOST")
        && !v.trim().is_empty()
    {
        cfg.host = v;
    }
    if let Some(port) = lookup("ROSBRIDGE_PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.port = port;
    }
    if let Some(hz) = lookup("ROSBRIDGE_TICK_HZ").and_then(|v| v.parse::<u32>().ok()) {
        cfg.tick_hz = hz;
    }
}

/// Save the config to a specific path, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

/// Result of [`load_or_init`].
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    /// `true` when no file existed and the defaults were written.
    pub created: bool,
}

/// Load the config at `path`, writing the defaults there on first run.
/// Environment overrides are applied after loading and never persisted.
pub fn load_or_init(path: &Path) -> Result<Loaded, String> {
    let (mut config, created) = match load_from(path)? {
        Some(cfg) => (cfg, false),
        None => {
            let cfg = Config::default();
            save_to(&cfg, path)?;
            (cfg, true)
        }
    };
    apply_env_overrides(&mut config);
    Ok(Loaded { config, created })
}
