//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hermie.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PollingConfig: how often the sensor is read and how reads are retried.
//!     - ThresholdsConfig: alert limits (fahrenheit / percent).
//!     - NotifyConfig: buzzer/lcd cooldown and dwell timings.
//!     - devices: relay + led pin per controllable device.
//!     - ClusterConfig: which role this process plays and where the server is.
//!
//! ==============================================================================

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::alert::Thresholds;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HostConfig {
    pub polling: PollingConfig,
    pub calibration: CalibrationConfig,
    pub thresholds: ThresholdsConfig,
    pub notify: NotifyConfig,
    pub buzzer: BuzzerConfig,
    pub lcd: LcdConfig,
    pub sensor: SensorConfig,
    pub devices: BTreeMap<String, DevicePins>,
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub retry_delay_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationConfig {
    pub temp_offset_f: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub temp_high_f: f64,
    pub temp_low_f: f64,
    pub humidity_high: f64,
    pub humidity_low: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub cooldown_seconds: u64,
    pub buzz_duration_ms: u64,
    pub alert_dwell_seconds: u64,
    pub error_display_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BuzzerConfig {
    pub gpio_pin: u8,
    /// relay boards trigger on LOW; a bare piezo buzzer on HIGH
    pub active_low: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LcdConfig {
    pub i2c_address: u16,
    pub line_length: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorConfig {
    pub i2c_address: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DevicePins {
    pub relay_pin: u8,
    pub led_pin: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// sensor reader + http api
    Server,
    /// polls a remote server and drives buzzer/lcd/leds
    Client,
    /// reader and notifier in one process, no http
    Watch,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    pub role: Role,
    pub server_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// `HERMIE_CONFIG` names an explicit file, which must load. Otherwise the
    /// usual locations are tried and defaults used if none exists.
    /// `HERMIE_ROLE` overrides the configured role either way.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let mut config = match std::env::var_os("HERMIE_CONFIG") {
            Some(path) => Self::load(&path)?,
            None => Self::search_default_paths(),
        };

        if let Ok(role) = std::env::var("HERMIE_ROLE") {
            config.cluster.role = role.parse()?;
        }

        Ok(config)
    }

    fn search_default_paths() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("hermie.toml"),
            std::path::PathBuf::from("..").join("config").join("hermie.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polling.max_attempts == 0 {
            bail!("polling.max_attempts must be at least 1");
        }
        if self.lcd.line_length == 0 {
            bail!("lcd.line_length must be greater than 0");
        }
        if self.thresholds.temp_low_f >= self.thresholds.temp_high_f {
            bail!(
                "thresholds.temp_low_f ({}) must be below temp_high_f ({})",
                self.thresholds.temp_low_f,
                self.thresholds.temp_high_f
            );
        }
        if self.thresholds.humidity_low >= self.thresholds.humidity_high {
            bail!(
                "thresholds.humidity_low ({}) must be below humidity_high ({})",
                self.thresholds.humidity_low,
                self.thresholds.humidity_high
            );
        }
        if self.devices.is_empty() {
            bail!("at least one device must be configured");
        }

        let mut used = HashSet::new();
        used.insert(self.buzzer.gpio_pin);
        for (name, pins) in &self.devices {
            for pin in [pins.relay_pin, pins.led_pin] {
                if !used.insert(pin) {
                    bail!("gpio pin {} of device '{}' is already in use", pin, name);
                }
            }
        }

        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            temp_high_f: self.thresholds.temp_high_f,
            temp_low_f: self.thresholds.temp_low_f,
            humidity_high: self.thresholds.humidity_high,
            humidity_low: self.thresholds.humidity_low,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_seconds)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          HERMIE CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Role: {:?}", self.cluster.role);
        println!("│ Poll Interval: {}s", self.polling.interval_seconds);
        println!(
            "│ Temperature: {}F - {}F",
            self.thresholds.temp_low_f, self.thresholds.temp_high_f
        );
        println!(
            "│ Humidity: {}% - {}%",
            self.thresholds.humidity_low, self.thresholds.humidity_high
        );
        println!("│ Buzzer Cooldown: {}s", self.notify.cooldown_seconds);
        println!(
            "│ Devices: {}",
            self.devices.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            "watch" => Ok(Role::Watch),
            other => bail!("unknown role '{}' (expected server, client or watch)", other),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        let devices = [("heat", 17, 5), ("light", 27, 6), ("fan", 22, 13)]
            .into_iter()
            .map(|(name, relay_pin, led_pin)| (name.to_string(), DevicePins { relay_pin, led_pin }))
            .collect();

        Self {
            polling: PollingConfig::default(),
            calibration: CalibrationConfig::default(),
            thresholds: ThresholdsConfig::default(),
            notify: NotifyConfig::default(),
            buzzer: BuzzerConfig::default(),
            lcd: LcdConfig::default(),
            sensor: SensorConfig::default(),
            devices,
            server: ServerConfig::default(),
            cluster: ClusterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 15, retry_delay_ms: 1000, max_attempts: 3 }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { temp_offset_f: -2.0 }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self { temp_high_f: 85.0, temp_low_f: 70.0, humidity_high: 99.97, humidity_low: 65.0 }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            buzz_duration_ms: 1000,
            alert_dwell_seconds: 20,
            error_display_seconds: 20,
        }
    }
}

impl Default for BuzzerConfig {
    fn default() -> Self {
        Self { gpio_pin: 16, active_low: false }
    }
}

impl Default for LcdConfig {
    fn default() -> Self {
        Self { i2c_address: 0x27, line_length: 16 }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { i2c_address: 0x44 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".to_string() }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { role: Role::Server, server_url: "http://127.0.0.1:5000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}
