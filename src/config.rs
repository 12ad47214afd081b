//! Server configuration: a JSON file named by `VEHICLE_SERVER_CONFIG`, with a
//! couple of environment overrides on top.

use crate::error::ConfigError;
use crate::vehicle::control::DriverTuning;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "VEHICLE_SERVER_CONFIG";
pub const ADDR_ENV: &str = "VEHICLE_SERVER_ADDR";
pub const LOG_ENV: &str = "LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    pub script_dir: PathBuf,
    /// Script file every new client's vehicle is built from.
    pub default_script: String,
    /// Vehicles whose chassis sits below this height are in water.
    pub water_height: Option<f32>,
    pub ground_friction: f32,
    pub log_level: String,
    pub spawn_points: Vec<[f32; 3]>,
    pub driver: DriverTuning,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9001".to_string(),
            tick_rate: 60,
            script_dir: PathBuf::from("scripts"),
            default_script: "jeep.txt".to_string(),
            water_height: None,
            ground_friction: 1.2,
            log_level: "info".to_string(),
            spawn_points: vec![[-5.0, 1.5, 0.0], [5.0, 1.5, 0.0]],
            driver: DriverTuning::default(),
        }
    }
}

impl ServerConfig {
    /// Config file from `VEHICLE_SERVER_CONFIG` (defaults when unset), then
    /// `VEHICLE_SERVER_ADDR` and `LOG_LEVEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        let config = config.with_overrides(
            std::env::var(ADDR_ENV).ok(),
            std::env::var(LOG_ENV).ok(),
        );
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_overrides(mut self, bind_addr: Option<String>, log_level: Option<String>) -> Self {
        if let Some(addr) = bind_addr.filter(|a| !a.is_empty()) {
            self.bind_addr = addr;
        }
        if let Some(level) = log_level.filter(|l| !l.is_empty()) {
            self.log_level = level;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::Invalid("tick_rate"));
        }
        if self.spawn_points.is_empty() {
            return Err(ConfigError::Invalid("spawn_points"));
        }
        if self.driver.stick_extent <= 0.0 {
            return Err(ConfigError::Invalid("driver.stick_extent"));
        }
        Ok(())
    }

    /// Seconds per tick.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }
}
