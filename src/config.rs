use std::{
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REMOTE_PORT: u16 = 7000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Settings for a single appliance. Intervals are in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub address: IpAddr,

    /// Local UDP port, or an ephemeral one when unset
    #[serde(default)]
    pub local_port: Option<u16>,

    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    #[serde(default = "default_poll_interval", alias = "update_interval")]
    pub poll_interval: u64,

    /// Restart the handshake after this long without hearing from a bound device
    #[serde(default = "default_reconnect_after")]
    pub reconnect_after: Option<u64>,

    #[serde(default = "default_minimum_target_temperature")]
    pub minimum_target_temperature: f64,

    #[serde(default = "default_maximum_target_temperature")]
    pub maximum_target_temperature: f64,

    /// Report the target temperature as the ambient one, for units with a broken sensor
    #[serde(default)]
    pub fake_sensor: bool,

    #[serde(default)]
    pub sensor_offset: f64,

    #[serde(default)]
    pub x_fan: bool,
}

fn default_remote_port() -> u16 {
    REMOTE_PORT
}
fn default_retry_interval() -> u64 {
    5000
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_reconnect_after() -> Option<u64> {
    Some(30_000)
}
fn default_minimum_target_temperature() -> f64 {
    16.0
}
fn default_maximum_target_temperature() -> f64 {
    30.0
}

impl DeviceConfig {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            local_port: None,
            remote_port: default_remote_port(),
            retry_interval: default_retry_interval(),
            poll_interval: default_poll_interval(),
            reconnect_after: default_reconnect_after(),
            minimum_target_temperature: default_minimum_target_temperature(),
            maximum_target_temperature: default_maximum_target_temperature(),
            fake_sensor: false,
            sensor_offset: 0.0,
            x_fan: false,
        }
    }

    /// Layers an optional TOML file under `GREEAC_*` environment variables.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("GREEAC_"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: DeviceConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.minimum_target_temperature <= self.maximum_target_temperature) {
            return Err(ConfigError::Validation {
                field: "minimum_target_temperature",
                reason: format!(
                    "{} is above the maximum of {}",
                    self.minimum_target_temperature, self.maximum_target_temperature
                ),
            });
        }
        if !self.sensor_offset.is_finite() {
            return Err(ConfigError::Validation {
                field: "sensor_offset",
                reason: "must be a finite number".into(),
            });
        }
        for (field, value) in [
            ("retry_interval", self.retry_interval),
            ("poll_interval", self.poll_interval),
            ("reconnect_after", self.reconnect_after.unwrap_or(1)),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    pub fn remote_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.remote_port)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn reconnect_after(&self) -> Option<Duration> {
        self.reconnect_after.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn load_toml(contents: &str) -> Result<DeviceConfig, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        DeviceConfig::from_figment(Figment::new().merge(Toml::file(file.path())))
    }

    #[test]
    fn test_defaults() {
        let config = load_toml(r#"address = "192.168.1.50""#).unwrap();
        assert_eq!(config, DeviceConfig::new("192.168.1.50".parse().unwrap()));
        assert_eq!(config.remote_addr(), "192.168.1.50:7000".parse().unwrap());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = load_toml(
            r#"
            address = "10.0.0.7"
            local_port = 48964
            update_interval = 2500
            fake_sensor = true
            sensor_offset = 1.5
            x_fan = true
            maximum_target_temperature = 28
            "#,
        )
        .unwrap();

        assert_eq!(config.local_port, Some(48964));
        assert_eq!(config.poll_interval, 2500);
        assert!(config.fake_sensor);
        assert!(config.x_fan);
        assert_eq!(config.sensor_offset, 1.5);
        assert_eq!(config.maximum_target_temperature, 28.0);
    }

    #[test]
    fn test_missing_address() {
        assert!(matches!(load_toml("x_fan = true"), Err(ConfigError::Figment(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = DeviceConfig::new("10.0.0.7".parse().unwrap());
        config.minimum_target_temperature = 31.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { field: "minimum_target_temperature", .. })
        ));

        let mut config = DeviceConfig::new("10.0.0.7".parse().unwrap());
        config.poll_interval = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { field: "poll_interval", .. })
        ));
    }
}
