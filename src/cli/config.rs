use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::api::{
    console::ConsoleOptions, link::Endpoint, telemetry::TelemetryConfig,
    telemetry::DEFAULT_URL,
};

/// Device connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    /// Device IP address or host name
    pub host: String,
    pub rack: u8,
    pub slot: u8,
    /// ISO-on-TCP port
    pub port: u16,
    /// Bound for TCP connect plus the S7 handshake
    pub connect_timeout_ms: u64,
    /// Bound for each request/reply on an open link
    pub io_timeout_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.1".to_string(),
            rack: 0,
            slot: 1,
            port: 102,
            connect_timeout_ms: 3000,
            io_timeout_ms: 1000,
        }
    }
}

/// HTTP collector settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// Start with pushes enabled (they still only run while connected)
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            enabled: false,
            url: DEFAULT_URL.to_string(),
            api_key: String::new(),
            interval_ms: 5000,
            request_timeout_ms: 5000,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub plc: PlcConfig,
    /// Sync loop period in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            plc: PlcConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            telemetry: TelemetrySection::default(),
        }
    }
}

impl ConsoleConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Load a `.json` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content)
                .with_context(|| format!("Invalid JSON config {}", path.display())),
            Some("toml") => Self::from_toml(&content)
                .with_context(|| format!("Invalid TOML config {}", path.display())),
            other => Err(anyhow!(
                "Unsupported config format {:?} for {}, expected .toml or .json",
                other.unwrap_or(""),
                path.display()
            )),
        }
    }

    /// Convert to a TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.plc.host.clone(), self.plc.rack, self.plc.slot)
    }

    pub fn console_options(&self) -> ConsoleOptions {
        ConsoleOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            telemetry: TelemetryConfig {
                enabled: self.telemetry.enabled,
                url: self.telemetry.url.clone(),
                api_key: self.telemetry.api_key.clone(),
                interval: Duration::from_millis(self.telemetry.interval_ms),
            },
            request_timeout: Duration::from_millis(self.telemetry.request_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_panel() {
        let config = ConsoleConfig::default();
        assert_eq!(config.endpoint(), Endpoint::new("192.168.0.1", 0, 1));
        assert_eq!(config.plc.port, 102);

        let options = config.console_options();
        assert_eq!(options.poll_interval, Duration::from_millis(100));
        assert_eq!(options.telemetry.interval, Duration::from_secs(5));
        assert_eq!(options.request_timeout, Duration::from_secs(5));
        assert!(!options.telemetry.enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = ConsoleConfig::from_toml(
            r#"
            poll_interval_ms = 250

            [plc]
            host = "10.0.0.7"
            slot = 2

            [telemetry]
            enabled = true
            api_key = "PLCS71200"
            "#,
        )?;
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.endpoint(), Endpoint::new("10.0.0.7", 0, 2));
        assert_eq!(config.plc.io_timeout_ms, 1000);
        assert!(config.telemetry.enabled);
        assert_eq!(config.telemetry.url, DEFAULT_URL);
        Ok(())
    }

    #[test]
    fn test_json_and_toml_agree() -> Result<()> {
        let config = ConsoleConfig::from_json(
            r#"{"plc": {"host": "plc.local", "rack": 1, "slot": 3}, "telemetry": {"interval_ms": 1000}}"#,
        )?;
        let round_trip = ConsoleConfig::from_toml(&config.to_toml()?)?;
        assert_eq!(round_trip, config);
        assert_eq!(round_trip.poll_interval_ms, 100);
        Ok(())
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() -> Result<()> {
        let path = std::env::temp_dir().join(format!("s7panel-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "plc: {}")?;
        let err = ConsoleConfig::from_file(&path).unwrap_err();
        std::fs::remove_file(&path)?;
        assert!(err.to_string().contains("Unsupported config format"));
        Ok(())
    }
}
