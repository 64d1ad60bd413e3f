//! Host configuration management

use crate::usb::catalog::LookupKey;
use crate::usb::profile::{
    AfterWrite, DEFAULT_TRANSFER_TIMEOUT_MS, DeviceProfile, EndpointSelector, Preset, SerialDriver,
};
use crate::usb::worker::WorkerSettings;
use anyhow::{Context, Result, anyhow};
use protocol::LineOverrides;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub profile: ProfileSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "BridgeSettings::default_log_level")]
    pub log_level: String,
    /// How long one pass of the OS event loop may block, in milliseconds
    #[serde(default = "BridgeSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

impl BridgeSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_poll_interval() -> u64 {
        50
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns; empty means every device is visible
    #[serde(default)]
    pub filters: Vec<String>,
    /// Detach an active kernel driver before claiming (libusb only)
    #[serde(default = "UsbSettings::default_detach")]
    pub detach_kernel_driver: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            detach_kernel_driver: Self::default_detach(),
        }
    }
}

impl UsbSettings {
    fn default_detach() -> bool {
        true
    }
}

/// Device profile as written in the file
///
/// Every field is optional: unset fields come from `preset`, or from the
/// built-in defaults when no preset is named.
///
/// # Example Configuration
/// ```toml
/// [profile]
/// preset = "receipt-printer"
/// transfer_timeout_ms = 2000
/// post_write = [0x1D, 0x56, 0x00]
///
/// [profile.line]
/// baudRate = 19200
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_index: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<SerialDriver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_interface: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_write: Option<AfterWrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_write: Option<Vec<u8>>,
    #[serde(default)]
    pub line: LineOverrides,
}

impl ProfileSettings {
    /// Layer the explicit settings over the preset
    pub fn resolve(&self) -> DeviceProfile {
        let base = self.preset.map(Preset::profile).unwrap_or_default();

        DeviceProfile {
            lookup: self.lookup.unwrap_or(base.lookup),
            interface_index: self.interface_index.unwrap_or(base.interface_index),
            endpoint: self.endpoint.unwrap_or(base.endpoint),
            driver: self.driver.unwrap_or(base.driver),
            control_interface: self.control_interface.unwrap_or(base.control_interface),
            transfer_timeout: self
                .transfer_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.transfer_timeout),
            after_write: self.after_write.unwrap_or(base.after_write),
            post_write: self.post_write.clone().unwrap_or(base.post_write),
            line: self.line.apply(base.line),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-serial-bridge/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial-bridge").join("host.toml")
        } else {
            PathBuf::from(".config/usb-serial-bridge/host.toml")
        }
    }

    /// Settings for the USB worker thread
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            filters: self.usb.filters.clone(),
            profile: self.profile.resolve(),
            poll_interval: Duration::from_millis(self.bridge.poll_interval_ms),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.bridge.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.bridge.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.bridge.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        if self.profile.line.baud_rate == Some(0) {
            return Err(anyhow!("Baud rate must be greater than 0"));
        }

        if self.profile.transfer_timeout_ms == Some(0) {
            return Err(anyhow!(
                "transfer_timeout_ms must be greater than 0 (default {})",
                DEFAULT_TRANSFER_TIMEOUT_MS
            ));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    pub fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<BridgeConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    BridgeConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::profile::ESC_POS_CUT;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.bridge.log_level, "info");
        assert!(config.usb.detach_kernel_driver);
        assert_eq!(config.profile.resolve(), DeviceProfile::default());
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(BridgeConfig::validate_filter("0x1234:0x5678").is_ok());
        assert!(BridgeConfig::validate_filter("0x1234:*").is_ok());
        assert!(BridgeConfig::validate_filter("*:0x5678").is_ok());
        assert!(BridgeConfig::validate_filter("*:*").is_ok());
        assert!(BridgeConfig::validate_filter("0xABCD:0xEF01").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(BridgeConfig::validate_filter("1234:5678").is_err());
        assert!(BridgeConfig::validate_filter("0x1234").is_err());
        assert!(BridgeConfig::validate_filter("0x1234:0x5678:0x9abc").is_err());
        assert!(BridgeConfig::validate_filter("0xGHIJ:0x5678").is_err());
        assert!(BridgeConfig::validate_filter("0x12345:0x5678").is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = BridgeConfig::default();
        assert!(config.validate().is_ok());

        config.bridge.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.bridge.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_line_and_timeout() {
        let mut config = BridgeConfig::default();
        config.profile.line.baud_rate = Some(0);
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.profile.transfer_timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_fields_override_preset() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [profile]
            preset = "receipt-printer"
            after_write = "keep_open"
            endpoint = { address = 3 }

            [profile.line]
            baudRate = 19200
            "#,
        )
        .unwrap();

        let profile = config.profile.resolve();
        assert_eq!(profile.lookup, LookupKey::ProductName);
        assert_eq!(profile.after_write, AfterWrite::KeepOpen);
        assert_eq!(profile.endpoint, EndpointSelector::Address(3));
        assert_eq!(profile.post_write, ESC_POS_CUT);
        assert_eq!(profile.line.baud_rate, 19200);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = BridgeConfig::default();
        config.profile.preset = Some(Preset::Serial);
        config.profile.post_write = Some(vec![0x0A]);
        config.usb.filters = vec!["0x2341:*".to_string()];

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
