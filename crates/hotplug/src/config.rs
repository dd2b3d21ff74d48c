//! Configuration management
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [qmp]
//! socket_dir = "/var/run/qemu-server"
//! connect_timeout = "2s"
//! command_timeout = "30s"
//! machine_bus_path = "/machine/q35/pcie.0"
//!
//! [reconcile]
//! detach_settle = "1s"
//! attach_settle = "5s"
//! reverse_match = false
//!
//! [detect]
//! device = "046d:c52b"
//! bindings = ["100:5-2.1.1", "101:5-2.1.2"]
//! targets = ["1a2b:3c4d", "046d:"]
//! ```

use crate::reconcile::ReconcileOptions;
use crate::vm::DEFAULT_MACHINE_BUS_PATH;
use anyhow::{Context, Result, anyhow};
use common::{TargetDeviceSpec, VmBinding};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotplugConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub qmp: QmpSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    /// Defaults for the `move` command
    #[serde(default)]
    pub detect: DetectSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Where and how to reach the VMs' QMP sockets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QmpSettings {
    /// Directory holding one `<vmid>.qmp` socket per VM
    #[serde(default = "QmpSettings::default_socket_dir")]
    pub socket_dir: PathBuf,
    /// Bounds connect, greeting, negotiation and liveness probe together
    #[serde(default = "QmpSettings::default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "QmpSettings::default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
    /// QOM path the attachment walk starts from
    #[serde(default = "QmpSettings::default_machine_bus_path")]
    pub machine_bus_path: String,
}

impl Default for QmpSettings {
    fn default() -> Self {
        Self {
            socket_dir: Self::default_socket_dir(),
            connect_timeout: Self::default_connect_timeout(),
            command_timeout: Self::default_command_timeout(),
            machine_bus_path: Self::default_machine_bus_path(),
        }
    }
}

impl QmpSettings {
    fn default_socket_dir() -> PathBuf {
        PathBuf::from("/var/run/qemu-server")
    }

    fn default_connect_timeout() -> Duration {
        Duration::from_secs(2)
    }

    fn default_command_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_machine_bus_path() -> String {
        DEFAULT_MACHINE_BUS_PATH.to_string()
    }

    /// Socket path for a VM: `<socket_dir>/<vm_id>.qmp`
    pub fn socket_path(&self, vm_id: &str) -> PathBuf {
        let dir = self.socket_dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&*dir).as_ref()).join(format!("{}.qmp", vm_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "ReconcileSettings::default_detach_settle", with = "duration_serde")]
    pub detach_settle: Duration,
    #[serde(default = "ReconcileSettings::default_attach_settle", with = "duration_serde")]
    pub attach_settle: Duration,
    #[serde(default)]
    pub reverse_match: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            detach_settle: Self::default_detach_settle(),
            attach_settle: Self::default_attach_settle(),
            reverse_match: false,
        }
    }
}

impl ReconcileSettings {
    fn default_detach_settle() -> Duration {
        Duration::from_secs(1)
    }

    fn default_attach_settle() -> Duration {
        Duration::from_secs(5)
    }

    pub fn to_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            reverse_match: self.reverse_match,
            detach_settle: self.detach_settle,
            attach_settle: self.attach_settle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<TargetDeviceSpec>,
    #[serde(default)]
    pub bindings: Vec<VmBinding>,
    #[serde(default)]
    pub targets: Vec<TargetDeviceSpec>,
}

/// Human-readable durations: `"1h30m"`, `"5s"`, `"250ms"`
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        format_duration(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string
    ///
    /// Units are `h`, `m`, `s` and `ms`; a trailing bare number counts as
    /// seconds. Zero is allowed here, callers decide whether it makes sense.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim().to_lowercase();
        if s.is_empty() {
            return Err("Empty duration".to_string());
        }

        let mut total_ms: u64 = 0;
        let mut current_num = String::new();
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            if c.is_ascii_digit() {
                current_num.push(c);
                continue;
            }
            if current_num.is_empty() {
                return Err(format!("Invalid duration format: {}", s));
            }
            let num: u64 = current_num
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", current_num))?;
            current_num.clear();

            let unit_ms = match c {
                'h' => 3_600_000,
                'm' if chars.peek() == Some(&'s') => {
                    chars.next();
                    1
                }
                'm' => 60_000,
                's' => 1_000,
                _ => return Err(format!("Invalid duration unit: {}", c)),
            };
            total_ms = num
                .checked_mul(unit_ms)
                .and_then(|ms| total_ms.checked_add(ms))
                .ok_or_else(|| format!("Duration out of range: {}", s))?;
        }

        // Handle case where string ends with a number (assume seconds)
        if !current_num.is_empty() {
            let num: u64 = current_num
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", current_num))?;
            total_ms = num
                .checked_mul(1_000)
                .and_then(|ms| total_ms.checked_add(ms))
                .ok_or_else(|| format!("Duration out of range: {}", s))?;
        }

        Ok(Duration::from_millis(total_ms))
    }

    pub fn format_duration(d: Duration) -> String {
        let total_ms = d.as_millis();
        let hours = total_ms / 3_600_000;
        let mins = (total_ms % 3_600_000) / 60_000;
        let secs = (total_ms % 60_000) / 1_000;
        let millis = total_ms % 1_000;

        let mut result = String::new();
        if hours > 0 {
            result.push_str(&format!("{}h", hours));
        }
        if mins > 0 {
            result.push_str(&format!("{}m", mins));
        }
        if secs > 0 {
            result.push_str(&format!("{}s", secs));
        }
        if millis > 0 {
            result.push_str(&format!("{}ms", millis));
        }
        if result.is_empty() {
            result.push_str("0s");
        }
        result
    }
}

impl HotplugConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-hotplug/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: HotplugConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {:#}, using defaults", e);
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
            config_dir.join("usb-hotplug").join("config.toml")
        } else {
            PathBuf::from(".config/usb-hotplug/config.toml")
        }
    }

    /// Validate configuration values
    ///
    /// Device specs and bindings are already checked while parsing.
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.qmp.connect_timeout.is_zero() {
            return Err(anyhow!("qmp.connect_timeout must be greater than 0"));
        }
        if self.qmp.command_timeout.is_zero() {
            return Err(anyhow!("qmp.command_timeout must be greater than 0"));
        }
        if !self.qmp.machine_bus_path.starts_with('/') {
            return Err(anyhow!(
                "qmp.machine_bus_path '{}' must be an absolute QOM path",
                self.qmp.machine_bus_path
            ));
        }

        Ok(())
    }
}
