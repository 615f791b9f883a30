//! Configuration loading and validation for the virtualgw daemon

use async_trait::async_trait;
use common::LogFormat;
use gateway::{
    ConfigReloader, ConfirmSettings, FailoverSettings, InterfaceSettings, ProbeKind, ProbeSettings,
    Role,
};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Role is required (set `role` or pass --role)")]
    MissingRole,

    #[error("Role cannot change at runtime (running as {current}, file says {requested})")]
    RoleChanged { current: Role, requested: Role },
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub role: Option<Role>,

    pub probe: ProbeConfig,

    #[serde(default)]
    pub interface: InterfaceConfig,

    #[serde(default)]
    pub confirm: ConfirmConfig,

    #[serde(default)]
    pub ping_responder: PingResponderConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.probe.validate()?;
        self.interface.validate()?;
        self.confirm.validate()?;
        self.ping_responder.validate()?;
        self.control.validate()?;
        self.lock.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

/// How a probe attempt reaches the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    #[default]
    Icmp,
    Tcp,
}

/// Connectivity probe settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_probe"))]
pub struct ProbeConfig {
    #[validate(custom = "validate_target")]
    pub target: String,

    #[serde(default)]
    pub kind: ProbeMethod,

    /// Required for `tcp`
    #[serde(default)]
    pub port: Option<u16>,

    /// Odd, so the majority vote never ties
    #[serde(default = "default_attempts")]
    #[validate(range(min = 1, max = 15))]
    pub attempts: u32,

    #[serde(default = "default_attempt_timeout", with = "humantime_serde")]
    #[validate(custom = "validate_attempt_timeout")]
    pub attempt_timeout: Duration,

    #[serde(default = "default_attempt_spacing", with = "humantime_serde")]
    #[validate(custom = "validate_attempt_spacing")]
    pub attempt_spacing: Duration,

    #[serde(default = "default_check_interval", with = "humantime_serde")]
    #[validate(custom = "validate_check_interval")]
    pub check_interval: Duration,
}

/// Managed interface definition
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InterfaceConfig {
    #[validate(custom = "validate_section_name")]
    pub name: String,

    #[validate(length(min = 1))]
    pub device: String,

    pub ipaddr: Ipv4Addr,

    #[validate(custom = "validate_netmask")]
    pub netmask: Ipv4Addr,

    pub gateway: Option<Ipv4Addr>,

    /// Write the static interface definition at startup
    pub provision: bool,
}

/// Transition confirmation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConfirmConfig {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_poll_interval")]
    pub poll_interval: Duration,

    #[validate(range(min = 1, max = 120))]
    pub max_polls: u32,
}

/// LAN ping responder settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PingResponderConfig {
    #[validate(custom = "validate_section_name")]
    pub rule: String,
}

/// Control socket settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControlConfig {
    #[validate(length(min = 1), custom = "validate_socket_path")]
    pub socket: String,
}

/// Role lock settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LockConfig {
    #[validate(length(min = 1))]
    pub dir: String,
}

/// Prometheus endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

// Default implementations

fn default_attempts() -> u32 {
    gateway::types::DEFAULT_PROBE_ATTEMPTS
}

fn default_attempt_timeout() -> Duration {
    gateway::types::DEFAULT_ATTEMPT_TIMEOUT
}

fn default_attempt_spacing() -> Duration {
    gateway::types::DEFAULT_ATTEMPT_SPACING
}

fn default_check_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        let defaults = InterfaceSettings::default();
        Self {
            name: defaults.name,
            device: defaults.device,
            ipaddr: defaults.ipaddr,
            netmask: defaults.netmask,
            gateway: defaults.gateway,
            provision: true,
        }
    }
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        let defaults = ConfirmSettings::default();
        Self {
            poll_interval: defaults.poll_interval,
            max_polls: defaults.max_polls,
        }
    }
}

impl Default for PingResponderConfig {
    fn default() -> Self {
        Self {
            rule: gateway::types::DEFAULT_PING_RESPONDER_RULE.to_string(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket: "/var/run/virtualgw.sock".to_string(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: gateway::DEFAULT_LOCK_DIR.to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9273".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// Custom validators

fn validate_target(target: &str) -> Result<(), ValidationError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("target_empty"));
    }
    if trimmed.starts_with('-') || trimmed.contains(char::is_whitespace) {
        return Err(ValidationError::new("target_invalid_format"));
    }
    Ok(())
}

fn validate_probe(probe: &ProbeConfig) -> Result<(), ValidationError> {
    if probe.attempts % 2 == 0 {
        return Err(ValidationError::new("attempts_must_be_odd"));
    }
    match (probe.kind, probe.port) {
        (ProbeMethod::Tcp, None) | (ProbeMethod::Tcp, Some(0)) => {
            Err(ValidationError::new("tcp_probe_requires_port"))
        }
        _ => Ok(()),
    }
}

fn validate_attempt_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if millis < 100 || millis > 30_000 {
        return Err(ValidationError::new("attempt_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_attempt_spacing(spacing: &Duration) -> Result<(), ValidationError> {
    if spacing.as_millis() > 10_000 {
        return Err(ValidationError::new("attempt_spacing_out_of_range"));
    }
    Ok(())
}

fn validate_check_interval(interval: &Duration) -> Result<(), ValidationError> {
    if interval.is_zero() || interval.as_secs() > 3600 {
        return Err(ValidationError::new("check_interval_out_of_range"));
    }
    Ok(())
}

fn validate_poll_interval(interval: &Duration) -> Result<(), ValidationError> {
    if interval.as_secs() > 60 {
        return Err(ValidationError::new("poll_interval_out_of_range"));
    }
    Ok(())
}

/// Names used as configuration store sections
fn validate_section_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::new("section_name_invalid"));
    }
    Ok(())
}

fn validate_netmask(mask: &Ipv4Addr) -> Result<(), ValidationError> {
    let bits = u32::from(*mask);
    // Contiguous ones followed by zeros
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(ValidationError::new("netmask_not_contiguous"));
    }
    Ok(())
}

fn validate_socket_path(path: &str) -> Result<(), ValidationError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("socket_path_empty"));
    }

    // Must be absolute path or relative (starting with ./)
    if !trimmed.starts_with('/') && !trimmed.starts_with("./") {
        return Err(ValidationError::new("socket_path_invalid_format"));
    }

    Ok(())
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

// Configuration loading implementation

impl Config {
    /// Parse and validate YAML; `role` overrides the file's role
    pub fn from_yaml(contents: &str, role: Option<Role>) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        if role.is_some() {
            config.role = role;
        }
        if config.role.is_none() {
            return Err(ConfigError::MissingRole);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>, role: Option<Role>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents, role)
    }

    /// The explicit path, or the first file found in the search paths
    pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        match explicit {
            Some(path) => Ok(path),
            None => Self::find_config_file().ok_or(ConfigError::FileNotFound),
        }
    }

    /// Find configuration file in standard locations
    pub fn find_config_file() -> Option<PathBuf> {
        Self::search_paths()
            .into_iter()
            .find(|p: &PathBuf| p.exists() && p.is_file())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/virtualgw/virtualgw.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./virtualgw.yaml"));
        paths
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/virtualgw/virtualgw.yaml"))
    }

    /// Convert to the failover core's settings snapshot
    pub fn to_failover_settings(&self) -> Result<FailoverSettings, ConfigError> {
        let role = self.role.ok_or(ConfigError::MissingRole)?;

        let kind = match (self.probe.kind, self.probe.port) {
            (ProbeMethod::Tcp, Some(port)) => ProbeKind::Tcp { port },
            _ => ProbeKind::Icmp,
        };

        Ok(FailoverSettings {
            role,
            probe: ProbeSettings {
                target: self.probe.target.trim().to_string(),
                kind,
                attempts: self.probe.attempts,
                attempt_timeout: self.probe.attempt_timeout,
                attempt_spacing: self.probe.attempt_spacing,
            },
            check_interval: self.probe.check_interval,
            interface: InterfaceSettings {
                name: self.interface.name.clone(),
                device: self.interface.device.clone(),
                ipaddr: self.interface.ipaddr,
                netmask: self.interface.netmask,
                gateway: self.interface.gateway,
            },
            confirm: ConfirmSettings {
                poll_interval: self.confirm.poll_interval,
                max_polls: self.confirm.max_polls,
            },
            ping_responder_rule: self.ping_responder.rule.clone(),
        })
    }
}

/// File-backed settings publisher
///
/// Holds the path and role the daemon started with. Each reload re-reads
/// the file and publishes a new snapshot; on any failure the previous
/// snapshot stays in force.
pub struct ConfigStore {
    path: PathBuf,
    role_override: Option<Role>,
    role: Role,
    tx: watch::Sender<Arc<FailoverSettings>>,
}

impl ConfigStore {
    /// Create a store publishing `initial`
    pub fn new(
        path: impl Into<PathBuf>,
        role_override: Option<Role>,
        initial: FailoverSettings,
    ) -> Self {
        let role = initial.role;
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            path: path.into(),
            role_override,
            role,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FailoverSettings>> {
        self.tx.subscribe()
    }

    /// The snapshot currently in force
    pub fn current(&self) -> Arc<FailoverSettings> {
        self.tx.borrow().clone()
    }

    /// Re-read the file and publish the result
    pub fn reload_now(&self) -> Result<Arc<FailoverSettings>, ConfigError> {
        let config = Config::load_from_file(&self.path, self.role_override)?;
        let settings = config.to_failover_settings()?;

        if settings.role != self.role {
            return Err(ConfigError::RoleChanged {
                current: self.role,
                requested: settings.role,
            });
        }

        let settings = Arc::new(settings);
        self.tx.send_replace(settings.clone());
        info!(path = %self.path.display(), target = %settings.probe.target, "Published new settings");
        Ok(settings)
    }
}

#[async_trait]
impl ConfigReloader for ConfigStore {
    async fn reload(&self) -> gateway::Result<()> {
        match self.reload_now() {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Configuration reload rejected");
                Err(gateway::Error::config(e))
            }
        }
    }
}
