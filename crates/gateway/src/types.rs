//! Failover data types and settings.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Default number of reachability attempts per probe
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 3;

/// Default timeout of a single reachability attempt
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default delay between two reachability attempts
pub const DEFAULT_ATTEMPT_SPACING: Duration = Duration::from_millis(500);

/// Default delay between two confirmation polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on confirmation polls
pub const DEFAULT_MAX_POLLS: u32 = 10;

/// Name of the managed interface section
pub const DEFAULT_INTERFACE_NAME: &str = "virtual_gw";

/// Firewall rule controlling the LAN-facing ping responder
pub const DEFAULT_PING_RESPONDER_RULE: &str = "virtualgw_ping";

/// Role of this node in the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Main router, watches the side router
    Master,
    /// Side router, watches the WAN
    Side,
}

impl Role {
    /// Both roles, in lock pre-clean order
    pub const ALL: [Role; 2] = [Role::Master, Role::Side];

    /// Lowercase name used in lock resources and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Side => "side",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(Role::Master),
            "side" => Ok(Role::Side),
            other => Err(Error::config(format!("unknown role '{}'", other))),
        }
    }
}

/// Cached state of a managed toggle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    /// No transition has completed yet
    #[default]
    Unknown,
    /// Enabled and confirmed
    Up,
    /// Disabled, confirmed or timed out
    Down,
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayStatus::Unknown => write!(f, "unknown"),
            GatewayStatus::Up => write!(f, "up"),
            GatewayStatus::Down => write!(f, "down"),
        }
    }
}

/// Requested direction of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Up,
    Down,
}

impl TargetState {
    pub fn is_up(&self) -> bool {
        matches!(self, TargetState::Up)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::Up => "up",
            TargetState::Down => "down",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(TargetState::Up),
            "down" => Ok(TargetState::Down),
            other => Err(Error::invalid_argument(format!(
                "unknown target state '{}'",
                other
            ))),
        }
    }
}

impl From<TargetState> for GatewayStatus {
    fn from(target: TargetState) -> Self {
        match target {
            TargetState::Up => GatewayStatus::Up,
            TargetState::Down => GatewayStatus::Down,
        }
    }
}

impl PartialEq<TargetState> for GatewayStatus {
    fn eq(&self, other: &TargetState) -> bool {
        *self == GatewayStatus::from(*other)
    }
}

/// Operational state reported by the interface manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct LinkStatus {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub available: bool,
    #[serde(default = "pending_default")]
    pub pending: bool,
}

fn pending_default() -> bool {
    true
}

impl LinkStatus {
    /// Up, available and not pending
    pub fn is_confirmed_up(&self) -> bool {
        self.up && self.available && !self.pending
    }

    pub fn is_confirmed_down(&self) -> bool {
        !self.up
    }

    /// Whether the link has settled in `target`
    pub fn matches(&self, target: TargetState) -> bool {
        match target {
            TargetState::Up => self.is_confirmed_up(),
            TargetState::Down => self.is_confirmed_down(),
        }
    }
}

/// Dependent subsystem refreshed after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Network,
    Firewall,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Network => "network",
            Subsystem::Firewall => "firewall",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single reachability attempt is made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeKind {
    /// ICMP echo
    Icmp,
    /// TCP connect
    Tcp { port: u16 },
}

/// Connectivity probe settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    /// Host or IP address to probe
    pub target: String,

    pub kind: ProbeKind,

    /// Attempts per probe; the verdict is a strict majority of them
    pub attempts: u32,

    /// Timeout of each attempt
    pub attempt_timeout: Duration,

    /// Pause after each attempt
    pub attempt_spacing: Duration,
}

impl ProbeSettings {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: ProbeKind::Icmp,
            attempts: DEFAULT_PROBE_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            attempt_spacing: DEFAULT_ATTEMPT_SPACING,
        }
    }
}

/// Bounded confirmation polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmSettings {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ConfirmSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

/// Static definition of the managed interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSettings {
    /// Interface section name (e.g., "virtual_gw")
    pub name: String,

    /// Underlying device (e.g., "eth0")
    pub device: String,

    pub ipaddr: Ipv4Addr,

    pub netmask: Ipv4Addr,

    pub gateway: Option<Ipv4Addr>,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_INTERFACE_NAME.to_string(),
            device: "eth0".to_string(),
            ipaddr: Ipv4Addr::new(192, 168, 50, 5),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: None,
        }
    }
}

/// Immutable snapshot the failover core runs on
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverSettings {
    pub role: Role,
    pub probe: ProbeSettings,
    pub check_interval: Duration,
    pub interface: InterfaceSettings,
    pub confirm: ConfirmSettings,
    pub ping_responder_rule: String,
}

impl FailoverSettings {
    /// Settings with defaults for everything but role and probe target
    pub fn new(role: Role, target: impl Into<String>) -> Self {
        Self {
            role,
            probe: ProbeSettings::new(target),
            check_interval: Duration::from_secs(1),
            interface: InterfaceSettings::default(),
            confirm: ConfirmSettings::default(),
            ping_responder_rule: DEFAULT_PING_RESPONDER_RULE.to_string(),
        }
    }

    /// Check the invariants the core relies on
    pub fn validate(&self) -> Result<()> {
        if self.probe.target.trim().is_empty() {
            return Err(Error::config("probe target must not be empty"));
        }

        if self.check_interval.is_zero() {
            return Err(Error::config("check interval must be greater than zero"));
        }

        if self.probe.attempts % 2 == 0 {
            return Err(Error::config("probe attempts must be an odd number"));
        }

        if self.confirm.max_polls == 0 {
            return Err(Error::config("max polls must be at least 1"));
        }

        if self.interface.name.is_empty() {
            return Err(Error::config("interface name is required"));
        }

        Ok(())
    }
}
