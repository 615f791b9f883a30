//! Dual-node virtual gateway failover.
//!
//! Two routers (a master and a side router) run the same daemon with
//! different roles. Each one probes a target, decides whether it should
//! serve as the LAN gateway and toggles the shared virtual gateway
//! interface accordingly, so that at most one of them serves at a time.
//!
//! # Components
//!
//! - **ConnectivityProbe**: majority vote over independent reachability attempts
//! - **InterfaceController**: idempotent up/down toggle with bounded confirmation
//! - **RoleLock**: one running instance per role
//! - **FailoverStateMachine**: the probe/decide/transition/sleep loop
//! - **ControlPlane**: status query and command dispatch
//!
//! # Example
//!
//! ```no_run
//! use gateway::{
//!     ConnectivityProbe, FailoverSettings, InterfaceController, Role, SystemRunner,
//!     UbusReloader, UciInterface,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = FailoverSettings::new(Role::Master, "192.168.1.2");
//! let runner = Arc::new(SystemRunner::new());
//!
//! let probe = ConnectivityProbe::from_settings(&settings.probe, runner.clone());
//! let controller = InterfaceController::gateway(
//!     Arc::new(UciInterface::new("virtual_gw", runner.clone())),
//!     Arc::new(UbusReloader::new(runner)),
//!     settings.confirm,
//! );
//!
//! let peer_online = probe.probe(&settings.probe.target).await;
//! let decision = gateway::decide(settings.role, peer_online);
//! controller.transition(decision.gateway).await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod control;
pub mod interface;
pub mod lock;
pub mod probe;
pub mod state_machine;
pub mod system;
pub mod types;

pub use command::{CommandRunner, ExecOutput, SystemRunner};
pub use common::{Error, Result};
pub use control::{Action, CommandReply, ConfigReloader, ControlPlane, DebugToggle};
pub use interface::{ExternalToggle, InterfaceController, SubsystemReloader, TransitionOutcome};
pub use lock::{DEFAULT_LOCK_DIR, RoleLock, RoleLockHandle};
pub use probe::{
    ConnectivityProbe, PingProbe, ProbeVerdict, ReachabilityProbe, TcpProbe, checker_for, majority,
};
pub use state_machine::{
    ControlFlags, Decision, FailoverStateMachine, Polarity, RoleStrategy, TickReport, decide,
};
pub use system::{UbusReloader, UciFirewallRule, UciInterface, provision_interface};
pub use types::{
    ConfirmSettings, FailoverSettings, GatewayStatus, InterfaceSettings, LinkStatus, ProbeKind,
    ProbeSettings, Role, Subsystem, TargetState,
};
