//! Control plane operations exposed to out-of-process tooling.
//!
//! Transport independent: the daemon binds these to its RPC socket. Nothing
//! here runs a probe; status reads come from the controller's cache and
//! switches are handed to a background task.

use crate::interface::{InterfaceController, TransitionOutcome};
use crate::types::{GatewayStatus, TargetState};
use async_trait::async_trait;
use common::{Error, LogHandle, Result};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Re-reads configuration and publishes the new snapshot
#[async_trait]
pub trait ConfigReloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Flips log verbosity
pub trait DebugToggle: Send + Sync {
    /// Returns whether debug logging is now active
    fn toggle_debug(&self) -> Result<bool>;
}

impl DebugToggle for LogHandle {
    fn toggle_debug(&self) -> Result<bool> {
        LogHandle::toggle_debug(self)
    }
}

/// Supported `command` actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reload,
    Switch,
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reload" => Ok(Action::Reload),
            "switch" => Ok(Action::Switch),
            _ => Err(Error::invalid_argument("invalid command")),
        }
    }
}

/// Successful reply to a `command`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    /// Configuration reloaded
    Reloaded,
    /// Configuration reload failed; the previous snapshot stays in force
    ReloadFailed { error: String },
    /// Switch accepted; the transition runs in the background
    SwitchRequested { target: TargetState },
}

/// Status query and command dispatch
pub struct ControlPlane {
    gateway: Arc<InterfaceController>,
    config: Arc<dyn ConfigReloader>,
}

impl ControlPlane {
    pub fn new(gateway: Arc<InterfaceController>, config: Arc<dyn ConfigReloader>) -> Self {
        Self { gateway, config }
    }

    /// Cached gateway status
    pub async fn get_status(&self) -> GatewayStatus {
        self.gateway.current_status().await
    }

    /// Dispatch `action` with optional `param`
    ///
    /// Unknown actions and malformed parameters return
    /// [`Error::InvalidArgument`] without touching any state.
    pub async fn command(&self, action: &str, param: Option<&str>) -> Result<CommandReply> {
        match action.parse::<Action>()? {
            Action::Reload => Ok(self.reload().await),
            Action::Switch => {
                let target = param
                    .ok_or_else(|| Error::invalid_argument("switch requires a target"))?
                    .parse::<TargetState>()?;
                self.switch(target);
                Ok(CommandReply::SwitchRequested { target })
            }
        }
    }

    async fn reload(&self) -> CommandReply {
        match self.config.reload().await {
            Ok(()) => {
                info!("Configuration reloaded on request");
                CommandReply::Reloaded
            }
            Err(e) => {
                warn!(error = %e, "Requested configuration reload failed");
                CommandReply::ReloadFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Start a transition to `target` without waiting for it
    pub fn switch(&self, target: TargetState) -> JoinHandle<Result<TransitionOutcome>> {
        info!(%target, "Switch requested");
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let result = gateway.transition(target).await;
            if let Err(e) = &result {
                warn!(%target, error = %e, "Requested switch failed");
            }
            result
        })
    }
}
