//! Idempotent external toggles with bounded confirmation.
//!
//! [`InterfaceController`] drives anything that can be switched up or down
//! and queried afterwards: the virtual gateway interface and the LAN ping
//! responder rule are both instances of it, differing only in the
//! [`ExternalToggle`] they wrap and the subsystems reloaded afterwards.

use crate::types::{ConfirmSettings, GatewayStatus, Subsystem, TargetState};
use async_trait::async_trait;
use common::{Error, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Something that can be administratively switched and then verified
#[async_trait]
pub trait ExternalToggle: Send + Sync {
    /// Issue the administrative command for `target`
    async fn apply(&self, target: TargetState) -> Result<()>;

    /// Whether the toggle is observed in `target`
    async fn confirm(&self, target: TargetState) -> Result<bool>;
}

/// Refreshes a dependent subsystem after a transition
#[async_trait]
pub trait SubsystemReloader: Send + Sync {
    async fn reload(&self, subsystem: Subsystem) -> Result<()>;
}

/// Result of a successful [`InterfaceController::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Already in the requested state, nothing was issued
    Unchanged,
    /// Applied and confirmed within the poll bound
    Confirmed,
    /// Bring-down applied but never confirmed; status marked down anyway
    Unconfirmed,
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Unchanged => "unchanged",
            TransitionOutcome::Confirmed => "confirmed",
            TransitionOutcome::Unconfirmed => "unconfirmed",
        }
    }
}

/// Owns the up/down transitions of one external toggle
pub struct InterfaceController {
    name: String,
    toggle: Arc<dyn ExternalToggle>,
    reloader: Arc<dyn SubsystemReloader>,
    reloads: Vec<Subsystem>,
    confirm: ConfirmSettings,
    status: RwLock<GatewayStatus>,
    transition_lock: Mutex<()>,
}

impl InterfaceController {
    /// Create a controller
    ///
    /// # Arguments
    /// * `name` - Name used in logs and errors
    /// * `toggle` - The external toggle being driven
    /// * `reloader` - Reload primitive for dependent subsystems
    /// * `reloads` - Subsystems refreshed, in order, after each applied transition
    /// * `confirm` - Confirmation poll bound
    pub fn new(
        name: impl Into<String>,
        toggle: Arc<dyn ExternalToggle>,
        reloader: Arc<dyn SubsystemReloader>,
        reloads: Vec<Subsystem>,
        confirm: ConfirmSettings,
    ) -> Self {
        Self {
            name: name.into(),
            toggle,
            reloader,
            reloads,
            confirm,
            status: RwLock::new(GatewayStatus::Unknown),
            transition_lock: Mutex::new(()),
        }
    }

    /// Controller for the virtual gateway interface
    pub fn gateway(
        toggle: Arc<dyn ExternalToggle>,
        reloader: Arc<dyn SubsystemReloader>,
        confirm: ConfirmSettings,
    ) -> Self {
        Self::new(
            "gateway",
            toggle,
            reloader,
            vec![Subsystem::Network, Subsystem::Firewall],
            confirm,
        )
    }

    /// Controller for the LAN ping responder rule
    pub fn ping_responder(
        toggle: Arc<dyn ExternalToggle>,
        reloader: Arc<dyn SubsystemReloader>,
        confirm: ConfirmSettings,
    ) -> Self {
        Self::new(
            "ping-responder",
            toggle,
            reloader,
            vec![Subsystem::Firewall],
            confirm,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the cached status; never waits for a running transition
    pub async fn current_status(&self) -> GatewayStatus {
        *self.status.read().await
    }

    /// Move the toggle to `target`
    ///
    /// Transitions are serialized. Requesting the state the controller is
    /// already in returns [`TransitionOutcome::Unchanged`] without issuing
    /// anything.
    pub async fn transition(&self, target: TargetState) -> Result<TransitionOutcome> {
        let _guard = self.transition_lock.lock().await;

        let current = self.current_status().await;
        if current == target {
            debug!(controller = %self.name, %target, "Already in requested state");
            return Ok(TransitionOutcome::Unchanged);
        }

        info!(controller = %self.name, from = %current, to = %target, "Transitioning");

        if let Err(e) = self.toggle.apply(target).await {
            error!(controller = %self.name, %target, error = %e, "Failed to apply transition");
            return Err(e);
        }

        let outcome = if self.await_confirmation(target).await {
            TransitionOutcome::Confirmed
        } else if target.is_up() {
            error!(
                controller = %self.name,
                polls = self.confirm.max_polls,
                "Bring-up not confirmed, keeping previous status"
            );
            return Err(Error::confirm_timeout(
                format!("{} {}", self.name, target),
                self.confirm.max_polls,
            ));
        } else {
            warn!(
                controller = %self.name,
                polls = self.confirm.max_polls,
                "Bring-down not confirmed, marking down anyway"
            );
            TransitionOutcome::Unconfirmed
        };

        *self.status.write().await = target.into();
        info!(controller = %self.name, status = %target, outcome = outcome.as_str(), "Transition complete");

        self.reload_dependents().await;

        Ok(outcome)
    }

    /// Poll until `target` is observed or the bound is exhausted
    async fn await_confirmation(&self, target: TargetState) -> bool {
        let max_polls = self.confirm.max_polls.max(1);

        for poll in 1..=max_polls {
            match self.toggle.confirm(target).await {
                Ok(true) => {
                    debug!(controller = %self.name, %target, poll, "Transition confirmed");
                    return true;
                }
                Ok(false) => {
                    debug!(controller = %self.name, %target, poll, "Not yet confirmed");
                }
                Err(e) => {
                    warn!(controller = %self.name, poll, error = %e, "Status query failed");
                }
            }

            if poll < max_polls && !self.confirm.poll_interval.is_zero() {
                sleep(self.confirm.poll_interval).await;
            }
        }

        false
    }

    /// Best-effort reload of dependent subsystems, in order
    async fn reload_dependents(&self) {
        for subsystem in &self.reloads {
            match self.reloader.reload(*subsystem).await {
                Ok(()) => debug!(controller = %self.name, %subsystem, "Reloaded"),
                Err(e) => {
                    warn!(controller = %self.name, %subsystem, error = %e, "Reload failed")
                }
            }
        }
    }
}
