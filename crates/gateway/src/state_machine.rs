//! Failover control loop.
//!
//! Both roles run the same loop: probe, decide, transition, sleep. They
//! differ only in the [`RoleStrategy`] that maps the reachability verdict
//! to the desired gateway state:
//! - Master probes the side router; a reachable peer means stand down
//! - Side probes the WAN; a reachable WAN means serve, with the LAN ping
//!   responder following the gateway

use crate::control::{ConfigReloader, DebugToggle};
use crate::interface::{InterfaceController, TransitionOutcome};
use crate::probe::{ConnectivityProbe, ProbeVerdict, ReachabilityProbe};
use crate::types::{FailoverSettings, Role, TargetState};
use common::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How reachability maps to the desired gateway state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Target reachable: gateway down (someone else serves)
    ReachableMeansDown,
    /// Target reachable: gateway up (we can serve)
    ReachableMeansUp,
}

/// Per-role strategy table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleStrategy {
    pub polarity: Polarity,
    /// Whether the LAN ping responder follows the gateway
    pub manages_ping_responder: bool,
    /// What the probe target is, for logs
    pub target_label: &'static str,
}

impl RoleStrategy {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Master => Self {
                polarity: Polarity::ReachableMeansDown,
                manages_ping_responder: false,
                target_label: "peer",
            },
            Role::Side => Self {
                polarity: Polarity::ReachableMeansUp,
                manages_ping_responder: true,
                target_label: "wan",
            },
        }
    }

    /// Desired state for a reachability verdict
    pub fn decide(&self, reachable: bool) -> Decision {
        let gateway = match (self.polarity, reachable) {
            (Polarity::ReachableMeansDown, true) | (Polarity::ReachableMeansUp, false) => {
                TargetState::Down
            }
            (Polarity::ReachableMeansDown, false) | (Polarity::ReachableMeansUp, true) => {
                TargetState::Up
            }
        };

        Decision {
            gateway,
            ping_responder: self.manages_ping_responder.then_some(gateway),
        }
    }
}

/// Desired states computed for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub gateway: TargetState,
    /// `None` when the role does not manage the ping responder
    pub ping_responder: Option<TargetState>,
}

/// Desired state for `role` given a reachability verdict
pub fn decide(role: Role, reachable: bool) -> Decision {
    RoleStrategy::for_role(role).decide(reachable)
}

/// Requests raised outside the loop, serviced at tick boundaries
#[derive(Debug, Default)]
pub struct ControlFlags {
    reload: AtomicBool,
    debug_toggle: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    pub fn request_debug_toggle(&self) {
        self.debug_toggle.store(true, Ordering::SeqCst);
    }

    /// Consume a pending reload request
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    /// Consume a pending debug toggle request
    pub fn take_debug_toggle(&self) -> bool {
        self.debug_toggle.swap(false, Ordering::SeqCst)
    }
}

/// What happened during one tick
#[derive(Debug)]
pub struct TickReport {
    pub tick: u64,
    pub verdict: ProbeVerdict,
    pub decision: Decision,
    pub gateway: Result<TransitionOutcome>,
    pub ping_responder: Option<Result<TransitionOutcome>>,
}

/// Runs the probe/decide/transition loop for one role
pub struct FailoverStateMachine {
    role: Role,
    strategy: RoleStrategy,
    settings_rx: watch::Receiver<Arc<FailoverSettings>>,
    settings: Arc<FailoverSettings>,
    checker: Arc<dyn ReachabilityProbe>,
    probe: ConnectivityProbe,
    gateway: Arc<InterfaceController>,
    ping_responder: Option<Arc<InterfaceController>>,
    flags: Arc<ControlFlags>,
    config: Option<Arc<dyn ConfigReloader>>,
    logs: Option<Arc<dyn DebugToggle>>,
    reports: Option<mpsc::Sender<TickReport>>,
    last_reachable: Option<bool>,
    ticks: u64,
}

impl FailoverStateMachine {
    /// Create a state machine
    ///
    /// # Arguments
    /// * `settings_rx` - Settings snapshots; a new value is adopted at the next tick
    /// * `checker` - Single-attempt reachability primitive
    /// * `gateway` - Controller of the virtual gateway interface
    /// * `ping_responder` - Controller of the LAN ping responder (side role)
    pub fn new(
        settings_rx: watch::Receiver<Arc<FailoverSettings>>,
        checker: Arc<dyn ReachabilityProbe>,
        gateway: Arc<InterfaceController>,
        ping_responder: Option<Arc<InterfaceController>>,
    ) -> Self {
        let settings = settings_rx.borrow().clone();
        let role = settings.role;
        let probe = ConnectivityProbe::new(checker.clone(), &settings.probe);

        Self {
            role,
            strategy: RoleStrategy::for_role(role),
            settings_rx,
            settings,
            checker,
            probe,
            gateway,
            ping_responder,
            flags: Arc::new(ControlFlags::new()),
            config: None,
            logs: None,
            reports: None,
            last_reachable: None,
            ticks: 0,
        }
    }

    /// Service reload requests from `flags` at tick boundaries
    pub fn with_flags(mut self, flags: Arc<ControlFlags>, config: Arc<dyn ConfigReloader>) -> Self {
        self.flags = flags;
        self.config = Some(config);
        self
    }

    /// Service debug toggle requests with `logs`; without it they are dropped
    pub fn with_debug_toggle(mut self, logs: Arc<dyn DebugToggle>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Publish a [`TickReport`] after every tick; a full channel drops reports
    pub fn with_reports(mut self, reports: mpsc::Sender<TickReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn settings(&self) -> &FailoverSettings {
        &self.settings
    }

    /// Run until `cancel` fires; an in-flight tick is abandoned
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            role = %self.role,
            target = %self.settings.probe.target,
            interval_ms = self.settings.check_interval.as_millis(),
            "Starting failover loop"
        );

        loop {
            self.service_boundary().await;

            let report = tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.tick() => report,
            };
            self.publish(report);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.check_interval) => {}
            }
        }

        info!(role = %self.role, ticks = self.ticks, "Failover loop stopped");
    }

    /// One probe, decision and transition round
    pub async fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let target = self.settings.probe.target.clone();

        let verdict = self.probe.sample(&target).await;
        let decision = self.strategy.decide(verdict.reachable);

        if self.last_reachable != Some(verdict.reachable) {
            info!(
                role = %self.role,
                target = %target,
                what = self.strategy.target_label,
                reachable = verdict.reachable,
                gateway = %decision.gateway,
                "Reachability changed"
            );
            self.last_reachable = Some(verdict.reachable);
        } else {
            debug!(role = %self.role, reachable = verdict.reachable, "Reachability unchanged");
        }

        let gateway = self.gateway.transition(decision.gateway).await;
        if let Err(e) = &gateway {
            error!(role = %self.role, target = %decision.gateway, error = %e, "Gateway transition failed");
        }

        let ping_responder = match (decision.ping_responder, &self.ping_responder) {
            (Some(target), Some(controller)) => {
                let result = controller.transition(target).await;
                if let Err(e) = &result {
                    error!(role = %self.role, %target, error = %e, "Ping responder transition failed");
                }
                Some(result)
            }
            (Some(_), None) => {
                debug!(role = %self.role, "No ping responder configured");
                None
            }
            (None, _) => None,
        };

        TickReport {
            tick: self.ticks,
            verdict,
            decision,
            gateway,
            ping_responder,
        }
    }

    fn publish(&self, report: TickReport) {
        if let Some(reports) = &self.reports {
            if let Err(e) = reports.try_send(report) {
                debug!(error = %e, "Dropping tick report");
            }
        }
    }

    /// Handle pending requests and adopt new settings
    async fn service_boundary(&mut self) {
        if self.flags.take_reload() {
            if let Some(config) = &self.config {
                match config.reload().await {
                    Ok(()) => info!("Configuration reloaded"),
                    Err(e) => warn!(error = %e, "Configuration reload failed, keeping previous"),
                }
            }
        }

        if self.flags.take_debug_toggle() {
            match &self.logs {
                Some(logs) => match logs.toggle_debug() {
                    Ok(enabled) => info!(debug = enabled, "Debug logging toggled"),
                    Err(e) => warn!(error = %e, "Failed to toggle debug logging"),
                },
                None => debug!("Debug toggle requested but logging is not reloadable"),
            }
        }

        self.adopt_settings();
    }

    fn adopt_settings(&mut self) {
        if !self.settings_rx.has_changed().unwrap_or(false) {
            return;
        }

        let next = Arc::clone(&self.settings_rx.borrow_and_update());
        if next.role != self.role {
            warn!(current = %self.role, requested = %next.role, "Ignoring settings for another role");
            return;
        }
        if next.probe.kind != self.settings.probe.kind
            || next.interface != self.settings.interface
            || next.confirm != self.settings.confirm
            || next.ping_responder_rule != self.settings.ping_responder_rule
        {
            warn!("Probe kind, interface and confirmation changes apply after restart");
        }

        self.probe = ConnectivityProbe::new(self.checker.clone(), &next.probe);
        info!(
            target = %next.probe.target,
            interval_ms = next.check_interval.as_millis(),
            "Adopted new settings"
        );
        self.settings = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_decisions() {
        let peer_up = decide(Role::Master, true);
        assert_eq!(peer_up.gateway, TargetState::Down);
        assert_eq!(peer_up.ping_responder, None);

        let peer_down = decide(Role::Master, false);
        assert_eq!(peer_down.gateway, TargetState::Up);
        assert_eq!(peer_down.ping_responder, None);
    }

    #[test]
    fn test_side_decisions() {
        let wan_up = decide(Role::Side, true);
        assert_eq!(wan_up.gateway, TargetState::Up);
        assert_eq!(wan_up.ping_responder, Some(TargetState::Up));

        let wan_down = decide(Role::Side, false);
        assert_eq!(wan_down.gateway, TargetState::Down);
        assert_eq!(wan_down.ping_responder, Some(TargetState::Down));
    }

    #[test]
    fn test_control_flags_are_consumed() {
        let flags = ControlFlags::new();
        assert!(!flags.take_reload());

        flags.request_reload();
        flags.request_reload();
        assert!(flags.take_reload());
        assert!(!flags.take_reload());

        flags.request_debug_toggle();
        assert!(flags.take_debug_toggle());
        assert!(!flags.take_debug_toggle());
    }
}
