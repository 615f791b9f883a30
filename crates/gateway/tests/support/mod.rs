//! Scripted fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use gateway::{
    ConfigReloader, ConfirmSettings, DebugToggle, ExternalToggle, FailoverSettings, Result, Role,
    Subsystem, SubsystemReloader, TargetState, ReachabilityProbe,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Reachability primitive replaying a fixed script, then a default
pub struct ScriptedReachability {
    script: Mutex<VecDeque<bool>>,
    default: bool,
    targets: Mutex<Vec<String>>,
}

impl ScriptedReachability {
    pub fn new(script: impl IntoIterator<Item = bool>, default: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            default,
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reachable: bool) -> Self {
        Self::new([], reachable)
    }

    pub fn push_tick(&self, reachable: bool) {
        let mut script = self.script.lock().unwrap();
        script.extend([reachable; 3]);
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedReachability {
    async fn attempt(&self, target: &str, _timeout: Duration) -> bool {
        self.targets.lock().unwrap().push(target.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Toggle that confirms immediately and records applied targets
#[derive(Default)]
pub struct RecordingToggle {
    applied: Mutex<Vec<TargetState>>,
}

impl RecordingToggle {
    pub fn applied(&self) -> Vec<TargetState> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalToggle for RecordingToggle {
    async fn apply(&self, target: TargetState) -> Result<()> {
        self.applied.lock().unwrap().push(target);
        Ok(())
    }

    async fn confirm(&self, _target: TargetState) -> Result<bool> {
        Ok(true)
    }
}

/// Reloader that records subsystems and always succeeds
#[derive(Default)]
pub struct RecordingReloader {
    reloaded: Mutex<Vec<Subsystem>>,
}

impl RecordingReloader {
    pub fn reloaded(&self) -> Vec<Subsystem> {
        self.reloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubsystemReloader for RecordingReloader {
    async fn reload(&self, subsystem: Subsystem) -> Result<()> {
        self.reloaded.lock().unwrap().push(subsystem);
        Ok(())
    }
}

/// Config reloader counting invocations
#[derive(Default)]
pub struct CountingReloader {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl ConfigReloader for CountingReloader {
    async fn reload(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(gateway::Error::config("probe.target: must not be empty"))
        } else {
            Ok(())
        }
    }
}

/// Debug toggle counting invocations
#[derive(Default)]
pub struct CountingDebugToggle {
    pub calls: AtomicUsize,
}

impl DebugToggle for CountingDebugToggle {
    fn toggle_debug(&self) -> Result<bool> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(calls % 2 == 1)
    }
}

/// Confirmation settings without delays
pub fn instant_confirm() -> ConfirmSettings {
    ConfirmSettings {
        poll_interval: Duration::ZERO,
        max_polls: 10,
    }
}

/// Settings for `role` with every delay removed
pub fn instant_settings(role: Role, target: &str) -> FailoverSettings {
    let mut settings = FailoverSettings::new(role, target);
    settings.probe.attempt_timeout = Duration::from_millis(10);
    settings.probe.attempt_spacing = Duration::ZERO;
    settings.check_interval = Duration::from_millis(10);
    settings.confirm = instant_confirm();
    settings
}
