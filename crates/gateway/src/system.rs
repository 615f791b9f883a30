//! Bindings to the router's configuration store and service bus.
//!
//! Interface and firewall state live in UCI; transitions are applied with
//! `uci` + `ifup`/`ifdown`, observed with `ifstatus`, and dependent
//! services are refreshed with `ubus call <service> reload`.

use crate::command::{CommandRunner, args};
use crate::interface::{ExternalToggle, SubsystemReloader};
use crate::types::{InterfaceSettings, LinkStatus, Subsystem, TargetState};
use async_trait::async_trait;
use common::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub const UCI_CMD: &str = "uci";
pub const UBUS_CMD: &str = "ubus";
pub const IFUP_CMD: &str = "ifup";
pub const IFDOWN_CMD: &str = "ifdown";
pub const IFSTATUS_CMD: &str = "ifstatus";

/// Timeout handed to `ubus -t`, in seconds
const UBUS_TIMEOUT_SECS: &str = "5";

async fn uci(runner: &dyn CommandRunner, uci_args: Vec<String>) -> Result<String> {
    let out = runner.run(UCI_CMD, &uci_args).await?.check(UCI_CMD)?;
    Ok(out.stdout)
}

/// The virtual gateway interface section in `/etc/config/network`
pub struct UciInterface {
    name: String,
    runner: Arc<dyn CommandRunner>,
}

impl UciInterface {
    pub fn new(name: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.into(),
            runner,
        }
    }

    /// Query `ifstatus` and parse its JSON report
    pub async fn link_status(&self) -> Result<Option<LinkStatus>> {
        let out = self
            .runner
            .run(IFSTATUS_CMD, &args([self.name.as_str()]))
            .await?;

        if !out.success() {
            // ifstatus exits non-zero for interfaces netifd does not know
            debug!(interface = %self.name, output = %out.combined_output(), "Interface not reported");
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&out.stdout)?))
    }
}

#[async_trait]
impl ExternalToggle for UciInterface {
    async fn apply(&self, target: TargetState) -> Result<()> {
        let option = format!("network.{}.disabled", self.name);

        match target {
            TargetState::Up => {
                // Missing option already means enabled
                self.runner
                    .run(UCI_CMD, &args(["-q", "delete", &option]))
                    .await?;
            }
            TargetState::Down => {
                uci(self.runner.as_ref(), args(["set", &format!("{}=1", option)])).await?;
            }
        }
        uci(self.runner.as_ref(), args(["commit", "network"])).await?;

        let program = if target.is_up() { IFUP_CMD } else { IFDOWN_CMD };
        self.runner
            .run(program, &args([self.name.as_str()]))
            .await?
            .check(program)?;

        Ok(())
    }

    async fn confirm(&self, target: TargetState) -> Result<bool> {
        Ok(match self.link_status().await? {
            Some(status) => status.matches(target),
            None => !target.is_up(),
        })
    }
}

/// A firewall rule section toggled through its `enabled` option
pub struct UciFirewallRule {
    rule: String,
    runner: Arc<dyn CommandRunner>,
}

impl UciFirewallRule {
    pub fn new(rule: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            rule: rule.into(),
            runner,
        }
    }

    /// Read back whether the rule is enabled
    pub async fn is_enabled(&self) -> Result<bool> {
        let option = format!("firewall.{}.enabled", self.rule);
        let out = self
            .runner
            .run(UCI_CMD, &args(["-q", "get", &option]))
            .await?;

        // Rules without the option are enabled
        Ok(!out.success() || out.stdout.trim() != "0")
    }
}

#[async_trait]
impl ExternalToggle for UciFirewallRule {
    async fn apply(&self, target: TargetState) -> Result<()> {
        let value = if target.is_up() { "1" } else { "0" };
        let assignment = format!("firewall.{}.enabled={}", self.rule, value);

        uci(self.runner.as_ref(), args(["set", &assignment])).await?;
        uci(self.runner.as_ref(), args(["commit", "firewall"])).await?;
        Ok(())
    }

    async fn confirm(&self, target: TargetState) -> Result<bool> {
        Ok(self.is_enabled().await? == target.is_up())
    }
}

/// Reloads services through `ubus`
pub struct UbusReloader {
    runner: Arc<dyn CommandRunner>,
}

impl UbusReloader {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl SubsystemReloader for UbusReloader {
    async fn reload(&self, subsystem: Subsystem) -> Result<()> {
        self.runner
            .run(
                UBUS_CMD,
                &args(["-t", UBUS_TIMEOUT_SECS, "call", subsystem.as_str(), "reload"]),
            )
            .await?
            .check(UBUS_CMD)?;
        Ok(())
    }
}

/// Write the static definition of the managed interface and commit it
pub async fn provision_interface(
    runner: &dyn CommandRunner,
    settings: &InterfaceSettings,
) -> Result<()> {
    let section = format!("network.{}", settings.name);
    let mut options = vec![
        ("proto", "static".to_string()),
        ("device", settings.device.clone()),
        ("ipaddr", settings.ipaddr.to_string()),
        ("netmask", settings.netmask.to_string()),
    ];
    if let Some(gateway) = settings.gateway {
        options.push(("gateway", gateway.to_string()));
    }

    uci(runner, args(["set", &format!("{}=interface", section)])).await?;
    for (option, value) in options {
        uci(runner, args(["set", &format!("{}.{}={}", section, option, value)])).await?;
    }
    uci(runner, args(["commit", "network"])).await?;

    info!(
        interface = %settings.name,
        device = %settings.device,
        ipaddr = %settings.ipaddr,
        "Provisioned gateway interface"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ExecOutput;
    use common::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned outputs and records every invocation
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<String>>,
        replies: Mutex<VecDeque<ExecOutput>>,
    }

    impl ScriptedRunner {
        fn with_replies(replies: Vec<ExecOutput>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.into()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<ExecOutput> {
            let mut line = program.to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            self.calls.lock().unwrap().push(line);
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ExecOutput::ok("")))
        }
    }

    const IFSTATUS_UP: &str = r#"{
        "up": true,
        "pending": false,
        "available": true,
        "autostart": true,
        "uptime": 12,
        "l3_device": "eth0",
        "proto": "static"
    }"#;

    #[tokio::test]
    async fn test_interface_bring_up_commands() {
        let runner = ScriptedRunner::with_replies(vec![]);
        let iface = UciInterface::new("virtual_gw", runner.clone());

        iface.apply(TargetState::Up).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "uci -q delete network.virtual_gw.disabled",
                "uci commit network",
                "ifup virtual_gw",
            ]
        );
    }

    #[tokio::test]
    async fn test_interface_bring_down_commands() {
        let runner = ScriptedRunner::with_replies(vec![]);
        let iface = UciInterface::new("virtual_gw", runner.clone());

        iface.apply(TargetState::Down).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "uci set network.virtual_gw.disabled=1",
                "uci commit network",
                "ifdown virtual_gw",
            ]
        );
    }

    #[tokio::test]
    async fn test_interface_apply_fails_on_commit_error() {
        let runner = ScriptedRunner::with_replies(vec![
            ExecOutput::ok(""),
            ExecOutput::failed(1, "uci: I/O error"),
        ]);
        let iface = UciInterface::new("virtual_gw", runner.clone());

        let err = iface.apply(TargetState::Down).await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
        // ifdown never issued
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_interface_confirm_parses_ifstatus() {
        let runner = ScriptedRunner::with_replies(vec![
            ExecOutput::ok(IFSTATUS_UP),
            ExecOutput::ok(r#"{"up": true, "pending": true, "available": true}"#),
        ]);
        let iface = UciInterface::new("virtual_gw", runner.clone());

        assert!(iface.confirm(TargetState::Up).await.unwrap());
        assert!(!iface.confirm(TargetState::Up).await.unwrap());
        assert_eq!(runner.calls()[0], "ifstatus virtual_gw");
    }

    #[tokio::test]
    async fn test_interface_unknown_counts_as_down() {
        let runner = ScriptedRunner::with_replies(vec![
            ExecOutput::failed(4, "Interface virtual_gw not found"),
            ExecOutput::failed(4, "Interface virtual_gw not found"),
        ]);
        let iface = UciInterface::new("virtual_gw", runner);

        assert!(iface.confirm(TargetState::Down).await.unwrap());
        assert!(!iface.confirm(TargetState::Up).await.unwrap());
    }

    #[tokio::test]
    async fn test_firewall_rule_toggle() {
        let runner = ScriptedRunner::with_replies(vec![]);
        let rule = UciFirewallRule::new("virtualgw_ping", runner.clone());

        rule.apply(TargetState::Down).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "uci set firewall.virtualgw_ping.enabled=0",
                "uci commit firewall",
            ]
        );
    }

    #[tokio::test]
    async fn test_firewall_rule_confirm() {
        let runner = ScriptedRunner::with_replies(vec![
            ExecOutput::ok("0\n"),
            ExecOutput::ok("1\n"),
            ExecOutput::failed(1, ""),
        ]);
        let rule = UciFirewallRule::new("virtualgw_ping", runner);

        assert!(rule.confirm(TargetState::Down).await.unwrap());
        assert!(rule.confirm(TargetState::Up).await.unwrap());
        // Option absent: enabled
        assert!(rule.confirm(TargetState::Up).await.unwrap());
    }

    #[tokio::test]
    async fn test_ubus_reload() {
        let runner = ScriptedRunner::with_replies(vec![
            ExecOutput::ok(""),
            ExecOutput::failed(4, "Command failed: Not found"),
        ]);
        let reloader = UbusReloader::new(runner.clone());

        reloader.reload(Subsystem::Network).await.unwrap();
        assert!(reloader.reload(Subsystem::Firewall).await.is_err());
        assert_eq!(
            runner.calls(),
            vec![
                "ubus -t 5 call network reload",
                "ubus -t 5 call firewall reload",
            ]
        );
    }

    #[tokio::test]
    async fn test_provision_interface() {
        let runner = ScriptedRunner::with_replies(vec![]);
        let settings = InterfaceSettings {
            gateway: Some("192.168.50.1".parse().unwrap()),
            ..Default::default()
        };

        provision_interface(runner.as_ref(), &settings).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "uci set network.virtual_gw=interface",
                "uci set network.virtual_gw.proto=static",
                "uci set network.virtual_gw.device=eth0",
                "uci set network.virtual_gw.ipaddr=192.168.50.5",
                "uci set network.virtual_gw.netmask=255.255.255.0",
                "uci set network.virtual_gw.gateway=192.168.50.1",
                "uci commit network",
            ]
        );
    }
}
