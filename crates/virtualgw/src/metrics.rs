//! Prometheus metrics for the virtualgw daemon.

use gateway::{GatewayStatus, TickReport, TransitionOutcome};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for probe verdict metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    /// Verdict (reachable, unreachable)
    pub verdict: String,
}

/// Labels for transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    /// Controller name (gateway, ping-responder)
    pub controller: String,
    /// Requested state (up, down)
    pub target: String,
    /// Outcome (unchanged, confirmed, unconfirmed, failed)
    pub outcome: String,
}

/// Labels for RPC request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RpcLabels {
    /// Method (get_status, command, invalid)
    pub method: String,
    /// Result (ok, error)
    pub result: String,
}

/// Metrics registry with all daemon metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    probes_total: Family<ProbeLabels, Counter>,
    probe_duration_seconds: Histogram,
    transitions_total: Family<TransitionLabels, Counter>,
    /// Current gateway status (0=unknown, 1=up, 2=down)
    gateway_status: Gauge,
    rpc_requests_total: Family<RpcLabels, Counter>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let probes_total = Family::<ProbeLabels, Counter>::default();
        registry.register(
            "virtualgw_probes",
            "Connectivity probes by verdict",
            probes_total.clone(),
        );

        // 10ms to ~20s
        let probe_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "virtualgw_probe_duration_seconds",
            "Duration of a full majority-vote probe",
            probe_duration_seconds.clone(),
        );

        let transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "virtualgw_transitions",
            "Transitions requested from the interface controllers",
            transitions_total.clone(),
        );

        let gateway_status = Gauge::default();
        registry.register(
            "virtualgw_gateway_status",
            "Current gateway status (0=unknown, 1=up, 2=down)",
            gateway_status.clone(),
        );

        let rpc_requests_total = Family::<RpcLabels, Counter>::default();
        registry.register(
            "virtualgw_rpc_requests",
            "Control socket requests",
            rpc_requests_total.clone(),
        );

        Self {
            registry,
            probes_total,
            probe_duration_seconds,
            transitions_total,
            gateway_status,
            rpc_requests_total,
        }
    }

    /// Record a probe verdict
    pub fn record_probe(&self, reachable: bool, elapsed: Duration) {
        let verdict = if reachable { "reachable" } else { "unreachable" };
        self.probes_total
            .get_or_create(&ProbeLabels {
                verdict: verdict.to_string(),
            })
            .inc();
        self.probe_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// Record a transition request and its outcome
    pub fn record_transition(&self, controller: &str, target: &str, outcome: &str) {
        self.transitions_total
            .get_or_create(&TransitionLabels {
                controller: controller.to_string(),
                target: target.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Update the gateway status gauge
    pub fn set_gateway_status(&self, status: GatewayStatus) {
        self.gateway_status.set(status_value(status));
    }

    /// Record an RPC request
    pub fn record_rpc(&self, method: &str, ok: bool) {
        self.rpc_requests_total
            .get_or_create(&RpcLabels {
                method: method.to_string(),
                result: if ok { "ok" } else { "error" }.to_string(),
            })
            .inc();
    }

    /// Record everything a control loop tick produced
    pub fn record_tick(&self, report: &TickReport) {
        self.record_probe(report.verdict.reachable, report.verdict.elapsed);

        self.record_transition(
            "gateway",
            report.decision.gateway.as_str(),
            outcome_label(&report.gateway),
        );

        if let (Some(target), Some(result)) =
            (report.decision.ping_responder, &report.ping_responder)
        {
            self.record_transition("ping-responder", target.as_str(), outcome_label(result));
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn status_value(status: GatewayStatus) -> i64 {
    match status {
        GatewayStatus::Unknown => 0,
        GatewayStatus::Up => 1,
        GatewayStatus::Down => 2,
    }
}

fn outcome_label(result: &gateway::Result<TransitionOutcome>) -> &'static str {
    match result {
        Ok(outcome) => outcome.as_str(),
        Err(_) => "failed",
    }
}
