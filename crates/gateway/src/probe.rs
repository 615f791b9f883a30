//! Connectivity probing with majority voting.

use crate::command::{CommandRunner, args};
use crate::types::{ProbeKind, ProbeSettings};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Extra time granted to the ping process on top of its own deadline
const PING_GRACE: Duration = Duration::from_secs(1);

/// A single reachability attempt against a host
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if `target` answered within `timeout`.
    ///
    /// Attempts that cannot even be issued report false.
    async fn attempt(&self, target: &str, timeout: Duration) -> bool;

    /// Get the name of this probe
    fn name(&self) -> &str;
}

/// ICMP echo through the system `ping` binary
pub struct PingProbe {
    runner: Arc<dyn CommandRunner>,
}

impl PingProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn ping_args(target: &str, timeout: Duration) -> Vec<String> {
        let secs = timeout.as_secs().max(1).to_string();
        args(["-c", "1", "-W", &secs, target])
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn attempt(&self, target: &str, timeout_duration: Duration) -> bool {
        let ping_args = Self::ping_args(target, timeout_duration);

        match timeout(timeout_duration + PING_GRACE, self.runner.run("ping", &ping_args)).await {
            Ok(Ok(out)) => out.success(),
            Ok(Err(e)) => {
                warn!(target, error = %e, "Could not issue ping");
                false
            }
            Err(_) => {
                debug!(target, "Ping did not exit in time");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "icmp"
    }
}

/// TCP connect probe
pub struct TcpProbe {
    port: u16,
}

impl TcpProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn attempt(&self, target: &str, timeout_duration: Duration) -> bool {
        match timeout(timeout_duration, TcpStream::connect((target, self.port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(target, port = self.port, error = %e, "TCP connect failed");
                false
            }
            Err(_) => {
                debug!(target, port = self.port, "TCP connect timed out");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

/// Attempt primitive for `kind`
pub fn checker_for(kind: &ProbeKind, runner: Arc<dyn CommandRunner>) -> Arc<dyn ReachabilityProbe> {
    match kind {
        ProbeKind::Icmp => Arc::new(PingProbe::new(runner)),
        ProbeKind::Tcp { port } => Arc::new(TcpProbe::new(*port)),
    }
}

/// True when `successes` is a strict majority of `attempts`.
pub fn majority(successes: u32, attempts: u32) -> bool {
    successes * 2 > attempts
}

/// Outcome of one probe round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeVerdict {
    pub successes: u32,
    pub attempts: u32,
    pub reachable: bool,
    pub elapsed: Duration,
}

/// Samples reachability of a host with a fixed number of attempts.
pub struct ConnectivityProbe {
    checker: Arc<dyn ReachabilityProbe>,
    attempts: u32,
    attempt_timeout: Duration,
    attempt_spacing: Duration,
}

impl ConnectivityProbe {
    /// Create a probe around an attempt primitive
    pub fn new(checker: Arc<dyn ReachabilityProbe>, settings: &ProbeSettings) -> Self {
        Self {
            checker,
            attempts: settings.attempts.max(1),
            attempt_timeout: settings.attempt_timeout,
            attempt_spacing: settings.attempt_spacing,
        }
    }

    /// Create a probe using the attempt primitive named by `settings.kind`
    pub fn from_settings(settings: &ProbeSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(checker_for(&settings.kind, runner), settings)
    }

    /// Whether a majority of attempts against `target` succeeded
    pub async fn probe(&self, target: &str) -> bool {
        self.sample(target).await.reachable
    }

    /// Run all attempts against `target` and report the tally
    pub async fn sample(&self, target: &str) -> ProbeVerdict {
        let start = Instant::now();
        let mut successes = 0;

        for attempt in 1..=self.attempts {
            let ok = self.checker.attempt(target, self.attempt_timeout).await;
            if ok {
                successes += 1;
            }
            debug!(
                target,
                probe = self.checker.name(),
                attempt,
                ok,
                "Reachability attempt"
            );

            if attempt < self.attempts && !self.attempt_spacing.is_zero() {
                sleep(self.attempt_spacing).await;
            }
        }

        let verdict = ProbeVerdict {
            successes,
            attempts: self.attempts,
            reachable: majority(successes, self.attempts),
            elapsed: start.elapsed(),
        };

        debug!(
            target,
            successes,
            attempts = self.attempts,
            reachable = verdict.reachable,
            "Probe verdict"
        );

        verdict
    }
}
