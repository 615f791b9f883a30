//! Integration tests for the majority-vote connectivity probe

mod support;

use gateway::{ConnectivityProbe, ProbeSettings};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::ScriptedReachability;

fn instant_probe_settings() -> ProbeSettings {
    let mut settings = ProbeSettings::new("192.168.1.2");
    settings.attempt_spacing = Duration::ZERO;
    settings
}

#[tokio::test]
async fn test_all_three_attempt_combinations() {
    for mask in 0u8..8 {
        let attempts: Vec<bool> = (0..3).map(|i| mask & (1 << i) != 0).collect();
        let successes = attempts.iter().filter(|ok| **ok).count();

        let checker = Arc::new(ScriptedReachability::new(attempts.clone(), false));
        let probe = ConnectivityProbe::new(checker.clone(), &instant_probe_settings());

        let verdict = probe.sample("192.168.1.2").await;
        assert_eq!(verdict.attempts, 3);
        assert_eq!(verdict.successes as usize, successes, "attempts {attempts:?}");
        assert_eq!(verdict.reachable, successes >= 2, "attempts {attempts:?}");

        // Exactly three attempts, never more
        assert_eq!(checker.targets().len(), 3);
    }
}

#[tokio::test]
async fn test_probe_returns_verdict() {
    let checker = Arc::new(ScriptedReachability::new([true, false, true], false));
    let probe = ConnectivityProbe::new(checker, &instant_probe_settings());
    assert!(probe.probe("192.168.1.2").await);

    let checker = Arc::new(ScriptedReachability::new([false, false, true], true));
    let probe = ConnectivityProbe::new(checker, &instant_probe_settings());
    assert!(!probe.probe("192.168.1.2").await);
}

#[tokio::test]
async fn test_attempts_are_spaced() {
    let mut settings = instant_probe_settings();
    settings.attempt_spacing = Duration::from_millis(30);

    let checker = Arc::new(ScriptedReachability::always(true));
    let probe = ConnectivityProbe::new(checker, &settings);

    let start = Instant::now();
    let verdict = probe.sample("192.168.1.2").await;
    // Two gaps between three attempts
    assert!(start.elapsed() >= Duration::from_millis(60));
    assert!(verdict.reachable);
}

#[tokio::test]
async fn test_unissuable_attempts_count_as_failures() {
    let mut settings = instant_probe_settings();
    settings.target = "virtualgw.invalid".to_string();
    settings.kind = gateway::ProbeKind::Tcp { port: 80 };
    settings.attempt_timeout = Duration::from_millis(300);

    let probe = ConnectivityProbe::from_settings(&settings, Arc::new(gateway::SystemRunner::new()));
    let verdict = probe.sample(&settings.target).await;
    assert_eq!(verdict.successes, 0);
    assert!(!verdict.reachable);
}
