//! Startup gate behaviour as seen by an application booting up

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::abstractions::time::SystemClock;
use lifeline_core::config::LifelineConfig;
use lifeline_core::notification::{ToastKind, ToastOptions};
use lifeline_core::startup::{StartupGate, StartupPhase, StartupSnapshot, ToastOutcome};
use lifeline_core::test_helpers::RecordingSink;
use pretty_assertions::assert_eq;

fn gate() -> (StartupGate, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let gate = StartupGate::from_config(
        sink.clone(),
        &LifelineConfig::default(),
        Arc::new(SystemClock::new()),
    );
    (gate, sink)
}

#[tokio::test(start_paused = true)]
async fn test_first_run_boot_sequence() {
    let (gate, sink) = gate();

    gate.set_phase(StartupPhase::Connecting);
    gate.set_onboarding_active(true);
    assert_eq!(gate.info("Welcome tips", ToastOptions::default()), ToastOutcome::Suppressed);
    assert!(gate.error("Folder scan failed", ToastOptions::default()).is_shown());

    gate.warning("Device offline", ToastOptions::queueable());
    gate.success("Service started", ToastOptions::queueable());
    gate.set_connection_established(true);
    assert_eq!(gate.phase(), StartupPhase::Onboarding);

    gate.set_onboarding_active(false);
    assert_eq!(
        gate.snapshot(),
        StartupSnapshot {
            phase: StartupPhase::Settling,
            is_onboarding_active: false,
            connection_established: true,
            queued_toasts: 2,
        }
    );

    // Settling already shows warnings but not info
    assert!(gate.warning("Slow sync", ToastOptions::default()).is_shown());
    assert_eq!(gate.info("Tip", ToastOptions::default()), ToastOutcome::Suppressed);

    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(gate.phase(), StartupPhase::Ready);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        sink.messages(),
        vec!["Folder scan failed", "Slow sync", "Device offline", "Service started"]
    );
    assert_eq!(
        sink.kinds(),
        vec![ToastKind::Error, ToastKind::Warning, ToastKind::Warning, ToastKind::Success]
    );
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_interrupts_settling() {
    let (gate, _sink) = gate();

    gate.set_connection_established(true);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    gate.set_connection_established(false);
    assert_eq!(gate.phase(), StartupPhase::Connecting);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(gate.phase(), StartupPhase::Connecting);

    gate.set_connection_established(true);
    tokio::time::sleep(Duration::from_millis(1499)).await;
    assert_eq!(gate.phase(), StartupPhase::Settling);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(gate.phase(), StartupPhase::Ready);
}

#[tokio::test]
async fn test_errors_always_display() {
    let (gate, sink) = gate();

    for phase in [
        StartupPhase::Initializing,
        StartupPhase::Connecting,
        StartupPhase::Onboarding,
    ] {
        gate.set_phase(phase);
        gate.error(format!("error during {}", phase), ToastOptions::default());
        gate.critical(format!("critical during {}", phase), ToastOptions::default());
    }

    assert_eq!(sink.len(), 6);
}
