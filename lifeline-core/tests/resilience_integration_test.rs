//! End-to-end behaviour of the resilience components wired through `AppContext`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lifeline_core::abstractions::time::MockClock;
use lifeline_core::error::{AppError, ErrorKind};
use lifeline_core::notification::{NotifyOptions, ToastKind};
use lifeline_core::patterns::{retry, CircuitBreakerState, RetryConfig};
use lifeline_core::service::{ServiceRecovery, SERVICE_RECOVERY};
use lifeline_core::startup::StartupPhase;
use lifeline_core::test_helpers::{FakeBootstrap, RecordingSink, ScriptedProbe};
use lifeline_core::{AppContext, LifelineConfig};

struct Harness {
    ctx: AppContext,
    sink: Arc<RecordingSink>,
    clock: MockClock,
    probe: Arc<ScriptedProbe>,
    bootstrap: Arc<FakeBootstrap>,
}

fn harness(probe: ScriptedProbe) -> Harness {
    let sink = Arc::new(RecordingSink::new());
    let clock = MockClock::new();
    let ctx = AppContext::with_clock(LifelineConfig::test(), sink.clone(), Arc::new(clock.clone()));
    let probe = Arc::new(probe);
    let bootstrap = Arc::new(FakeBootstrap::new());

    let strategy = ServiceRecovery::new(probe.clone(), bootstrap.clone())
        .with_config(ctx.config())
        .with_breaker(ctx.breaker("service"))
        .with_gate(ctx.gate().clone())
        .with_clock(ctx.clock())
        .with_poll(3, Duration::ZERO);
    ctx.recovery().register(Arc::new(strategy));

    Harness {
        ctx,
        sink,
        clock,
        probe,
        bootstrap,
    }
}

#[tokio::test]
async fn test_service_error_triggers_bootstrap_and_resets_breaker() {
    let h = harness(ScriptedProbe::new([false, true]));
    h.ctx.gate().set_phase(StartupPhase::Ready);

    let breaker = h.ctx.breaker("service");
    for _ in 0..h.ctx.config().circuit_breaker.failure_threshold {
        let _ = breaker
            .execute(|| async { Err::<(), _>(AppError::service_unavailable("connection refused")) })
            .await;
    }
    assert_eq!(breaker.state(), CircuitBreakerState::Open);

    let id = h
        .ctx
        .notifications()
        .notify_and_recover(
            &AppError::service_unavailable("connection refused"),
            NotifyOptions::default(),
        )
        .await;

    assert_eq!(h.bootstrap.calls(), 1);
    assert_eq!(h.probe.calls(), 2);
    assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    assert!(h.ctx.notifications().event(&id).unwrap().recovered);
    assert_eq!(h.sink.kinds(), vec![ToastKind::Warning, ToastKind::Success]);
}

#[tokio::test]
async fn test_monitor_pass_recovers_dead_service() {
    let h = harness(ScriptedProbe::new([false, false, true]));

    h.ctx.recovery().run_checks().await;

    let state = h.ctx.recovery().get_state(SERVICE_RECOVERY).unwrap();
    assert_eq!(state.attempts, 0);
    assert!(state.last_success.is_some());
    assert_eq!(h.bootstrap.calls(), 1);
    // Connection came back, so the gate is settling towards ready
    assert!(h.ctx.gate().snapshot().connection_established);
}

#[tokio::test]
async fn test_persistent_outage_goes_quiet_then_retries() {
    let h = harness(ScriptedProbe::always(false));
    h.ctx.gate().set_phase(StartupPhase::Ready);
    let cooldown = h.ctx.config().recovery.cooldown;

    for _ in 0..3 {
        h.ctx.recovery().run_checks().await;
        h.clock.advance(cooldown);
    }
    assert_eq!(h.bootstrap.calls(), 3);
    assert_eq!(
        h.sink.kinds().last().copied(),
        Some(ToastKind::Error),
        "exhaustion surfaces one error toast"
    );

    h.ctx.recovery().run_checks().await;
    assert_eq!(h.bootstrap.calls(), 3);

    h.clock.advance(cooldown + Duration::from_millis(1));
    h.ctx.recovery().run_checks().await;
    assert_eq!(h.bootstrap.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_through_breaker_stops_at_open_circuit() {
    let mut config = LifelineConfig::test();
    config.circuit_breaker.failure_threshold = 2;
    let ctx = AppContext::new(config, Arc::new(RecordingSink::new()));
    let breaker = ctx.breaker("api");
    let calls = Arc::new(AtomicU32::new(0));

    let result = retry(RetryConfig::from(&ctx.config().retry).with_max_attempts(5), || {
        let breaker = breaker.clone();
        let calls = calls.clone();
        async move {
            breaker
                .execute(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AppError::network("reset"))
                })
                .await
        }
    })
    .await;

    // Two real failures open the circuit; the rejection is not transient
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_startup_suppresses_then_reports() {
    let h = harness(ScriptedProbe::always(true));

    h.ctx.notifications().notify(
        &AppError::network("connection reset"),
        NotifyOptions::default().without_auto_recover().queueable(),
    );
    assert!(h.sink.is_empty());
    assert_eq!(h.ctx.gate().snapshot().queued_toasts, 1);

    h.ctx.notifications().notify(
        &AppError::configuration("service.api_key", "missing"),
        NotifyOptions::default(),
    );
    assert_eq!(h.sink.kinds(), vec![ToastKind::Critical]);
}
