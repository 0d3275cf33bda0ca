//! Integration tests for the phase manager's background loop.
//!
//! These exercise the manager the way the trading service uses it: a
//! portfolio value source polled on a timer, observers registered for
//! transitions, and synchronous readers running concurrently.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use zero_phase::{
    Phase, PhaseManager, PhaseManagerConfig, PhaseSnapshot, PhaseStore, PortfolioValueSource,
    Result, StrategyType,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn fast_config() -> PhaseManagerConfig {
    let mut config = PhaseManagerConfig::default();
    config.check_interval = Duration::from_millis(10);
    config.detector.min_phase_duration = Duration::ZERO;
    config.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Source whose value can be changed from the test.
struct SharedValue {
    value: AtomicU64,
    calls: AtomicUsize,
}

impl SharedValue {
    fn new(value: f64) -> Arc<Self> {
        Arc::new(Self {
            value: AtomicU64::new(value.to_bits()),
            calls: AtomicUsize::new(0),
        })
    }

    fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::SeqCst);
    }
}

#[async_trait]
impl PortfolioValueSource for SharedValue {
    async fn portfolio_value(&self) -> anyhow::Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(f64::from_bits(self.value.load(Ordering::SeqCst)))
    }
}

/// In-memory store standing in for a durable backend.
#[derive(Default)]
struct MemoryStore {
    saved: Mutex<Option<PhaseSnapshot>>,
}

#[async_trait]
impl PhaseStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, snapshot: &PhaseSnapshot) -> Result<()> {
        *self.saved.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<PhaseSnapshot>> {
        Ok(self.saved.lock().await.clone())
    }
}

async fn wait_for_phase(manager: &PhaseManager, phase: Phase) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.get_current_phase().await != phase {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("phase not reached in time");
}

// ============================================================================
// Loop Tests
// ============================================================================

#[tokio::test]
async fn test_loop_tracks_portfolio_value() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    let source = SharedValue::new(5_000.0);
    manager.set_portfolio_source(source.clone()).await;

    manager.start(CancellationToken::new()).await.unwrap();
    assert!(manager.is_running());

    source.set(75_000.0);
    wait_for_phase(&manager, Phase::Scale).await;
    assert_eq!(
        manager.get_current_strategy().await.strategy_type,
        StrategyType::Aggressive
    );

    source.set(1_000.0);
    wait_for_phase(&manager, Phase::Bootstrap).await;
    assert_eq!(manager.get_transition_history().await.len(), 2);

    manager.stop().await;
    assert!(!manager.is_running());
    assert!(source.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_loop_with_closure_getter() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    manager
        .set_portfolio_getter(|| async { Ok::<f64, anyhow::Error>(300_000.0) })
        .await;

    manager.start(CancellationToken::new()).await.unwrap();
    wait_for_phase(&manager, Phase::Mature).await;
    manager.stop().await;
}

#[tokio::test]
async fn test_getter_errors_skip_ticks() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    manager
        .set_portfolio_getter(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    anyhow::bail!("exchange unavailable");
                }
                Ok::<f64, anyhow::Error>(20_000.0)
            }
        })
        .await;

    manager.start(CancellationToken::new()).await.unwrap();
    wait_for_phase(&manager, Phase::Growth).await;
    assert!(attempts.load(Ordering::SeqCst) >= 4);
    assert!(manager.is_running());
    manager.stop().await;
}

#[tokio::test]
async fn test_missing_source_is_not_fatal() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    manager.start(CancellationToken::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.is_running());
    assert_eq!(manager.get_current_phase().await, Phase::Bootstrap);

    manager.set_portfolio_getter(|| async { Ok::<f64, anyhow::Error>(12_000.0) }).await;
    wait_for_phase(&manager, Phase::Growth).await;
    manager.stop().await;
}

#[tokio::test]
async fn test_context_cancellation_stops_loop() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    let ctx = CancellationToken::new();
    manager.start(ctx.clone()).await.unwrap();
    assert!(manager.is_running());

    ctx.cancel();
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Stop after cancellation is still safe
    manager.stop().await;
    manager.stop().await;
}

#[tokio::test]
async fn test_stop_abandons_hanging_source() {
    let mut config = fast_config();
    config.shutdown_timeout = Duration::from_millis(100);
    let manager = PhaseManager::new(config).unwrap();
    manager
        .set_portfolio_getter(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<f64, anyhow::Error>(0.0)
        })
        .await;

    manager.start(CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = std::time::Instant::now();
    manager.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_second_start_is_ignored() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    let source = SharedValue::new(1_000.0);
    manager.set_portfolio_source(source).await;

    manager.start(CancellationToken::new()).await.unwrap();
    manager.start(CancellationToken::new()).await.unwrap();
    manager.stop().await;
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_first_check_waits_one_interval() {
    let mut config = fast_config();
    config.check_interval = Duration::from_secs(3600);
    let manager = PhaseManager::new(config).unwrap();
    let source = SharedValue::new(20_000.0);
    manager.set_portfolio_source(source.clone()).await;

    manager.start(CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(manager.get_current_phase().await, Phase::Bootstrap);
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stops_both_wait_for_exit() {
    let manager = Arc::new(PhaseManager::new(fast_config()).unwrap());
    manager
        .set_portfolio_getter(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<f64, anyhow::Error>(1_000.0)
        })
        .await;

    manager.start(CancellationToken::new()).await.unwrap();
    // Let the loop enter the slow source
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager.stop().await;
            manager.is_running()
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    manager.stop().await;
    assert!(!manager.is_running());
    assert!(!first.await.unwrap());

    // A later call returns immediately
    manager.stop().await;
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_drop_stops_loop() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    let source = SharedValue::new(1_000.0);
    manager.set_portfolio_source(source.clone()).await;
    manager.start(CancellationToken::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(manager);
    let at_drop = source.calls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(source.calls.load(Ordering::SeqCst) <= at_drop + 1);
}

// ============================================================================
// Observer Tests
// ============================================================================

#[tokio::test]
async fn test_observers_are_isolated() {
    let manager = PhaseManager::new(fast_config()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager
        .register_phase_transition_handler(|_| panic!("risk manager exploded"))
        .await;
    manager
        .register_phase_transition_handler(move |event| {
            let _ = tx.send(event);
        })
        .await;

    let (_, moved) = manager.on_portfolio_value_update(11_000.0, "fill").await;
    assert!(moved);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.from_phase, Phase::Bootstrap);
    assert_eq!(event.to_phase, Phase::Growth);
    assert_eq!(event.reason, "fill");

    // Forced phases notify too
    manager.force_phase(Phase::Mature, "operator").await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.to_phase, Phase::Mature);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_and_writers() {
    let manager = Arc::new(PhaseManager::new(fast_config()).unwrap());
    let source = SharedValue::new(5_000.0);
    manager.set_portfolio_source(source.clone()).await;
    manager.start(CancellationToken::new()).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            for j in 0..50 {
                let value = if (i + j) % 2 == 0 { 80_000.0 } else { 4_000.0 };
                manager.on_portfolio_value_update(value, "fill").await;

                let size = manager.calculate_position_size(1_000.0, 0.7).await;
                let phase = manager.get_current_phase().await;
                assert!(size > 0.0);
                assert!(Phase::all().contains(&phase));
                let _ = manager.get_current_risk_params().await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    manager.stop().await;

    // Settle on a definite phase and make sure the snapshot converges
    manager.force_phase(Phase::Growth, "settle").await.unwrap();
    assert_eq!(manager.get_current_phase().await, Phase::Growth);
    assert_eq!(
        manager.get_current_strategy().await.name,
        "Balanced Growth"
    );

    let history = manager.get_transition_history().await;
    for pair in history.windows(2) {
        assert_eq!(pair[0].to_phase, pair[1].from_phase);
    }
}

// ============================================================================
// Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_state_restored_from_store() {
    let store = Arc::new(MemoryStore::default());
    let mut config = fast_config();
    config.detector.persistence_enabled = true;

    let first = PhaseManager::with_store(config.clone(), store.clone()).unwrap();
    first.on_portfolio_value_update(60_000.0, "fill").await;
    assert_eq!(first.get_current_phase().await, Phase::Scale);
    assert!(store.saved.lock().await.is_some());

    let second = PhaseManager::with_store(config, store).unwrap();
    assert_eq!(second.get_current_phase().await, Phase::Bootstrap);

    second.start(CancellationToken::new()).await.unwrap();
    assert_eq!(second.get_current_phase().await, Phase::Scale);
    assert_eq!(second.get_current_strategy().await.name, "Scaled Expansion");
    assert_eq!(second.get_transition_history().await.len(), 1);
    second.stop().await;
}

#[tokio::test]
async fn test_store_unused_when_persistence_disabled() {
    let store = Arc::new(MemoryStore::default());
    let manager = PhaseManager::with_store(fast_config(), store.clone()).unwrap();

    manager.on_portfolio_value_update(60_000.0, "fill").await;
    manager.force_phase(Phase::Mature, "operator").await.unwrap();
    assert!(store.saved.lock().await.is_none());
}
