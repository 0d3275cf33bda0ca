//! Phase detector: hysteresis-protected phase state machine.
//!
//! # Transition rule
//!
//! ```text
//!                 bootstrap_max        growth_max          scale_max
//!   BOOTSTRAP  ─────────┼──────  GROWTH ───┼──────  SCALE ───┼──────  MATURE
//!                       │                  │                 │
//!        up:   value >= boundary * (1 + hysteresis)
//!        down: value <= boundary * (1 - hysteresis)
//! ```
//!
//! A transition is only considered once the current phase has been active
//! for at least `min_phase_duration`, regardless of how far the value has
//! moved. The boundary used is always the one adjacent to the *current*
//! phase in the direction of travel.
//!
//! Observers are invoked after the state lock is released, each on its own
//! blocking task supervised by a lightweight async task, so a slow or
//! panicking observer never stalls the detector or other observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::store::{NoopPhaseStore, PhaseSnapshot, PhaseStore};
use crate::types::{Phase, PhaseError, PhaseThresholds, PhaseTransitionEvent, Result};

/// Observer invoked on every successful transition.
pub type TransitionHandler = Arc<dyn Fn(PhaseTransitionEvent) + Send + Sync>;

// ============================================================================
// Configuration
// ============================================================================

/// Phase detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDetectorConfig {
    pub thresholds: PhaseThresholds,
    /// Fraction beyond a boundary the value must travel (0.05 = 5%)
    pub hysteresis: f64,
    /// Minimum time a phase stays active before any transition
    pub min_phase_duration: Duration,
    /// Route `save`/`load` through the configured store
    pub persistence_enabled: bool,
}

impl Default for PhaseDetectorConfig {
    fn default() -> Self {
        Self {
            thresholds: PhaseThresholds::default(),
            hysteresis: 0.05,
            min_phase_duration: Duration::from_secs(24 * 3600),
            persistence_enabled: false,
        }
    }
}

impl PhaseDetectorConfig {
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if !(0.0..1.0).contains(&self.hysteresis) {
            return Err(PhaseError::InvalidConfig(format!(
                "hysteresis {} must be in [0, 1)",
                self.hysteresis
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Phase Detector
// ============================================================================

#[derive(Debug)]
struct DetectorState {
    current: Phase,
    entered_at: Instant,
    entered_at_utc: DateTime<Utc>,
    history: Vec<PhaseTransitionEvent>,
    last_value: Option<f64>,
}

impl DetectorState {
    fn enter(&mut self, phase: Phase) {
        self.current = phase;
        self.entered_at = Instant::now();
        self.entered_at_utc = Utc::now();
    }
}

/// Hysteresis state machine over portfolio value.
pub struct PhaseDetector {
    config: PhaseDetectorConfig,
    state: RwLock<DetectorState>,
    handlers: RwLock<Vec<TransitionHandler>>,
    store: Arc<dyn PhaseStore>,
}

impl PhaseDetector {
    /// Create a detector starting in Bootstrap.
    ///
    /// Fails when thresholds are not strictly increasing or the hysteresis
    /// fraction is out of range.
    pub fn new(config: PhaseDetectorConfig) -> Result<Self> {
        config.validate()?;

        info!(
            bootstrap_max = config.thresholds.bootstrap_max,
            growth_max = config.thresholds.growth_max,
            scale_max = config.thresholds.scale_max,
            hysteresis = config.hysteresis,
            min_phase_duration_secs = config.min_phase_duration.as_secs(),
            "Phase detector initialized"
        );

        Ok(Self {
            config,
            state: RwLock::new(DetectorState {
                current: Phase::Bootstrap,
                entered_at: Instant::now(),
                entered_at_utc: Utc::now(),
                history: Vec::new(),
                last_value: None,
            }),
            handlers: RwLock::new(Vec::new()),
            store: Arc::new(NoopPhaseStore),
        })
    }

    /// Use a different persistence backend.
    pub fn with_store(mut self, store: Arc<dyn PhaseStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &PhaseDetectorConfig {
        &self.config
    }

    /// Nominal phase for `value`. Boundaries belong to the lower phase.
    pub fn detect_phase(&self, value: f64) -> Phase {
        let t = &self.config.thresholds;
        if value <= t.bootstrap_max {
            Phase::Bootstrap
        } else if value <= t.growth_max {
            Phase::Growth
        } else if value <= t.scale_max {
            Phase::Scale
        } else {
            Phase::Mature
        }
    }

    /// Alias of [`Self::detect_phase`] for hypothetical values.
    pub fn get_phase_for_value(&self, value: f64) -> Phase {
        self.detect_phase(value)
    }

    /// Whether moving from `current` to `candidate` is permitted at `value`.
    pub async fn should_transition(&self, current: Phase, candidate: Phase, value: f64) -> bool {
        let state = self.state.read().await;
        self.permits(&state, current, candidate, value)
    }

    fn permits(&self, state: &DetectorState, current: Phase, candidate: Phase, value: f64) -> bool {
        if current == candidate {
            return false;
        }

        if state.entered_at.elapsed() < self.config.min_phase_duration {
            debug!(
                current = %current,
                candidate = %candidate,
                elapsed_secs = state.entered_at.elapsed().as_secs(),
                "Transition blocked by minimum phase duration"
            );
            return false;
        }

        let thresholds = &self.config.thresholds;
        let hysteresis = self.config.hysteresis;

        if candidate > current {
            match thresholds.upper_bound(current) {
                Some(boundary) => value >= boundary * (1.0 + hysteresis),
                None => false,
            }
        } else {
            match thresholds.lower_bound(current) {
                Some(boundary) => value <= boundary * (1.0 - hysteresis),
                None => false,
            }
        }
    }

    /// Move to the phase matching `value` if hysteresis and dwell time allow.
    ///
    /// Returns a default event and `false` when no transition happened; that
    /// is the normal outcome for most calls.
    pub async fn attempt_transition(&self, value: f64, reason: &str) -> (PhaseTransitionEvent, bool) {
        let event = {
            let mut state = self.state.write().await;
            state.last_value = Some(value);

            let current = state.current;
            let candidate = self.detect_phase(value);
            if !self.permits(&state, current, candidate, value) {
                return (PhaseTransitionEvent::default(), false);
            }

            let event = PhaseTransitionEvent::new(current, candidate, value, reason);
            state.enter(candidate);
            state.history.push(event.clone());
            event
        };

        info!(
            from = %event.from_phase,
            to = %event.to_phase,
            portfolio_value = value,
            reason = %reason,
            "Phase transition"
        );

        self.notify(&event).await;
        (event, true)
    }

    /// Add an observer. No de-duplication.
    pub async fn register_transition_handler<F>(&self, handler: F)
    where
        F: Fn(PhaseTransitionEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers.push(Arc::new(handler));
        debug!(handlers = handlers.len(), "Registered phase transition handler");
    }

    /// Administrative override, bypassing hysteresis and dwell time.
    ///
    /// Accepts a [`Phase`], a `u8` ordinal or a phase name. The dwell timer
    /// restarts even when the phase is unchanged.
    pub async fn set_phase<P>(&self, phase: P, reason: &str) -> Result<PhaseTransitionEvent>
    where
        P: TryInto<Phase>,
        PhaseError: From<P::Error>,
    {
        let phase: Phase = phase.try_into()?;

        let (event, changed) = {
            let mut state = self.state.write().await;
            let from = state.current;
            let event =
                PhaseTransitionEvent::new(from, phase, state.last_value.unwrap_or(0.0), reason);
            state.enter(phase);
            let changed = from != phase;
            if changed {
                state.history.push(event.clone());
            }
            (event, changed)
        };

        warn!(
            from = %event.from_phase,
            to = %event.to_phase,
            reason = %reason,
            "Phase manually set"
        );

        if changed {
            self.notify(&event).await;
        }
        Ok(event)
    }

    pub async fn get_current_phase(&self) -> Phase {
        self.state.read().await.current
    }

    /// Time spent in the current phase.
    pub async fn get_phase_duration(&self) -> Duration {
        self.state.read().await.entered_at.elapsed()
    }

    /// Copy of the transition history, oldest first.
    pub async fn get_transition_history(&self) -> Vec<PhaseTransitionEvent> {
        self.state.read().await.history.clone()
    }

    /// Persist the current state when persistence is enabled.
    pub async fn save(&self) -> Result<()> {
        if !self.config.persistence_enabled {
            return Ok(());
        }

        let snapshot = {
            let state = self.state.read().await;
            PhaseSnapshot {
                current_phase: state.current,
                phase_entered_at: state.entered_at_utc,
                history: state.history.clone(),
                saved_at: Utc::now(),
            }
        };

        self.store.save(&snapshot).await?;
        info!(
            store = self.store.name(),
            phase = %snapshot.current_phase,
            "Phase state saved"
        );
        Ok(())
    }

    /// Restore state from the store. Returns whether a snapshot was applied.
    ///
    /// A snapshot is only applied to a detector that has not transitioned
    /// yet; live history is never replaced.
    pub async fn load(&self) -> Result<bool> {
        if !self.config.persistence_enabled {
            return Ok(false);
        }

        let Some(snapshot) = self.store.load().await? else {
            info!(store = self.store.name(), "No saved phase state");
            return Ok(false);
        };

        let age = (Utc::now() - snapshot.phase_entered_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut state = self.state.write().await;
        if !state.history.is_empty() {
            warn!(
                store = self.store.name(),
                live_transitions = state.history.len(),
                saved_transitions = snapshot.history.len(),
                "Detector already has transitions, ignoring saved phase state"
            );
            return Ok(false);
        }

        state.current = snapshot.current_phase;
        state.entered_at_utc = snapshot.phase_entered_at;
        state.entered_at = Instant::now()
            .checked_sub(age)
            .unwrap_or_else(Instant::now);
        state.history = snapshot.history;

        info!(
            store = self.store.name(),
            phase = %state.current,
            transitions = state.history.len(),
            "Phase state restored"
        );
        Ok(true)
    }

    /// Fire-and-forget delivery: one supervised task per handler.
    async fn notify(&self, event: &PhaseTransitionEvent) {
        let handlers = self.handlers.read().await.clone();

        for (index, handler) in handlers.into_iter().enumerate() {
            let event = event.clone();
            tokio::spawn(async move {
                let to = event.to_phase;
                let outcome = tokio::task::spawn_blocking(move || handler(event)).await;
                if let Err(e) = outcome {
                    if e.is_panic() {
                        error!(
                            handler = index,
                            to = %to,
                            panic = %panic_message(e.into_panic()),
                            "Phase transition handler panicked"
                        );
                    } else {
                        warn!(handler = index, "Phase transition handler cancelled");
                    }
                }
            });
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
