//! Phase state persistence hook.
//!
//! The detector saves and restores its state through [`PhaseStore`]. The
//! only implementation shipped here is [`NoopPhaseStore`], which logs and
//! keeps nothing; durable backends plug in without touching the state
//! machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Phase, PhaseTransitionEvent, Result};

/// Point-in-time detector state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub current_phase: Phase,
    pub phase_entered_at: DateTime<Utc>,
    pub history: Vec<PhaseTransitionEvent>,
    pub saved_at: DateTime<Utc>,
}

/// Storage backend for detector state.
#[async_trait]
pub trait PhaseStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    async fn save(&self, snapshot: &PhaseSnapshot) -> Result<()>;

    /// Most recently saved snapshot, `None` when nothing is stored.
    async fn load(&self) -> Result<Option<PhaseSnapshot>>;
}

/// Log-only store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPhaseStore;

#[async_trait]
impl PhaseStore for NoopPhaseStore {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn save(&self, snapshot: &PhaseSnapshot) -> Result<()> {
        debug!(
            phase = %snapshot.current_phase,
            transitions = snapshot.history.len(),
            "Phase state save requested (no-op store)"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<PhaseSnapshot>> {
        debug!("Phase state load requested (no-op store)");
        Ok(None)
    }
}
