//! Synthetic progress for executables that cannot report their own.

use crate::store::StoreHandle;
use conductorcore::{ConductorError, NodeId, NodeState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Minimum time 100% stays visible before the node flips to completed
pub const MIN_SETTLE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStep {
    pub percent: f64,
    pub message: &'static str,
}

const fn step(percent: f64, message: &'static str) -> ProgressStep {
    ProgressStep { percent, message }
}

const LIGHT_STEPS: [ProgressStep; 4] = [
    step(25.0, "Preparing"),
    step(50.0, "Processing"),
    step(75.0, "Finishing"),
    step(90.0, "Finalizing"),
];

const STANDARD_STEPS: [ProgressStep; 6] = [
    step(10.0, "Preparing"),
    step(25.0, "Loading inputs"),
    step(45.0, "Processing"),
    step(65.0, "Processing"),
    step(80.0, "Collecting results"),
    step(90.0, "Finalizing"),
];

const HEAVY_STEPS: [ProgressStep; 7] = [
    step(5.0, "Preparing"),
    step(15.0, "Loading inputs"),
    step(30.0, "Processing"),
    step(45.0, "Processing"),
    step(60.0, "Processing"),
    step(75.0, "Collecting results"),
    step(90.0, "Finalizing"),
];

/// Step schedule for a node weight. Every schedule stops short of 100;
/// completion is only ever reported by [`ProgressController::mark_complete`].
pub fn generate_progress_steps(weight: f64) -> &'static [ProgressStep] {
    if weight < 100.0 {
        &LIGHT_STEPS
    } else if weight > 300.0 {
        &HEAVY_STEPS
    } else {
        &STANDARD_STEPS
    }
}

/// Feeds a believable progress sequence for one node into the store
pub struct ProgressController {
    store: StoreHandle,
    node_id: NodeId,
    steps: &'static [ProgressStep],
    delay: Duration,
    cancellation: CancellationToken,
    completed: AtomicBool,
}

impl ProgressController {
    pub fn new(store: StoreHandle, node_id: NodeId, weight: f64, delay: Duration) -> Self {
        Self {
            store,
            node_id,
            steps: generate_progress_steps(weight),
            delay,
            cancellation: CancellationToken::new(),
            completed: AtomicBool::new(false),
        }
    }

    pub fn steps(&self) -> &'static [ProgressStep] {
        self.steps
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Emit the steps in order, pausing between them. Stops at the next
    /// step boundary once cancelled, or when the store refuses an update.
    pub async fn start(&self) {
        for step in self.steps {
            if self.cancellation.is_cancelled() {
                break;
            }

            let current = self.store.node_progress(&self.node_id).unwrap_or(0.0);
            if step.percent > current {
                if let Err(e) = self.store.set_node_progress(&self.node_id, step.percent, step.message) {
                    tracing::debug!(node_id = %self.node_id, "Synthetic progress stopped: {}", e);
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = self.cancellation.cancelled() => {}
            }
        }
    }

    /// Report 100%, hold it briefly, then mark the node completed.
    /// Only the first call has any effect.
    pub async fn mark_complete(&self) -> Result<(), ConductorError> {
        if self.completed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancellation.cancel();
        self.store.set_node_progress(&self.node_id, 100.0, "Complete")?;
        tokio::time::sleep((self.delay / 2).max(MIN_SETTLE_DELAY)).await;
        self.store.set_node_state(&self.node_id, NodeState::Completed, None)
    }

    /// Stop emitting steps, e.g. because the executable failed
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
