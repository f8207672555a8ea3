//! Per-camera workers and their timers.
//!
//! Patrol and rehome timers never act on a camera directly; they enqueue a
//! [`Trigger`] on that camera's worker, which runs one operation at a time.
//! Together with `CameraStore::begin_task` this keeps a patrol and a rehome
//! that fire close together from both passing the idle gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::camera_state::Task;
use crate::config::CameraConfig;
use crate::patrol::Patrol;
use crate::rehome::Rehome;
use crate::safe_move::SafeMove;

const TRIGGER_QUEUE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Patrol,
    Rehome,
    /// Retry a restore that failed after an earlier move
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Busy(Task),
    ObjectsDetected,
    NothingPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Skipped(SkipReason),
    Failed,
}

/// Everything a camera worker can do.
pub struct Operations {
    pub patrol: Patrol,
    pub rehome: Rehome,
    pub safe_move: Arc<SafeMove>,
}

impl Operations {
    pub async fn run(&self, camera: &CameraConfig, trigger: Trigger) -> RunOutcome {
        // Owed switches go back on before any new work, whether or not a
        // health poke has come round yet.
        if trigger != Trigger::Restore && self.restore_pending(&camera.name) {
            let outcome = self.retry_restore(camera).await;
            debug!(camera = %camera.name, ?trigger, ?outcome, "settled pending restore first");
        }

        match trigger {
            Trigger::Patrol => self.patrol.run(camera).await,
            Trigger::Rehome => self.rehome.run(camera).await,
            Trigger::Restore => self.retry_restore(camera).await,
        }
    }

    fn restore_pending(&self, name: &str) -> bool {
        self.safe_move
            .store()
            .snapshot(name)
            .is_some_and(|s| s.pending_restore.is_some())
    }

    async fn retry_restore(&self, camera: &CameraConfig) -> RunOutcome {
        let name = camera.name.as_str();
        let Some(state) = self.safe_move.store().snapshot(name) else {
            return RunOutcome::Failed;
        };
        let Some(targets) = state.pending_restore else {
            return RunOutcome::Skipped(SkipReason::NothingPending);
        };
        if state.task != Task::Idle {
            return RunOutcome::Skipped(SkipReason::Busy(state.task));
        }

        info!(camera = name, ?targets, "retrying pending restore");
        if self.safe_move.restore_missing(name, targets).await.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::Failed
        }
    }
}

/// A running camera worker and its timers.
pub struct CameraHandle {
    pub name: String,
    triggers: mpsc::Sender<Trigger>,
    tasks: Vec<JoinHandle<()>>,
}

impl CameraHandle {
    /// Queue `trigger`; dropped if the worker already has work queued.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        match self.triggers.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(camera = %self.name, ?trigger, "worker busy, trigger dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Trigger> {
        self.triggers.clone()
    }

    /// Wait for the worker and timers to exit after shutdown was signalled.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(camera = %self.name, error = %e, "camera task panicked");
                }
            }
        }
    }
}

pub fn spawn_camera(camera: CameraConfig, ops: Arc<Operations>, shutdown: watch::Receiver<bool>) -> CameraHandle {
    let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
    let mut tasks = Vec::new();

    if camera.patrol.enabled {
        tasks.push(tokio::spawn(run_timer(
            camera.name.clone(),
            camera.patrol.interval(),
            Trigger::Patrol,
            tx.clone(),
            shutdown.clone(),
        )));
    }
    if camera.rehome.enabled {
        tasks.push(tokio::spawn(run_timer(
            camera.name.clone(),
            camera.rehome.interval(),
            Trigger::Rehome,
            tx.clone(),
            shutdown.clone(),
        )));
    }

    info!(
        camera = %camera.name,
        patrol = camera.patrol.enabled,
        rehome = camera.rehome.enabled,
        "camera worker started"
    );
    let name = camera.name.clone();
    tasks.push(tokio::spawn(run_worker(camera, ops, rx, shutdown)));

    CameraHandle {
        name,
        triggers: tx,
        tasks,
    }
}

async fn run_worker(
    camera: CameraConfig,
    ops: Arc<Operations>,
    mut triggers: mpsc::Receiver<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let trigger = tokio::select! {
            next = triggers.recv() => match next {
                Some(trigger) => trigger,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let outcome = ops.run(&camera, trigger).await;
        match outcome {
            RunOutcome::Failed => warn!(camera = %camera.name, ?trigger, "operation failed"),
            _ => debug!(camera = %camera.name, ?trigger, ?outcome, "operation finished"),
        }
    }
    debug!(camera = %camera.name, "camera worker stopped");
}

async fn run_timer(
    camera: String,
    period: Duration,
    trigger: Trigger,
    triggers: mpsc::Sender<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match triggers.try_send(trigger) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(camera = %camera, ?trigger, "worker busy, tick skipped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
