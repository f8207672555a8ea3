//! Rehome Scheduler: send an idle camera back to its home preset.

use std::sync::Arc;

use tracing::{debug, info};

use crate::camera_state::Task;
use crate::config::CameraConfig;
use crate::health::StateRefresher;
use crate::safe_move::SafeMove;
use crate::schedule::{RunOutcome, SkipReason};

pub struct Rehome {
    safe_move: Arc<SafeMove>,
    refresher: Arc<StateRefresher>,
}

impl Rehome {
    pub fn new(safe_move: Arc<SafeMove>, refresher: Arc<StateRefresher>) -> Self {
        Self { safe_move, refresher }
    }

    /// One rehome cycle. Never interrupts another task and never retries:
    /// a skipped cycle simply waits for the next interval.
    pub async fn run(&self, camera: &CameraConfig) -> RunOutcome {
        let name = camera.name.as_str();
        let store = self.safe_move.store();

        if !store.begin_task(name, Task::Homing) {
            let task = store.snapshot(name).map(|s| s.task).unwrap_or_default();
            debug!(camera = name, %task, "camera busy, skipping rehome");
            return RunOutcome::Skipped(SkipReason::Busy(task));
        }

        let outcome = self.home(camera).await;
        store.set_task(name, Task::Idle);
        outcome
    }

    async fn home(&self, camera: &CameraConfig) -> RunOutcome {
        let name = camera.name.as_str();

        if self.refresher.refresh().await.is_err() {
            return RunOutcome::Failed;
        }
        let sees_objects = self
            .safe_move
            .store()
            .snapshot(name)
            .map(|s| s.sees_objects)
            .unwrap_or(false);
        if sees_objects {
            info!(camera = name, "objects detected, skipping rehome this cycle");
            return RunOutcome::Skipped(SkipReason::ObjectsDetected);
        }

        let preset = &camera.rehome.preset;
        if self.safe_move.execute(name, preset, camera.rehome.slew()).await.is_success() {
            info!(camera = name, preset = %preset, "camera rehomed");
            RunOutcome::Completed
        } else {
            RunOutcome::Failed
        }
    }
}
