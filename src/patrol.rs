//! Patrol Scheduler: walk one camera through its preset route.
//!
//! A run claims the camera (`Patrolling`), refuses to start while objects are
//! tracked, then visits each preset in order with a dwell between legs. Before
//! every leg after the first it re-checks for objects and waits one dwell at a
//! time, up to `max_deferrals`, before moving on regardless.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::camera_state::{RestoreTargets, Task};
use crate::config::CameraConfig;
use crate::health::StateRefresher;
use crate::safe_move::SafeMove;
use crate::schedule::{RunOutcome, SkipReason};

pub struct Patrol {
    safe_move: Arc<SafeMove>,
    refresher: Arc<StateRefresher>,
}

impl Patrol {
    pub fn new(safe_move: Arc<SafeMove>, refresher: Arc<StateRefresher>) -> Self {
        Self { safe_move, refresher }
    }

    pub async fn run(&self, camera: &CameraConfig) -> RunOutcome {
        let name = camera.name.as_str();
        let store = self.safe_move.store();

        if !store.begin_task(name, Task::Patrolling) {
            let task = store.snapshot(name).map(|s| s.task).unwrap_or_default();
            info!(camera = name, %task, "camera busy, skipping patrol");
            return RunOutcome::Skipped(SkipReason::Busy(task));
        }

        let outcome = self.walk(camera).await;
        store.set_task(name, Task::Idle);
        info!(camera = name, ?outcome, "patrol finished");
        outcome
    }

    async fn walk(&self, camera: &CameraConfig) -> RunOutcome {
        let name = camera.name.as_str();
        let plan = &camera.patrol;

        if self.refresher.refresh().await.is_err() {
            return RunOutcome::Failed;
        }
        if self.sees_objects(name) {
            info!(camera = name, "objects detected, patrol not started");
            return RunOutcome::Skipped(SkipReason::ObjectsDetected);
        }

        let originals = match self.safe_move.store().snapshot(name) {
            Some(state) => state.restore_targets(),
            None => return RunOutcome::Failed,
        };

        let last = plan.route.len().saturating_sub(1);
        for (leg, preset) in plan.route.iter().enumerate() {
            if leg > 0 {
                self.wait_for_clear_view(camera).await;
            }

            let outcome = self.safe_move.execute(name, preset, plan.slew()).await;
            self.safe_move.store().set_task(name, Task::Patrolling);

            if !outcome.is_success() {
                error!(camera = name, preset = %preset, leg, "patrol leg failed");
                self.restore_originals(name, originals).await;
                return RunOutcome::Failed;
            }

            if leg < last {
                tokio::time::sleep(plan.dwell()).await;
            }
        }

        RunOutcome::Completed
    }

    /// Defer while objects are tracked, one dwell at a time. A refresh that
    /// fails tells us nothing about the view, so it costs a deferral too.
    async fn wait_for_clear_view(&self, camera: &CameraConfig) {
        let name = camera.name.as_str();
        let plan = &camera.patrol;
        let mut deferrals = 0;

        loop {
            let reason = match self.refresher.refresh().await {
                Ok(()) if !self.sees_objects(name) => return,
                Ok(()) => "objects tracked",
                Err(err) => {
                    warn!(camera = name, error = %err, "could not refresh view before next preset");
                    "view unknown"
                }
            };
            if deferrals >= plan.max_deferrals {
                warn!(camera = name, deferrals, reason, "continuing patrol anyway");
                return;
            }
            deferrals += 1;
            info!(camera = name, deferrals, reason, "deferring next preset");
            tokio::time::sleep(plan.dwell()).await;
        }
    }

    async fn restore_originals(&self, name: &str, originals: RestoreTargets) {
        let failures = self.safe_move.restore_missing(name, originals).await;
        if !failures.is_empty() {
            error!(
                camera = name,
                failed = ?failures.iter().map(|f| f.channel).collect::<Vec<_>>(),
                "could not restore detection after failed patrol"
            );
        }
    }

    fn sees_objects(&self, name: &str) -> bool {
        self.safe_move
            .store()
            .snapshot(name)
            .map(|s| s.sees_objects)
            .unwrap_or(false)
    }
}
