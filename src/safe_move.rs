//! Safe-Move Orchestrator.
//!
//! Moves one camera to one preset without the slew showing up as motion or
//! objects:
//!
//!   detect OFF → motion OFF → `preset_{name}` → slew → motion ON → detect ON
//!
//! Only switches that were on at entry are touched. A failure before the move
//! command rolls back what was already switched off; failures while restoring
//! are reported separately and leave a pending-restore marker on the camera.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::camera_state::{CameraStore, RestoreTargets, StateUpdate, Task};
use crate::correlator::Correlator;
use crate::error::BusError;
use crate::topics::{Channel, Toggle, Topics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStage {
    DisableDetect,
    DisableMotion,
    Move,
}

impl fmt::Display for MoveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MoveStage::DisableDetect => "disable detect",
            MoveStage::DisableMotion => "disable motion",
            MoveStage::Move => "move",
        })
    }
}

/// A switch that could not be turned back on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub channel: Channel,
    pub error: BusError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Moved and every switch restored.
    Moved,
    /// Moved, but some switches are still off.
    MovedRestoreFailed(Vec<RestoreFailure>),
    /// Never moved. `rollback` lists switches the rollback could not restore.
    Aborted {
        stage: MoveStage,
        cause: BusError,
        rollback: Vec<RestoreFailure>,
    },
    UnknownCamera,
}

impl MoveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MoveOutcome::Moved | MoveOutcome::MovedRestoreFailed(_))
    }

    pub fn restore_failures(&self) -> &[RestoreFailure] {
        match self {
            MoveOutcome::MovedRestoreFailed(failures) => failures,
            MoveOutcome::Aborted { rollback, .. } => rollback,
            _ => &[],
        }
    }
}

pub struct SafeMove {
    correlator: Arc<Correlator>,
    store: Arc<CameraStore>,
}

impl SafeMove {
    pub fn new(correlator: Arc<Correlator>, store: Arc<CameraStore>) -> Self {
        Self { correlator, store }
    }

    pub fn store(&self) -> &Arc<CameraStore> {
        &self.store
    }

    fn topics(&self) -> &Topics {
        self.correlator.connection().topics()
    }

    /// Run the full disable → move → restore sequence.
    pub async fn execute(&self, camera: &str, preset: &str, slew: Duration) -> MoveOutcome {
        let Some(entry) = self.store.snapshot(camera) else {
            error!(camera, "safe move requested for unconfigured camera");
            return MoveOutcome::UnknownCamera;
        };
        let targets = entry.restore_targets();

        if targets.detect {
            if let Err(cause) = self.switch(camera, Channel::Detect, Toggle::Off).await {
                self.recover_link(&cause).await;
                return self.abort(camera, MoveStage::DisableDetect, cause, Vec::new());
            }
        }

        if targets.motion {
            if let Err(cause) = self.switch(camera, Channel::Motion, Toggle::Off).await {
                self.recover_link(&cause).await;
                let rollback = self.restore_missing(camera, targets).await;
                return self.abort(camera, MoveStage::DisableMotion, cause, rollback);
            }
        }

        let topics = self.topics();
        let ptz_topic = topics.ptz(camera);
        if let Err(cause) = self
            .correlator
            .connection()
            .publish(&ptz_topic, &Topics::preset_command(preset))
            .await
        {
            warn!(camera, preset, topic = %ptz_topic, error = %cause, "preset command failed");
            self.recover_link(&cause).await;
            let rollback = self.restore_missing(camera, targets).await;
            return self.abort(camera, MoveStage::Move, cause, rollback);
        }
        self.store.set_task(camera, Task::Homing);
        info!(camera, preset, slew_secs = slew.as_secs_f64(), "moving to preset");

        tokio::time::sleep(slew).await;

        let failures = self.restore(camera, targets).await;
        if failures.is_empty() {
            info!(camera, preset, "move complete, detection restored");
            MoveOutcome::Moved
        } else {
            error!(
                camera,
                preset,
                failed = ?failures.iter().map(|f| f.channel).collect::<Vec<_>>(),
                "moved, but detection could not be restored"
            );
            MoveOutcome::MovedRestoreFailed(failures)
        }
    }

    /// Turn on the switches in `targets` (motion first; detect needs it).
    ///
    /// The camera's pending-restore marker absorbs `targets` and is cleared
    /// only once every switch it names is observed on.
    pub async fn restore(&self, camera: &str, targets: RestoreTargets) -> Vec<RestoreFailure> {
        let owed = self
            .store
            .snapshot(camera)
            .and_then(|s| s.pending_restore)
            .map_or(targets, |pending| pending.union(targets));

        let mut failures = Vec::new();
        for (wanted, channel) in [(targets.motion, Channel::Motion), (targets.detect, Channel::Detect)] {
            if !wanted {
                continue;
            }
            if let Err(error) = self.switch(camera, channel, Toggle::On).await {
                self.recover_link(&error).await;
                failures.push(RestoreFailure { channel, error });
            }
        }

        let settled = self.store.snapshot(camera).is_some_and(|s| owed.met_by(&s));
        let pending = if settled { None } else { Some(owed) };
        self.store.apply(camera, StateUpdate::pending_restore(pending));
        failures
    }

    /// Restore only the switches in `targets` that are currently observed off.
    pub async fn restore_missing(&self, camera: &str, targets: RestoreTargets) -> Vec<RestoreFailure> {
        let Some(state) = self.store.snapshot(camera) else {
            return Vec::new();
        };
        let missing = RestoreTargets {
            motion: targets.motion && !state.motion_enabled,
            detect: targets.detect && !state.detect_enabled,
        };
        self.restore(camera, missing).await
    }

    async fn switch(&self, camera: &str, channel: Channel, toggle: Toggle) -> Result<(), BusError> {
        let topics = self.topics();
        let result = self
            .correlator
            .send_and_expect(
                &topics.set(camera, channel),
                &topics.state(camera, channel),
                toggle.as_str(),
                toggle.as_str(),
            )
            .await;
        if let Err(err) = &result {
            warn!(camera, %channel, %toggle, topic = err.topic(), error = %err, "switch failed");
        }
        result
    }

    /// Replace a dead session and give the new one a chance to come up.
    async fn recover_link(&self, err: &BusError) {
        if err.connection_epoch().is_none() {
            return;
        }
        let conn = self.correlator.connection();
        conn.recover(err);
        if !conn.wait_connected(self.correlator.timeout()).await {
            warn!(topic = err.topic(), "bus still down after reconnect");
        }
    }

    fn abort(
        &self,
        camera: &str,
        stage: MoveStage,
        cause: BusError,
        rollback: Vec<RestoreFailure>,
    ) -> MoveOutcome {
        if rollback.is_empty() {
            warn!(camera, %stage, topic = cause.topic(), error = %cause, "safe move aborted");
        } else {
            error!(
                camera,
                %stage,
                topic = cause.topic(),
                error = %cause,
                failed = ?rollback.iter().map(|f| f.channel).collect::<Vec<_>>(),
                "safe move aborted and rollback incomplete"
            );
        }
        MoveOutcome::Aborted { stage, cause, rollback }
    }
}
