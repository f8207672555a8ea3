//! Camera State Store: what the NVR last told us about each camera.
//!
//! Motion/detect flags are recorded as observed on the bus, never as
//! commanded. The store is the only owner of per-camera state; every mutation
//! goes through [`CameraStore::apply`] or the [`CameraStore::begin_task`]
//! compare-and-set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::CameraConfig;
use crate::error::ActivityError;
use crate::topics::{Channel, Toggle};

/// Mutually exclusive activity of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task {
    #[default]
    Idle,
    Homing,
    Patrolling,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Task::Idle => "normal",
            Task::Homing => "homing",
            Task::Patrolling => "patrolling",
        })
    }
}

/// Motion/detect values to put back after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreTargets {
    pub motion: bool,
    pub detect: bool,
}

impl RestoreTargets {
    pub fn union(self, other: RestoreTargets) -> RestoreTargets {
        RestoreTargets {
            motion: self.motion || other.motion,
            detect: self.detect || other.detect,
        }
    }

    /// Every wanted switch is observed on in `state`.
    pub fn met_by(&self, state: &CameraState) -> bool {
        (!self.motion || state.motion_enabled) && (!self.detect || state.detect_enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraState {
    pub name: String,
    pub motion_enabled: bool,
    pub detect_enabled: bool,
    pub sees_objects: bool,
    pub task: Task,
    /// Last time the bus reported anything for this camera
    pub synced_at: Option<DateTime<Utc>>,
    /// Set when a restore after a move could not be confirmed
    pub pending_restore: Option<RestoreTargets>,
}

impl CameraState {
    /// Seed from the configured steady state until the NVR reports otherwise.
    pub fn seeded(cfg: &CameraConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            motion_enabled: cfg.motion,
            detect_enabled: cfg.detect,
            sees_objects: false,
            task: Task::Idle,
            synced_at: None,
            pending_restore: None,
        }
    }

    /// Frigate refuses detection without motion; seeing it means the feed is off.
    pub fn detect_without_motion(&self) -> bool {
        self.detect_enabled && !self.motion_enabled
    }

    /// What a move must leave on: the observed switches plus anything an
    /// earlier failed restore still owes.
    pub fn restore_targets(&self) -> RestoreTargets {
        let observed = RestoreTargets {
            motion: self.motion_enabled,
            detect: self.detect_enabled,
        };
        self.pending_restore.map_or(observed, |owed| observed.union(owed))
    }
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub motion_enabled: Option<bool>,
    pub detect_enabled: Option<bool>,
    pub sees_objects: Option<bool>,
    pub task: Option<Task>,
    pub pending_restore: Option<Option<RestoreTargets>>,
}

impl StateUpdate {
    pub fn channel(channel: Channel, toggle: Toggle) -> Self {
        match channel {
            Channel::Motion => Self {
                motion_enabled: Some(toggle.is_on()),
                ..Default::default()
            },
            Channel::Detect => Self {
                detect_enabled: Some(toggle.is_on()),
                ..Default::default()
            },
        }
    }

    pub fn task(task: Task) -> Self {
        Self {
            task: Some(task),
            ..Default::default()
        }
    }

    pub fn pending_restore(targets: Option<RestoreTargets>) -> Self {
        Self {
            pending_restore: Some(targets),
            ..Default::default()
        }
    }

    fn is_observation(&self) -> bool {
        self.motion_enabled.is_some() || self.detect_enabled.is_some() || self.sees_objects.is_some()
    }

    /// Merge into `state`, returning whether any value changed.
    fn merge_into(&self, state: &mut CameraState) -> bool {
        let mut changed = false;
        changed |= merge(&mut state.motion_enabled, self.motion_enabled);
        changed |= merge(&mut state.detect_enabled, self.detect_enabled);
        changed |= merge(&mut state.sees_objects, self.sees_objects);
        changed |= merge(&mut state.task, self.task);
        changed |= merge(&mut state.pending_restore, self.pending_restore);
        if self.is_observation() {
            state.synced_at = Some(Utc::now());
        }
        changed
    }
}

fn merge<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) if *slot != v => {
            *slot = v;
            true
        }
        _ => false,
    }
}

// ─── Activity feed ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CameraActivity {
    pub motion: bool,
    pub objects: Vec<String>,
    pub config: ActivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityConfig {
    pub detect: bool,
    #[serde(default)]
    pub snapshots: bool,
    #[serde(default)]
    pub record: bool,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub autotracking: bool,
}

/// Parse `{root}/camera_activity`: camera name → activity.
pub fn parse_activity(payload: &str) -> Result<HashMap<String, CameraActivity>, ActivityError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| ActivityError::Malformed(e.to_string()))?;

    match value.as_object() {
        Some(map) if map.is_empty() => return Err(ActivityError::NotReady),
        Some(_) => {}
        None => return Err(ActivityError::Malformed("expected a JSON object".into())),
    }

    serde_json::from_value(value).map_err(|e| ActivityError::Malformed(e.to_string()))
}

impl From<&CameraActivity> for StateUpdate {
    fn from(activity: &CameraActivity) -> Self {
        Self {
            detect_enabled: Some(activity.config.detect),
            sees_objects: Some(!activity.objects.is_empty()),
            ..Default::default()
        }
    }
}

// ─── Store ──────────────────────────────────────────────────────────────────

pub struct CameraStore {
    cameras: Mutex<HashMap<String, CameraState>>,
}

impl CameraStore {
    pub fn new<'a>(cameras: impl IntoIterator<Item = &'a CameraConfig>) -> Self {
        let cameras = cameras
            .into_iter()
            .map(|cfg| (cfg.name.clone(), CameraState::seeded(cfg)))
            .collect();
        Self {
            cameras: Mutex::new(cameras),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CameraState>> {
        // State is plain data; a panic mid-merge cannot leave it inconsistent.
        self.cameras.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot(&self, camera: &str) -> Option<CameraState> {
        self.lock().get(camera).cloned()
    }

    /// Merge `update` into `camera`. Returns `true` only if a value changed.
    pub fn apply(&self, camera: &str, update: StateUpdate) -> bool {
        let mut cameras = self.lock();
        let Some(state) = cameras.get_mut(camera) else {
            debug!(camera, "ignoring update for unconfigured camera");
            return false;
        };

        let changed = update.merge_into(state);
        if changed {
            debug!(
                camera,
                motion = state.motion_enabled,
                detect = state.detect_enabled,
                sees_objects = state.sees_objects,
                task = %state.task,
                "camera state changed"
            );
        }
        if state.detect_without_motion() {
            warn!(camera, "NVR reports detection enabled while motion is disabled");
        }
        changed
    }

    /// Claim `camera` for `task`; succeeds only while it is idle.
    pub fn begin_task(&self, camera: &str, task: Task) -> bool {
        let mut cameras = self.lock();
        match cameras.get_mut(camera) {
            Some(state) if state.task == Task::Idle => {
                state.task = task;
                true
            }
            _ => false,
        }
    }

    pub fn set_task(&self, camera: &str, task: Task) {
        self.apply(camera, StateUpdate::task(task));
    }

    /// Apply a full activity report; returns the cameras whose state changed.
    pub fn apply_activity(&self, payload: &str) -> Result<Vec<String>, ActivityError> {
        let report = parse_activity(payload)?;
        let mut changed = Vec::new();
        for (camera, activity) in &report {
            if self.apply(camera, StateUpdate::from(activity)) {
                changed.push(camera.clone());
            }
        }
        Ok(changed)
    }

    /// Apply an `ON`/`OFF` token from a state channel.
    pub fn apply_token(&self, camera: &str, channel: Channel, payload: &str) -> Result<bool, String> {
        let toggle: Toggle = payload.parse()?;
        Ok(self.apply(camera, StateUpdate::channel(channel, toggle)))
    }

    pub fn pending_restores(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .lock()
            .values()
            .filter(|s| s.pending_restore.is_some())
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }
}
