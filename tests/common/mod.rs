#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use frigate_ptz::camera_state::CameraStore;
use frigate_ptz::config::CameraConfig;
use frigate_ptz::correlator::{Correlator, DEFAULT_TIMEOUT};
use frigate_ptz::health::StateRefresher;
use frigate_ptz::patrol::Patrol;
use frigate_ptz::rehome::Rehome;
use frigate_ptz::safe_move::SafeMove;
use frigate_ptz::schedule::Operations;
use frigate_ptz::topics::Topics;
use frigate_ptz::transport::{ConnectionManager, LoopbackPeer, Outbound};
use serde_json::json;

#[derive(Debug, Clone)]
struct SimCamera {
    motion: bool,
    detect: bool,
    objects: Vec<String>,
}

#[derive(Default)]
struct NvrState {
    cameras: HashMap<String, SimCamera>,
    /// (topic, payload) pairs the NVR never answers; payload `*` matches any
    silent: HashSet<(String, String)>,
}

/// Scripted stand-in for Frigate on the far end of a loopback transport.
///
/// Echoes `set` commands on the matching `state` topic, refuses detection
/// while motion is off (echoing `OFF`), and answers `onConnect` pokes with a
/// `camera_activity` snapshot.
#[derive(Clone)]
pub struct FakeNvr {
    state: Arc<Mutex<NvrState>>,
    log: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeNvr {
    pub fn spawn(mut peer: LoopbackPeer, cameras: &[CameraConfig]) -> Self {
        let mut state = NvrState::default();
        for cam in cameras {
            state.cameras.insert(
                cam.name.clone(),
                SimCamera {
                    motion: cam.motion,
                    detect: cam.detect,
                    objects: Vec::new(),
                },
            );
        }
        let nvr = Self {
            state: Arc::new(Mutex::new(state)),
            log: Arc::new(Mutex::new(Vec::new())),
        };

        let this = nvr.clone();
        tokio::spawn(async move {
            while let Some(out) = peer.recv().await {
                if let Outbound::Publish { topic, payload } = out {
                    this.log.lock().unwrap().push((topic.clone(), payload.clone()));
                    if let Some((reply_topic, reply)) = this.respond(&topic, &payload) {
                        peer.inject(&reply_topic, &reply);
                    }
                }
            }
        });
        nvr
    }

    fn respond(&self, topic: &str, payload: &str) -> Option<(String, String)> {
        let mut state = self.state.lock().unwrap();
        if state.silent.contains(&(topic.to_string(), payload.to_string()))
            || state.silent.contains(&(topic.to_string(), "*".to_string()))
        {
            return None;
        }

        if topic == "frigate/onConnect" {
            let report: serde_json::Map<String, serde_json::Value> = state
                .cameras
                .iter()
                .map(|(name, cam)| {
                    (
                        name.clone(),
                        json!({
                            "motion": !cam.objects.is_empty(),
                            "objects": cam.objects,
                            "config": {
                                "detect": cam.detect,
                                "snapshots": true,
                                "record": true,
                                "audio": false,
                                "autotracking": false
                            }
                        }),
                    )
                })
                .collect();
            return Some(("frigate/camera_activity".into(), serde_json::Value::Object(report).to_string()));
        }

        let parts: Vec<&str> = topic.split('/').collect();
        if let ["frigate", camera, channel, "set"] = parts.as_slice() {
            let cam = state.cameras.get_mut(*camera)?;
            let on = payload == "ON";
            let value = match *channel {
                "motion" => {
                    cam.motion = on;
                    if !on {
                        cam.detect = false;
                    }
                    cam.motion
                }
                "detect" => {
                    cam.detect = on && cam.motion;
                    cam.detect
                }
                _ => return None,
            };
            let token = if value { "ON" } else { "OFF" };
            return Some((format!("frigate/{}/{}/state", camera, channel), token.to_string()));
        }

        None
    }

    pub fn silence(&self, topic: &str, payload: &str) {
        self.state
            .lock()
            .unwrap()
            .silent
            .insert((topic.to_string(), payload.to_string()));
    }

    pub fn unsilence_all(&self) {
        self.state.lock().unwrap().silent.clear();
    }

    pub fn set_objects(&self, camera: &str, objects: &[&str]) {
        if let Some(cam) = self.state.lock().unwrap().cameras.get_mut(camera) {
            cam.objects = objects.iter().map(|s| s.to_string()).collect();
        }
    }

    pub fn switches(&self, camera: &str) -> (bool, bool) {
        let state = self.state.lock().unwrap();
        let cam = &state.cameras[camera];
        (cam.motion, cam.detect)
    }

    /// Every publish received, in order.
    pub fn log(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    /// Publishes for `camera`'s set and ptz topics, without pokes.
    pub fn commands(&self, camera: &str) -> Vec<String> {
        let prefix = format!("frigate/{}/", camera);
        self.log()
            .into_iter()
            .filter_map(|(topic, payload)| {
                let rest = topic.strip_prefix(&prefix)?;
                Some(format!("{} {}", rest, payload))
            })
            .collect()
    }

    pub fn moves(&self, camera: &str) -> Vec<String> {
        let ptz = format!("frigate/{}/ptz", camera);
        self.log()
            .into_iter()
            .filter(|(topic, _)| *topic == ptz)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn pokes(&self) -> usize {
        self.log().iter().filter(|(topic, _)| topic == "frigate/onConnect").count()
    }
}

pub struct Harness {
    pub conn: Arc<ConnectionManager>,
    pub store: Arc<CameraStore>,
    pub refresher: Arc<StateRefresher>,
    pub safe_move: Arc<SafeMove>,
    pub nvr: FakeNvr,
}

impl Harness {
    pub fn new(cameras: &[CameraConfig]) -> Self {
        let store = Arc::new(CameraStore::new(cameras));
        let (conn, peer) = ConnectionManager::loopback(Topics::default(), Arc::clone(&store));
        conn.connect();
        let nvr = FakeNvr::spawn(peer, cameras);

        let correlator = Arc::new(Correlator::new(Arc::clone(&conn), DEFAULT_TIMEOUT));
        let refresher = Arc::new(StateRefresher::new(Arc::clone(&correlator)));
        let safe_move = Arc::new(SafeMove::new(correlator, Arc::clone(&store)));

        Self {
            conn,
            store,
            refresher,
            safe_move,
            nvr,
        }
    }

    pub fn patrol(&self) -> Patrol {
        Patrol::new(Arc::clone(&self.safe_move), Arc::clone(&self.refresher))
    }

    pub fn rehome(&self) -> Rehome {
        Rehome::new(Arc::clone(&self.safe_move), Arc::clone(&self.refresher))
    }

    pub fn operations(&self) -> Arc<Operations> {
        Arc::new(Operations {
            patrol: self.patrol(),
            rehome: self.rehome(),
            safe_move: Arc::clone(&self.safe_move),
        })
    }
}

pub fn patrol_camera(name: &str, route: &[&str], dwell_secs: u64) -> CameraConfig {
    let mut cam = CameraConfig::new(name);
    cam.patrol.enabled = true;
    cam.patrol.route = route.iter().map(|s| s.to_string()).collect();
    cam.patrol.dwell_secs = dwell_secs;
    cam.patrol.slew_secs = 5;
    cam
}

pub fn rehome_camera(name: &str, preset: &str) -> CameraConfig {
    let mut cam = CameraConfig::new(name);
    cam.rehome.enabled = true;
    cam.rehome.preset = preset.to_string();
    cam.rehome.slew_secs = 5;
    cam
}

pub const SAFE_MOVE_SEQUENCE: [&str; 4] = ["detect/set OFF", "motion/set OFF", "motion/set ON", "detect/set ON"];
