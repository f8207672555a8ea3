//! Coordinator wiring.
//!
//! Architecture:
//!   per-camera timers (patrol, rehome) → camera worker
//!     → Patrol / Rehome → SafeMove → Correlator → ConnectionManager → broker
//!   broker → ConnectionManager::on_message → CameraStore → gating reads
//!   health-check poke → StateRefresher → pending-restore triggers

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::camera_state::CameraStore;
use crate::config::AppConfig;
use crate::correlator::Correlator;
use crate::health::StateRefresher;
use crate::patrol::Patrol;
use crate::rehome::Rehome;
use crate::safe_move::SafeMove;
use crate::schedule::{spawn_camera, CameraHandle, Operations, Trigger};
use crate::topics::Topics;
use crate::transport::ConnectionManager;

/// A running coordinator that can be stopped via the stop signal.
pub struct CoordinatorHandle {
    conn: Arc<ConnectionManager>,
    refresher: Arc<StateRefresher>,
    cameras: Vec<CameraHandle>,
    health: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

impl CoordinatorHandle {
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    pub fn store(&self) -> &Arc<CameraStore> {
        self.conn.store()
    }

    pub fn camera(&self, name: &str) -> Option<&CameraHandle> {
        self.cameras.iter().find(|c| c.name == name)
    }

    /// Force an activity refresh now.
    pub async fn refresh(&self) -> bool {
        self.refresher.refresh().await.is_ok()
    }

    /// Signal every task to stop, wait for in-flight operations, then close
    /// the bus session.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.health.await {
            warn!(error = %e, "health check task ended abnormally");
        }
        for camera in self.cameras {
            camera.join().await;
        }
        self.conn.shutdown().await;
        info!("coordinator stopped");
    }
}

/// Start workers, timers and the health check on an existing connection.
pub fn start(cfg: &AppConfig, conn: Arc<ConnectionManager>) -> CoordinatorHandle {
    let store = Arc::clone(conn.store());
    let correlator = Arc::new(Correlator::new(Arc::clone(&conn), cfg.timing.response_timeout()));
    let refresher = Arc::new(StateRefresher::new(Arc::clone(&correlator)));
    let safe_move = Arc::new(SafeMove::new(Arc::clone(&correlator), Arc::clone(&store)));
    let ops = Arc::new(Operations {
        patrol: Patrol::new(Arc::clone(&safe_move), Arc::clone(&refresher)),
        rehome: Rehome::new(Arc::clone(&safe_move), Arc::clone(&refresher)),
        safe_move,
    });

    let (stop_tx, stop_rx) = watch::channel(false);

    let cameras: Vec<CameraHandle> = cfg
        .cameras
        .iter()
        .map(|camera| spawn_camera(camera.clone(), Arc::clone(&ops), stop_rx.clone()))
        .collect();

    let senders: HashMap<String, mpsc::Sender<Trigger>> =
        cameras.iter().map(|c| (c.name.clone(), c.sender())).collect();
    let health_refresher = Arc::clone(&refresher);
    let health_store = Arc::clone(&store);
    let interval = cfg.timing.poke_interval();
    let health = tokio::spawn(async move {
        health_refresher
            .run_health_check(interval, stop_rx, || {
                for name in health_store.pending_restores() {
                    if let Some(tx) = senders.get(&name) {
                        let _ = tx.try_send(Trigger::Restore);
                    }
                }
            })
            .await;
    });

    info!(cameras = cameras.len(), poke_secs = interval.as_secs(), "coordinator started");
    CoordinatorHandle {
        conn,
        refresher,
        cameras,
        health,
        stop_tx,
    }
}

/// Connect to the broker and run until Ctrl-C.
pub async fn run(cfg: AppConfig) -> Result<()> {
    let store = Arc::new(CameraStore::new(&cfg.cameras));
    let topics = Topics::new(cfg.mqtt.topic_prefix.clone());
    let conn = ConnectionManager::mqtt(cfg.mqtt.clone(), topics, store);

    conn.connect();
    if conn.wait_connected(cfg.timing.connect_timeout()).await {
        info!(host = %cfg.mqtt.host, port = cfg.mqtt.port, "broker connected");
    } else {
        warn!(
            host = %cfg.mqtt.host,
            port = cfg.mqtt.port,
            "broker not reachable yet, the health check will keep reconnecting"
        );
    }

    let handle = start(&cfg, conn);
    if !handle.refresh().await {
        warn!("initial activity refresh failed");
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    handle.stop().await;
    Ok(())
}
