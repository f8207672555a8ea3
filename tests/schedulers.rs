mod common;

use std::time::Duration;

use common::{patrol_camera, rehome_camera, Harness, SAFE_MOVE_SEQUENCE};
use frigate_ptz::camera_state::Task;
use frigate_ptz::schedule::{spawn_camera, RunOutcome, SkipReason, Trigger};
use tokio::sync::watch;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_patrol_visits_route_in_order() {
    let cam = patrol_camera("cam1", &["p1", "p2", "p3"], 30);
    let h = Harness::new(&[cam.clone()]);

    let started = Instant::now();
    assert_eq!(h.patrol().run(&cam).await, RunOutcome::Completed);
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(2 * 30), "elapsed {:?}", elapsed);
    assert_eq!(h.nvr.moves("cam1"), vec!["preset_p1", "preset_p2", "preset_p3"]);
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Idle);
    assert_eq!(h.nvr.switches("cam1"), (true, true));
}

#[tokio::test(start_paused = true)]
async fn test_patrol_not_started_while_objects_tracked() {
    let cam = patrol_camera("cam1", &["p1", "p2"], 30);
    let h = Harness::new(&[cam.clone()]);
    h.nvr.set_objects("cam1", &["person"]);

    assert_eq!(
        h.patrol().run(&cam).await,
        RunOutcome::Skipped(SkipReason::ObjectsDetected)
    );
    assert!(h.nvr.moves("cam1").is_empty());
    assert!(h.nvr.commands("cam1").is_empty());
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_patrol_skips_busy_camera() {
    let cam = patrol_camera("cam1", &["p1"], 30);
    let h = Harness::new(&[cam.clone()]);
    assert!(h.store.begin_task("cam1", Task::Homing));

    assert_eq!(
        h.patrol().run(&cam).await,
        RunOutcome::Skipped(SkipReason::Busy(Task::Homing))
    );
    assert!(h.nvr.log().is_empty());
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Homing);
}

#[tokio::test(start_paused = true)]
async fn test_patrol_defers_while_objects_appear_mid_route() {
    let cam = patrol_camera("cam1", &["p1", "p2"], 10);
    let h = Harness::new(&[cam.clone()]);

    let nvr = h.nvr.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        nvr.set_objects("cam1", &["car"]);
        tokio::time::sleep(Duration::from_secs(22)).await;
        nvr.set_objects("cam1", &[]);
    });

    let started = Instant::now();
    assert_eq!(h.patrol().run(&cam).await, RunOutcome::Completed);

    // Two deferrals at 15s and 25s; the view is clear again at 35s.
    assert!(started.elapsed() >= Duration::from_secs(35));
    assert_eq!(h.nvr.moves("cam1"), vec!["preset_p1", "preset_p2"]);
    assert_eq!(h.nvr.pokes(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_patrol_continues_after_max_deferrals() {
    let mut cam = patrol_camera("cam1", &["p1", "p2"], 10);
    cam.patrol.max_deferrals = 2;
    let h = Harness::new(&[cam.clone()]);

    let nvr = h.nvr.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        nvr.set_objects("cam1", &["dog"]);
    });

    assert_eq!(h.patrol().run(&cam).await, RunOutcome::Completed);
    assert_eq!(h.nvr.moves("cam1"), vec!["preset_p1", "preset_p2"]);
    assert_eq!(h.nvr.pokes(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_mid_route_counts_as_deferral() {
    let cam = patrol_camera("cam1", &["p1", "p2"], 10);
    let h = Harness::new(&[cam.clone()]);

    let nvr = h.nvr.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        nvr.silence("frigate/onConnect", "*");
        tokio::time::sleep(Duration::from_secs(17)).await;
        nvr.unsilence_all();
    });

    let started = Instant::now();
    assert_eq!(h.patrol().run(&cam).await, RunOutcome::Completed);

    // The refresh at 15s times out at 20s; p2 waits for the next one at 30s.
    assert!(started.elapsed() >= Duration::from_secs(30), "elapsed {:?}", started.elapsed());
    assert_eq!(h.nvr.moves("cam1"), vec!["preset_p1", "preset_p2"]);
    assert_eq!(h.conn.epoch(), 2);
    assert_eq!(h.nvr.switches("cam1"), (true, true));
}

#[tokio::test(start_paused = true)]
async fn test_patrol_leg_failure_ends_run() {
    let cam = patrol_camera("cam1", &["p1", "p2", "p3"], 30);
    let h = Harness::new(&[cam.clone()]);

    let nvr = h.nvr.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        nvr.silence("frigate/cam1/detect/set", "OFF");
    });

    assert_eq!(h.patrol().run(&cam).await, RunOutcome::Failed);
    assert_eq!(h.nvr.moves("cam1"), vec!["preset_p1"]);

    let state = h.store.snapshot("cam1").unwrap();
    assert_eq!(state.task, Task::Idle);
    assert!(state.motion_enabled);
    assert!(state.detect_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_rehome_moves_idle_camera_home() {
    let cam = rehome_camera("cam1", "home");
    let h = Harness::new(&[cam.clone()]);

    assert_eq!(h.rehome().run(&cam).await, RunOutcome::Completed);
    assert_eq!(h.nvr.moves("cam1"), vec!["preset_home"]);
    assert_eq!(h.nvr.pokes(), 1);
    assert_eq!(h.nvr.switches("cam1"), (true, true));
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_rehome_never_interrupts_patrol() {
    let cam = rehome_camera("cam1", "home");
    let h = Harness::new(&[cam.clone()]);
    assert!(h.store.begin_task("cam1", Task::Patrolling));

    assert_eq!(
        h.rehome().run(&cam).await,
        RunOutcome::Skipped(SkipReason::Busy(Task::Patrolling))
    );
    assert!(h.nvr.moves("cam1").is_empty());
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Patrolling);
}

#[tokio::test(start_paused = true)]
async fn test_rehome_skipped_while_objects_tracked() {
    let cam = rehome_camera("cam1", "home");
    let h = Harness::new(&[cam.clone()]);
    h.nvr.set_objects("cam1", &["person"]);

    assert_eq!(
        h.rehome().run(&cam).await,
        RunOutcome::Skipped(SkipReason::ObjectsDetected)
    );
    assert!(h.nvr.commands("cam1").is_empty());
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_rehome_fails_when_refresh_times_out() {
    let cam = rehome_camera("cam1", "home");
    let h = Harness::new(&[cam.clone()]);
    h.nvr.silence("frigate/onConnect", "*");

    assert_eq!(h.rehome().run(&cam).await, RunOutcome::Failed);
    assert!(h.nvr.commands("cam1").is_empty());
    assert_eq!(h.conn.epoch(), 2);
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_worker_serializes_patrol_and_rehome() {
    let mut cam = patrol_camera("cam1", &["p1", "p2"], 10);
    cam.patrol.interval_secs = 100;
    cam.rehome.enabled = true;
    cam.rehome.interval_secs = 100;
    cam.rehome.preset = "home".into();
    let h = Harness::new(&[cam.clone()]);

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn_camera(cam, h.operations(), stop_rx);

    tokio::time::sleep(Duration::from_secs(150)).await;

    let moves = h.nvr.moves("cam1");
    assert!(
        moves == ["preset_p1", "preset_p2", "preset_home"] || moves == ["preset_home", "preset_p1", "preset_p2"],
        "moves interleaved: {:?}",
        moves
    );

    // Every move is bracketed by its own full disable/restore sequence.
    let commands = h.nvr.commands("cam1");
    assert_eq!(commands.len(), 15);
    for chunk in commands.chunks(5) {
        assert_eq!(chunk[0], SAFE_MOVE_SEQUENCE[0]);
        assert_eq!(chunk[1], SAFE_MOVE_SEQUENCE[1]);
        assert!(chunk[2].starts_with("ptz preset_"));
        assert_eq!(chunk[3], SAFE_MOVE_SEQUENCE[2]);
        assert_eq!(chunk[4], SAFE_MOVE_SEQUENCE[3]);
    }
    assert_eq!(h.store.snapshot("cam1").unwrap().task, Task::Idle);

    stop_tx.send(true).unwrap();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_runs_on_worker() {
    let cam = rehome_camera("cam1", "home");
    let h = Harness::new(&[cam.clone()]);

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn_camera(cam, h.operations(), stop_rx);

    assert!(handle.trigger(Trigger::Rehome));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.nvr.moves("cam1"), vec!["preset_home"]);

    stop_tx.send(true).unwrap();
    handle.join().await;
}
