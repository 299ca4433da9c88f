use super::*;
use crate::settings::MemorySettings;
use crate::worker_bridge::testing::{init_payload, settle_until, Event, FakeLauncher, Reply};
use serde_json::json;

fn supervisor(launcher: &FakeLauncher) -> IdleSupervisor {
    IdleSupervisor::new(
        Arc::new(launcher.clone()),
        Arc::new(MemorySettings::with(&[(API_KEY, "key")])),
    )
}

#[tokio::test(start_paused = true)]
async fn test_start_sends_init_then_idle() {
    let launcher = FakeLauncher::healthy();
    let idle = supervisor(&launcher);

    assert!(idle.start(480, "Spacewar").await.unwrap());
    settle_until(|| launcher.requests_of("IDLE").len() == 1).await;

    let requests: Vec<String> = launcher
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Request { request, .. } => request["type"].as_str().map(str::to_string),
            _ => None,
        })
        .collect();
    assert_eq!(requests, vec!["INIT", "IDLE"]);
    assert_eq!(launcher.requests_of("INIT")[0].1["apiKey"], "key");

    let list = idle.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].app_id, 480);
    assert_eq!(list[0].name, "Spacewar");
}

#[tokio::test(start_paused = true)]
async fn test_start_is_noop_when_already_idling() {
    let launcher = FakeLauncher::healthy();
    let idle = supervisor(&launcher);

    assert!(idle.start(480, "Spacewar").await.unwrap());
    assert!(!idle.start(480, "Spacewar").await.unwrap());
    assert_eq!(launcher.spawn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_closes_input_and_removes_entry() {
    let launcher = FakeLauncher::healthy();
    let idle = supervisor(&launcher);
    idle.start(480, "Spacewar").await.unwrap();
    settle_until(|| launcher.requests_of("IDLE").len() == 1).await;

    assert!(idle.stop(480).await);
    assert!(!idle.is_idling(480));
    assert!(!idle.stop(480).await);
    let events = launcher.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Closed { instance: 0 } | Event::Killed { instance: 0 })));
}

#[tokio::test(start_paused = true)]
async fn test_exited_worker_removes_itself() {
    let launcher = FakeLauncher::new(|_, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(480)),
        _ => Reply::Exit,
    });
    let idle = supervisor(&launcher);

    idle.start(480, "Spacewar").await.unwrap();
    settle_until(|| !idle.is_idling(480)).await;
    assert!(idle.list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_exit_is_not_removed_by_old_watcher() {
    let launcher = FakeLauncher::new(|instance, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(480)),
        _ if instance == 0 => Reply::Exit,
        _ => Reply::Ok(json!({"idling": true})),
    });
    let idle = supervisor(&launcher);

    idle.start(480, "Spacewar").await.unwrap();
    settle_until(|| !idle.is_idling(480)).await;

    assert!(idle.start(480, "Spacewar").await.unwrap());
    settle_until(|| launcher.requests_of("IDLE").len() == 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(idle.is_idling(480));
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_stops_every_session() {
    let launcher = FakeLauncher::healthy();
    let idle = supervisor(&launcher);
    for app_id in [10, 20, 30] {
        idle.start(app_id, "game").await.unwrap();
    }
    assert_eq!(idle.list().iter().map(|s| s.app_id).collect::<Vec<_>>(), vec![10, 20, 30]);

    assert_eq!(idle.stop_all().await, 3);
    assert!(idle.list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_leaves_no_entry() {
    struct Failing;

    #[async_trait::async_trait]
    impl WorkerLauncher for Failing {
        async fn launch(&self, _app_id: u32) -> Result<super::super::launcher::WorkerIo, BridgeError> {
            Err(BridgeError::Launch("no binary".to_string()))
        }
    }

    let idle = IdleSupervisor::new(Arc::new(Failing), Arc::new(MemorySettings::new()));
    assert_eq!(
        idle.start(480, "Spacewar").await,
        Err(BridgeError::Launch("no binary".to_string()))
    );
    assert!(!idle.is_idling(480));
}
