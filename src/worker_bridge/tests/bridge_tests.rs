use super::*;
use crate::settings::MemorySettings;
use crate::worker_bridge::testing::{init_payload, settle_until, Event, FakeLauncher, Reply};
use serde_json::json;
use std::time::Duration;

fn bridge_with(launcher: &FakeLauncher, settings: MemorySettings) -> Arc<WorkerBridge> {
    Arc::new(WorkerBridge::new(
        Arc::new(launcher.clone()),
        Arc::new(settings),
        BridgeTimings::default(),
    ))
}

fn bridge(launcher: &FakeLauncher) -> Arc<WorkerBridge> {
    bridge_with(launcher, MemorySettings::new())
}

fn confirmed() -> Value {
    json!({"verified": true, "expected": true, "attempts": 1})
}

#[tokio::test(start_paused = true)]
async fn test_ensure_twice_spawns_once() {
    let launcher = FakeLauncher::healthy();
    let bridge = bridge(&launcher);

    bridge.ensure(480).await.unwrap();
    bridge.ensure(480).await.unwrap();

    assert_eq!(launcher.spawn_count(), 1);
    assert_eq!(launcher.requests_of("INIT").len(), 1);
    assert_eq!(bridge.current_app_id(), Some(480));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ensures_spawn_once() {
    let launcher = FakeLauncher::healthy();
    let bridge = bridge(&launcher);

    let a = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.ensure(480).await }
    });
    let b = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.ensure(480).await }
    });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(launcher.spawn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_identity_change_kills_before_respawn() {
    let launcher = FakeLauncher::new(|_, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(request["appId"].as_u64().unwrap_or(0))),
        _ => Reply::Ignore,
    });
    let bridge = bridge(&launcher);
    bridge.ensure(10).await.unwrap();

    let pending = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.send(&WorkerRequest::GetAchievements).await }
    });
    settle_until(|| launcher.requests_of("GET_ACHIEVEMENTS").len() == 1).await;

    bridge.ensure(20).await.unwrap();

    assert_eq!(pending.await.unwrap(), Err(BridgeError::NotRunning));
    let events = launcher.events();
    let closed_first = events
        .iter()
        .position(|e| *e == Event::Closed { instance: 0 })
        .expect("first worker saw EOF");
    let second_spawn = events
        .iter()
        .position(|e| *e == Event::Spawned { instance: 1, app_id: 20 })
        .expect("second worker spawned");
    assert!(closed_first < second_spawn);
    assert_eq!(bridge.current_app_id(), Some(20));
}

#[tokio::test(start_paused = true)]
async fn test_api_key_change_forces_respawn() {
    let launcher = FakeLauncher::healthy();
    let settings = Arc::new(MemorySettings::new());
    let bridge = WorkerBridge::new(
        Arc::new(launcher.clone()),
        Arc::clone(&settings) as Arc<dyn SettingsProvider>,
        BridgeTimings::default(),
    );

    bridge.ensure(480).await.unwrap();
    settings.set(API_KEY, "secret").unwrap();
    bridge.ensure(480).await.unwrap();

    assert_eq!(launcher.spawn_count(), 2);
    let inits = launcher.requests_of("INIT");
    assert!(inits[0].1.get("apiKey").is_none());
    assert_eq!(inits[1].1["apiKey"], "secret");
    assert_eq!(
        bridge.identity_for(480),
        SessionIdentity {
            app_id: 480,
            api_key: Some("secret".to_string())
        }
    );
    assert_eq!(bridge.current_app_id(), Some(480));
    assert!(launcher.events().contains(&Event::Closed { instance: 0 }));
}

#[tokio::test(start_paused = true)]
async fn test_successful_init_is_not_killed_by_its_timer() {
    let launcher = FakeLauncher::healthy();
    let bridge = bridge(&launcher);
    bridge.ensure(480).await.unwrap();

    tokio::time::sleep(BridgeTimings::default().init_timeout() + Duration::from_secs(5)).await;

    assert!(bridge.send(&WorkerRequest::GetStats).await.is_ok());
    assert_eq!(launcher.spawn_count(), 1);
    assert!(!launcher
        .events()
        .iter()
        .any(|e| matches!(e, Event::Killed { .. } | Event::Closed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_init_timeout_terminates_worker() {
    let launcher = FakeLauncher::new(|_, _| Reply::Ignore);
    let bridge = bridge(&launcher);

    let result = bridge.ensure(480).await;

    assert_eq!(
        result,
        Err(BridgeError::Timeout(BridgeTimings::default().init_timeout()))
    );
    assert!(launcher.events().contains(&Event::Killed { instance: 0 }));
    assert_eq!(bridge.current_app_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_init_failure_is_propagated() {
    let launcher = FakeLauncher::new(|_, _| Reply::Err("no client running".to_string()));
    let bridge = bridge(&launcher);

    let result = bridge.ensure(480).await;
    assert_eq!(result, Err(BridgeError::Worker("no client running".to_string())));
    assert_eq!(bridge.current_app_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_sentinel_respawns_and_retries_once() {
    let launcher = FakeLauncher::new(|instance, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(480)),
        Some("SET_ACHIEVEMENT") if instance == 0 => Reply::Err("stats not received".to_string()),
        _ => Reply::Ok(confirmed()),
    });
    let bridge = bridge(&launcher);

    let outcome = bridge.set_achievement(480, "ACH_WIN", true).await.unwrap();

    assert!(outcome.confirmed());
    let sets = launcher.requests_of("SET_ACHIEVEMENT");
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].0, 0);
    assert_eq!(sets[0].1["fastFail"], true);
    assert_eq!(sets[1].0, 1);
    assert_eq!(sets[1].1["fastFail"], false);
    assert_eq!(launcher.spawn_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sentinel_retry_happens_only_once() {
    let launcher = FakeLauncher::new(|_, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(480)),
        _ => Reply::Err("stats not received".to_string()),
    });
    let bridge = bridge(&launcher);

    let result = bridge.set_achievement(480, "ACH_WIN", true).await;

    assert_eq!(result, Err(BridgeError::StatsNotReady));
    assert_eq!(launcher.requests_of("SET_ACHIEVEMENT").len(), 2);
    assert_eq!(launcher.spawn_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_other_write_failures_propagate_verbatim() {
    let launcher = FakeLauncher::new(|_, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(480)),
        _ => Reply::Err("write rejected after 20 attempts: nope".to_string()),
    });
    let bridge = bridge(&launcher);

    let result = bridge.set_achievement(480, "ACH_WIN", true).await;

    assert_eq!(
        result,
        Err(BridgeError::Worker("write rejected after 20 attempts: nope".to_string()))
    );
    assert_eq!(launcher.requests_of("SET_ACHIEVEMENT").len(), 1);
    assert_eq!(launcher.spawn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_if_current_ignores_other_sessions() {
    let launcher = FakeLauncher::healthy();
    let bridge = bridge(&launcher);
    bridge.ensure(10).await.unwrap();

    assert!(!bridge.stop_session_if_current(Some(20)).await);
    assert_eq!(bridge.current_app_id(), Some(10));

    assert!(bridge.stop_session_if_current(Some(10)).await);
    assert_eq!(bridge.current_app_id(), None);
    assert!(launcher.events().contains(&Event::Closed { instance: 0 }));
}

#[tokio::test(start_paused = true)]
async fn test_send_without_worker_fails_fast() {
    let launcher = FakeLauncher::healthy();
    let bridge = bridge(&launcher);
    assert_eq!(
        bridge.send(&WorkerRequest::GetStats).await,
        Err(BridgeError::NotRunning)
    );

    bridge.ensure(480).await.unwrap();
    bridge.kill().await;
    bridge.kill().await;
    assert_eq!(
        bridge.send(&WorkerRequest::GetStats).await,
        Err(BridgeError::NotRunning)
    );
}

#[tokio::test(start_paused = true)]
async fn test_crashed_worker_is_replaced_on_next_ensure() {
    let launcher = FakeLauncher::new(|instance, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(480)),
        Some("GET_STATS") if instance == 0 => Reply::Exit,
        _ => Reply::Ok(json!([])),
    });
    let bridge = bridge(&launcher);

    let crashed = bridge.call(480, &WorkerRequest::GetStats).await;
    assert_eq!(crashed, Err(BridgeError::ProcessExited));

    let retried = bridge.call(480, &WorkerRequest::GetStats).await;
    assert_eq!(retried, Ok(json!([])));
    assert_eq!(launcher.spawn_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_steam_id_setting_is_sent_with_init() {
    let launcher = FakeLauncher::healthy();
    let bridge = bridge_with(
        &launcher,
        MemorySettings::with(&[(STEAM_ID, "76561197960287930"), (API_KEY, "  ")]),
    );
    bridge.ensure(480).await.unwrap();

    let inits = launcher.requests_of("INIT");
    assert_eq!(inits[0].1["steamId"], 76561197960287930u64);
    assert!(inits[0].1.get("apiKey").is_none());
}

/// Worker that never answers INIT, so a test can act while it is pending.
fn silent_init() -> FakeLauncher {
    FakeLauncher::new(|_, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ignore,
        _ => Reply::Ok(json!({})),
    })
}

fn spawn_ensure(
    bridge: &Arc<WorkerBridge>,
    app_id: u32,
) -> tokio::task::JoinHandle<Result<(), BridgeError>> {
    let bridge = Arc::clone(bridge);
    tokio::spawn(async move { bridge.ensure(app_id).await })
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_init_tears_down_the_starting_worker() {
    let launcher = silent_init();
    let bridge = bridge(&launcher);
    let ensure = spawn_ensure(&bridge, 480);
    settle_until(|| launcher.requests_of("INIT").len() == 1).await;

    assert!(!bridge.stop_session_if_current(Some(20)).await);
    assert!(bridge.stop_session_if_current(Some(480)).await);

    assert_eq!(ensure.await.unwrap(), Err(BridgeError::NotRunning));
    assert_eq!(bridge.current_app_id(), None);
    assert!(launcher.events().contains(&Event::Closed { instance: 0 }));
    assert_eq!(
        bridge.send(&WorkerRequest::GetStats).await,
        Err(BridgeError::NotRunning)
    );
}

#[tokio::test(start_paused = true)]
async fn test_kill_during_init_fails_the_pending_ensure() {
    let launcher = silent_init();
    let bridge = bridge(&launcher);
    let ensure = spawn_ensure(&bridge, 480);
    settle_until(|| launcher.requests_of("INIT").len() == 1).await;

    bridge.kill().await;

    assert_eq!(ensure.await.unwrap(), Err(BridgeError::NotRunning));
    assert_eq!(bridge.current_app_id(), None);
    assert!(launcher.events().contains(&Event::Closed { instance: 0 }));

    // Time passing after the stop must not resurrect a binding.
    tokio::time::sleep(BridgeTimings::default().init_timeout()).await;
    assert_eq!(bridge.current_app_id(), None);
    assert_eq!(launcher.spawn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sentinel_respawn_stops_the_failing_worker() {
    let launcher = FakeLauncher::new(|instance, request| match request["type"].as_str() {
        Some("INIT") => Reply::Ok(init_payload(request["appId"].as_u64().unwrap_or(0))),
        Some("SET_ACHIEVEMENT") if instance == 0 => Reply::Err("stats not received".to_string()),
        _ => Reply::Ok(confirmed()),
    });
    let bridge = bridge(&launcher);

    let outcome = bridge.set_achievement(480, "ACH_WIN", true).await.unwrap();

    assert!(outcome.confirmed());
    assert!(launcher.events().contains(&Event::Closed { instance: 0 }));
    assert_eq!(bridge.current_app_id(), Some(480));
}

#[tokio::test(start_paused = true)]
async fn test_kill_forces_exit_after_grace_when_eof_is_ignored() {
    let launcher = FakeLauncher::healthy().ignoring_eof();
    let bridge = bridge(&launcher);
    bridge.ensure(480).await.unwrap();

    let started = tokio::time::Instant::now();
    bridge.kill().await;

    assert!(started.elapsed() >= BridgeTimings::default().kill_grace());
    let events = launcher.events();
    assert!(events.contains(&Event::Killed { instance: 0 }));
    assert!(!events.contains(&Event::Closed { instance: 0 }));
}

#[tokio::test(start_paused = true)]
async fn test_kill_skips_force_when_worker_exits_on_eof() {
    let launcher = FakeLauncher::healthy();
    let bridge = bridge(&launcher);
    bridge.ensure(480).await.unwrap();

    let started = tokio::time::Instant::now();
    bridge.kill().await;

    assert!(started.elapsed() < BridgeTimings::default().kill_grace());
    let events = launcher.events();
    assert!(events.contains(&Event::Closed { instance: 0 }));
    assert!(!events.contains(&Event::Killed { instance: 0 }));
}
