//! Request handlers of the session state machine.

use super::retry::{
    hold_for, retry_with_fast_fail, wait_until_stable, RetryOutcome, RetryPolicy, StabilityPolicy,
};
use super::{ReadySession, SessionWorker, SharedSession, WorkerState};
use crate::catalog::{GameSchema, PlayerAchievement};
use crate::errors::{BridgeError, STATS_NOT_RECEIVED};
use crate::protocol::{
    AchievementFlag, AchievementView, InitInfo, SetAchievementOutcome, SetAllOutcome, StatValue,
    StatView, BUILD_SHA,
};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What a handler needs from a ready session, detached from `self.state`.
struct SessionContext {
    app_id: u32,
    api_key: Option<String>,
    steam_id: Option<u64>,
    session: SharedSession,
}

impl SessionWorker {
    fn context(&self) -> Result<SessionContext, String> {
        match &self.state {
            WorkerState::Ready(ready) => Ok(SessionContext {
                app_id: ready.info.app_id,
                api_key: ready.api_key.clone(),
                steam_id: ready.steam_id,
                session: Rc::clone(&ready.session),
            }),
            WorkerState::Initializing => Err("session is still initializing".to_string()),
            WorkerState::Uninitialized => {
                Err("session not initialized; send INIT first".to_string())
            }
        }
    }

    pub(super) async fn init(
        &mut self,
        app_id: u32,
        api_key: Option<String>,
        steam_id: Option<u64>,
    ) -> Result<InitInfo, String> {
        match &mut self.state {
            WorkerState::Ready(ready) => {
                if ready.info.app_id != app_id {
                    return Err(format!(
                        "worker already holds a session for app {}",
                        ready.info.app_id
                    ));
                }
                if api_key.is_some() {
                    ready.api_key = api_key;
                }
                if steam_id.is_some() {
                    ready.steam_id = steam_id;
                }
                return Ok(ready.info.clone());
            }
            WorkerState::Initializing => {
                return Err("session is still initializing".to_string());
            }
            WorkerState::Uninitialized => {}
        }

        // The first open always targets the id the process was spawned for.
        let target = match self.env_app_id {
            Some(env_id) if env_id != app_id => {
                warn!(env_id, app_id, "INIT app id differs from spawn environment");
                env_id
            }
            Some(env_id) => env_id,
            None => app_id,
        };

        self.state = WorkerState::Initializing;
        let session = match self.opener.open(target) {
            Ok(session) => Rc::new(RefCell::new(session)),
            Err(e) => {
                self.state = WorkerState::Uninitialized;
                return Err(format!("{:#}", e));
            }
        };

        let policy = StabilityPolicy::from(&self.config.readiness);
        let probe_session = Rc::clone(&session);
        let readiness = wait_until_stable(self.clock.as_ref(), &policy, move || {
            let mut session = probe_session.borrow_mut();
            session.run_callbacks();
            session.probe()
        })
        .await;
        if readiness.stable {
            info!(app_id = target, probes = readiness.probes, "session ready");
        } else {
            warn!(
                app_id = target,
                probes = readiness.probes,
                "session readiness not observed before ceiling; continuing"
            );
        }

        let pump = spawn_pump(Rc::clone(&session), self.config.pump_interval());
        let info = InitInfo {
            app_id: target,
            build_sha: BUILD_SHA.to_string(),
            readiness,
        };
        self.state = WorkerState::Ready(ReadySession {
            info: info.clone(),
            api_key,
            steam_id,
            session,
            pump,
            idling: false,
        });
        Ok(info)
    }

    pub(super) async fn get_achievements(&mut self) -> Result<Vec<AchievementView>, String> {
        let ctx = self.context()?;
        let local = ctx.session.borrow().local_achievements();

        let schema = match ctx.api_key.as_deref() {
            Some(key) => match self.catalog.fetch_schema(ctx.app_id, Some(key)).await {
                Ok(schema) => Some(schema),
                Err(e) => {
                    warn!(app_id = ctx.app_id, error = %format!("{:#}", e), "schema unavailable; using session view");
                    None
                }
            },
            None => None,
        };
        let percentages = self.catalog.fetch_global_percentages(ctx.app_id).await;

        let player_id = ctx.session.borrow().steam_id().or(ctx.steam_id);
        let player = match (ctx.api_key.as_deref(), player_id) {
            (Some(key), Some(id64)) => {
                self.catalog
                    .fetch_player_achievements(ctx.app_id, id64, Some(key))
                    .await
            }
            _ => HashMap::new(),
        };

        Ok(merge_achievements(local, schema, &percentages, &player))
    }

    pub(super) async fn set_achievement(
        &mut self,
        api_name: &str,
        unlocked: bool,
        fast_fail: bool,
    ) -> Result<SetAchievementOutcome, String> {
        let ctx = self.context()?;
        let policy = RetryPolicy::for_write(&self.config.write, fast_fail);

        let write_session = Rc::clone(&ctx.session);
        let outcome = retry_with_fast_fail(self.clock.as_ref(), &policy, move |attempt| {
            let mut session = write_session.borrow_mut();
            session.run_callbacks();
            let result = session.set_achievement(api_name, unlocked);
            if let Err(e) = &result {
                debug!(attempt, api_name, error = %e, "write attempt failed");
            }
            result
        })
        .await;

        let attempts = match outcome {
            RetryOutcome::Succeeded { attempts, .. } => attempts,
            RetryOutcome::FastFailed {
                attempts,
                last_error,
            } => {
                warn!(api_name, attempts, %last_error, "giving up early; stats never arrived");
                return Err(STATS_NOT_RECEIVED.to_string());
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                return Err(BridgeError::WriteRejected {
                    attempts,
                    reason: last_error,
                }
                .to_string());
            }
        };

        ctx.session
            .borrow_mut()
            .store_stats()
            .map_err(|e| format!("failed to store stats: {}", e))?;
        self.flush(&ctx.session).await;

        let read_back = ctx.session.borrow().achievement(api_name);
        let verified = match read_back {
            Ok(value) => value,
            Err(e) => {
                warn!(api_name, error = %e, "read-back after write failed");
                !unlocked
            }
        };
        info!(api_name, unlocked, verified, attempts, "achievement written");
        Ok(SetAchievementOutcome {
            verified,
            expected: unlocked,
            attempts,
        })
    }

    pub(super) async fn set_all_achievements(
        &mut self,
        unlocked: bool,
    ) -> Result<SetAllOutcome, String> {
        let ctx = self.context()?;

        let names: Vec<String> = match ctx.api_key.as_deref() {
            Some(key) => self
                .catalog
                .fetch_schema(ctx.app_id, Some(key))
                .await
                .map_err(|e| format!("{:#}", e))?
                .achievements
                .into_iter()
                .map(|a| a.api_name)
                .collect(),
            None => ctx.session.borrow().achievement_names(),
        };
        let Some(first) = names.first().cloned() else {
            return Err(format!("app {} defines no achievements", ctx.app_id));
        };

        // Reads of the first entry start working once stats are in.
        let gate = RetryPolicy::plain(
            self.config.set_all_gate_attempts,
            self.config.write.retry_delay(),
        );
        let gate_session = Rc::clone(&ctx.session);
        let gate_outcome = retry_with_fast_fail(self.clock.as_ref(), &gate, move |_| {
            let mut session = gate_session.borrow_mut();
            session.run_callbacks();
            session.achievement(&first)
        })
        .await;
        match gate_outcome {
            RetryOutcome::Succeeded { .. } => {}
            RetryOutcome::FastFailed {
                attempts,
                last_error,
            }
            | RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(attempts, %last_error, "bulk write gate never opened");
                return Err(STATS_NOT_RECEIVED.to_string());
            }
        }

        let mut applied = 0;
        let mut failed = Vec::new();
        {
            let mut session = ctx.session.borrow_mut();
            for name in &names {
                match session.set_achievement(name, unlocked) {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        debug!(api_name = %name, error = %e, "bulk write entry failed");
                        failed.push(name.clone());
                    }
                }
            }
            session
                .store_stats()
                .map_err(|e| format!("failed to store stats: {}", e))?;
        }
        self.flush(&ctx.session).await;

        info!(total = names.len(), applied, unlocked, "bulk write finished");
        Ok(SetAllOutcome {
            total: names.len(),
            applied,
            failed,
        })
    }

    pub(super) async fn get_stats(&mut self) -> Result<Vec<StatView>, String> {
        let ctx = self.context()?;
        let Some(key) = ctx.api_key.as_deref() else {
            return Err("an API key is required to list stats".to_string());
        };
        let schema = self
            .catalog
            .fetch_schema(ctx.app_id, Some(key))
            .await
            .map_err(|e| format!("{:#}", e))?;

        let session = ctx.session.borrow();
        let stats = schema
            .stats
            .into_iter()
            .map(|stat| StatView {
                value: session.stat(&stat.api_name),
                api_name: stat.api_name,
                display_name: stat.display_name,
            })
            .collect();
        Ok(stats)
    }

    pub(super) async fn set_stat(&mut self, api_name: &str, value: StatValue) -> Result<Value, String> {
        let ctx = self.context()?;
        {
            let mut session = ctx.session.borrow_mut();
            session.run_callbacks();
            session.set_stat(api_name, value)?;
            session
                .store_stats()
                .map_err(|e| format!("failed to store stats: {}", e))?;
        }
        self.flush(&ctx.session).await;

        let current = ctx.session.borrow().stat(api_name);
        Ok(json!({ "apiName": api_name, "value": current }))
    }

    pub(super) async fn reset_stats(&mut self, achievements_too: bool) -> Result<Value, String> {
        let ctx = self.context()?;
        {
            let mut session = ctx.session.borrow_mut();
            session.reset_all_stats(achievements_too)?;
            session
                .store_stats()
                .map_err(|e| format!("failed to store stats: {}", e))?;
        }
        self.flush(&ctx.session).await;
        info!(app_id = ctx.app_id, achievements_too, "stats reset");
        Ok(json!({ "reset": true, "achievementsToo": achievements_too }))
    }

    pub(super) fn idle(&mut self) -> Result<Value, String> {
        match &mut self.state {
            WorkerState::Ready(ready) => {
                ready.idling = true;
                info!(app_id = ready.info.app_id, "idling");
                Ok(json!({ "idling": true, "appId": ready.info.app_id }))
            }
            _ => Err("session not initialized; send INIT first".to_string()),
        }
    }

    /// Gives the native layer wall-clock time to commit a stored change.
    async fn flush(&self, session: &SharedSession) {
        let write = &self.config.write;
        hold_for(
            self.clock.as_ref(),
            write.flush_window(),
            write.flush_poll(),
            || {
                if let Ok(mut session) = session.try_borrow_mut() {
                    session.run_callbacks();
                }
            },
        )
        .await;
    }
}

fn spawn_pump(session: SharedSession, every: Duration) -> JoinHandle<()> {
    tokio::task::spawn_local(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            // Handlers never hold the session across an await point.
            if let Ok(mut session) = session.try_borrow_mut() {
                session.run_callbacks();
            }
        }
    })
}

/// Combines the session's live flags with catalog metadata.
///
/// The session decides `unlocked`; the per-player lookup only fills in
/// unlock times, or the flag itself when the session could not read it.
pub(crate) fn merge_achievements(
    local: Vec<AchievementFlag>,
    schema: Option<GameSchema>,
    percentages: &HashMap<String, f64>,
    player: &HashMap<String, PlayerAchievement>,
) -> Vec<AchievementView> {
    let live: HashMap<&str, bool> = local
        .iter()
        .map(|flag| (flag.api_name.as_str(), flag.unlocked))
        .collect();

    let resolve = |api_name: &str| -> AchievementFlag {
        let remote = player.get(api_name);
        let unlocked = live
            .get(api_name)
            .copied()
            .or_else(|| remote.map(|p| p.achieved))
            .unwrap_or(false);
        AchievementFlag {
            api_name: api_name.to_string(),
            unlocked,
            unlocked_at: remote.filter(|_| unlocked).and_then(|p| p.unlocked_at),
        }
    };

    match schema.filter(|s| !s.achievements.is_empty()) {
        Some(schema) => schema
            .achievements
            .into_iter()
            .map(|entry| AchievementView {
                flag: resolve(&entry.api_name),
                global_percent: percentages.get(&entry.api_name).copied(),
                display_name: entry.display_name,
                description: entry.description,
                hidden: entry.hidden,
                icon: entry.icon,
                icon_gray: entry.icon_gray,
            })
            .collect(),
        None => local
            .iter()
            .map(|flag| AchievementView {
                flag: resolve(&flag.api_name),
                display_name: flag.api_name.clone(),
                description: String::new(),
                hidden: false,
                icon: None,
                icon_gray: None,
                global_percent: percentages.get(&flag.api_name).copied(),
            })
            .collect(),
    }
}
