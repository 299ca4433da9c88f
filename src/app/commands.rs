//! Entry points for the two process modes.

use super::cli::{Cli, Command, SettingsAction};
use anyhow::{Context, Result};
use clap::CommandFactory;
use sab_core::bridge_paths;
use sab_core::catalog::WebApiCatalog;
use sab_core::config::BridgeConfig;
use sab_core::logging::init_tracing;
use sab_core::session_client::{ClientResponse, SessionClient};
use sab_core::settings::{FileSettings, SettingsProvider};
use sab_core::worker::clock::TokioClock;
use sab_core::worker::provider::default_opener;
use sab_core::worker::SessionWorker;
use sab_core::worker_bridge::{IdleSupervisor, ProcessLauncher, WorkerBridge, WorkerLauncher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use tracing::info;
use tracing::level_filters::LevelFilter;

/// Worker mode: serve the protocol on stdio until EOF, `EXIT` or a failed
/// INIT.
pub fn run_worker(config_path: Option<&Path>) -> Result<ExitCode> {
    init_tracing(LevelFilter::DEBUG, true);
    let config = load_config(config_path)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build worker runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        let worker = SessionWorker::new(
            config.worker,
            default_opener(),
            Arc::new(WebApiCatalog::new(&config.catalog)),
            Rc::new(TokioClock),
            SessionWorker::app_id_from_env(),
        );
        worker.run(tokio::io::stdin(), tokio::io::stdout()).await
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Controller mode: run one CLI command and print its response as JSON.
pub fn run_controller(cli: Cli) -> Result<ExitCode> {
    init_tracing(LevelFilter::INFO, false);
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    let config_path = match cli.config {
        Some(path) => path,
        None => bridge_paths::config_path()?,
    };
    let config = BridgeConfig::load_or_default(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build controller runtime")?;
    runtime.block_on(execute(command, config, config_path, cli.steam_root))
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load_or_default(path),
        None => BridgeConfig::load_or_default(&bridge_paths::config_path()?),
    }
}

async fn execute(
    command: Command,
    config: BridgeConfig,
    config_path: PathBuf,
    steam_root: Option<PathBuf>,
) -> Result<ExitCode> {
    let settings: Arc<dyn SettingsProvider> =
        Arc::new(FileSettings::new(bridge_paths::settings_path()?));
    let launcher: Arc<dyn WorkerLauncher> =
        Arc::new(ProcessLauncher::current_exe(Some(config_path))?);
    let bridge = Arc::new(WorkerBridge::new(
        Arc::clone(&launcher),
        Arc::clone(&settings),
        config.bridge.clone(),
    ));
    let idle = Arc::new(IdleSupervisor::new(launcher, Arc::clone(&settings)));
    let client = SessionClient::new(settings, bridge, idle, steam_root);

    let result = dispatch(&client, command).await;
    client.shutdown().await;

    Ok(if result? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn dispatch(client: &SessionClient, command: Command) -> Result<bool> {
    match command {
        Command::Games => print(&client.list_games()),
        Command::Users => print(&client.list_users()),
        Command::Achievements { app_id } => print(&client.get_achievements(app_id).await),
        Command::Unlock { app_id, api_name } => {
            print(&client.set_achievement(app_id, &api_name, true).await)
        }
        Command::Lock { app_id, api_name } => {
            print(&client.set_achievement(app_id, &api_name, false).await)
        }
        Command::UnlockAll { app_id } => print(&client.set_all_achievements(app_id, true).await),
        Command::LockAll { app_id } => print(&client.set_all_achievements(app_id, false).await),
        Command::Stats { app_id } => print(&client.get_stats(app_id).await),
        Command::SetStat {
            app_id,
            api_name,
            value,
        } => print(&client.set_stat(app_id, &api_name, value).await),
        Command::Reset {
            app_id,
            keep_achievements,
        } => print(&client.reset_stats(app_id, !keep_achievements).await),
        Command::Idle { app_ids } => idle_until_interrupted(client, &app_ids).await,
        Command::Settings { action } => match action {
            SettingsAction::Get { key } => print(&client.get_setting(&key)),
            SettingsAction::Set { key, value } => print(&client.set_setting(&key, &value)),
            SettingsAction::Unset { key } => print(&client.unset_setting(&key)),
        },
    }
}

async fn idle_until_interrupted(client: &SessionClient, app_ids: &[u32]) -> Result<bool> {
    let mut all_started = true;
    for app_id in app_ids {
        let response = client.start_idle(*app_id).await;
        if !response.success {
            all_started = false;
            print(&response)?;
        }
    }
    print(&client.list_idle())?;

    info!("idling; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    print(&client.stop_all_idle().await)?;
    Ok(all_started)
}

fn print<T: Serialize>(response: &ClientResponse<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(response.success)
}
