pub mod catalog;
pub mod db;
pub mod error;
pub mod harness;
pub mod inference;
pub mod models;
pub mod permission;
pub mod playback;
pub mod session;
pub mod settings;
pub mod upload;
mod utils;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{info, warn};

use catalog::{LaunchParams, TaskAssignment, TaskCatalog};
use db::Database;
use harness::{SimulatedCamera, SimulatedInference, SimulatedPlayer, SimulatedPresentation};
use inference::InferenceController;
use models::ClientInfo;
use permission::DenialCategory;
use playback::PlaybackGuard;
use session::{SessionController, SessionHost, SessionSnapshot, Stage};
use settings::{AppSettings, SettingsStore, StorageSettings};
use upload::{HttpObjectStore, ObjectStore, UploadPipeline};

/// Runs one session against the simulated host and prints the completion
/// code. Without a launch URL the first catalog task is used.
pub fn run(launch_url: Option<&str>) -> Result<()> {
    let debug_mode = std::env::var("VIEWTRACK_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let settings_store = SettingsStore::new(SettingsStore::default_path())?;
    info!("Settings loaded from {}", settings_store.path().display());
    let settings = settings_store.get();

    let params = match launch_url {
        Some(url) => LaunchParams::from_url(url)?,
        None => LaunchParams::default(),
    };
    let assignment = TaskCatalog::builtin()
        .resolve(&params)
        .ok_or_else(|| anyhow!("task catalog is empty"))?;
    let worker_id = params.worker_id_or_anonymous();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let snapshot = runtime.block_on(run_dry_session(settings, assignment, worker_id))?;

    match snapshot.stage {
        Stage::Complete => {
            let code = snapshot.completion_code.unwrap_or_default();
            println!("Task complete. Completion code: {code}");
            Ok(())
        }
        Stage::Error { message, .. } => bail!("{message}"),
        other => bail!("session stopped in stage {}", other.label()),
    }
}

/// Prints the participant link sheet for the builtin catalog as JSON.
pub fn print_survey_links(base_url: &str, per_task: usize) -> Result<()> {
    let links = TaskCatalog::builtin().survey_links(base_url, per_task)?;
    let rendered = serde_json::to_string_pretty(&links).context("failed to render links")?;
    println!("{rendered}");
    Ok(())
}

async fn run_dry_session(
    settings: AppSettings,
    assignment: TaskAssignment,
    worker_id: String,
) -> Result<SessionSnapshot> {
    let journal = Database::new(settings.journal_path.clone())?;
    let interrupted = journal.recover_interrupted_sessions(Utc::now()).await?;
    if interrupted > 0 {
        warn!("Marked {interrupted} unfinished session(s) from a previous run as interrupted");
    }

    let store = open_store(&settings.storage, &journal)?;
    info!("Uploads go to {}", store.describe());

    let dry_run = &settings.dry_run;
    let camera = if dry_run.grant_permission {
        SimulatedCamera::granting()
    } else {
        SimulatedCamera::new(Err(DenialCategory::UserRefused))
    };
    let engine = Arc::new(SimulatedInference::new(std::time::Duration::from_millis(
        dry_run.event_period_ms.max(1),
    )));
    let player = Arc::new(SimulatedPlayer::new(dry_run.media_duration_secs));

    let host = SessionHost {
        camera: Arc::new(camera),
        player: player.clone(),
        presentation: Arc::new(SimulatedPresentation::new(true)),
        client: ClientInfo {
            user_agent: Some(concat!("viewtrack/", env!("CARGO_PKG_VERSION")).into()),
            screen_resolution: None,
            viewport: None,
        },
    };
    let controller = SessionController::new(
        assignment,
        worker_id,
        host,
        InferenceController::new(
            engine,
            settings.inference.modules.clone(),
            settings.inference.license_key.clone(),
        ),
        UploadPipeline::new(store, settings.upload.retry_policy()),
        PlaybackGuard::new(settings.guard.sample_interval()),
    )
    .with_journal(journal);

    let stage = controller.request_permission().await?;
    if stage == Stage::Playing {
        player.wait_until_ended().await;
        controller.on_playback_ended().await?;
    }

    let snapshot = controller.snapshot();
    info!(
        "Session {} finished in stage {} with {} events after {:.0}% of the video",
        snapshot.session_id,
        snapshot.stage.label(),
        snapshot.event_count,
        snapshot.progress_percent
    );
    controller.shutdown().await;
    Ok(snapshot)
}

fn open_store(storage: &StorageSettings, journal: &Database) -> Result<Arc<dyn ObjectStore>> {
    match storage {
        StorageSettings::Remote {
            base_url,
            bucket,
            api_key,
        } => Ok(Arc::new(HttpObjectStore::new(base_url, bucket, api_key)?)),
        StorageSettings::Local { path } if path.as_path() == journal.path() => {
            Ok(Arc::new(journal.clone()))
        }
        StorageSettings::Local { path } => Ok(Arc::new(Database::new(path.clone())?)),
    }
}
