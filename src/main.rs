use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tokio_util::sync::CancellationToken;

use ringscan::api::ApiConfig;
use ringscan::capture::{AutoCaptureController, CaptureConfig, StubPhotoSource};
use ringscan::config::SettingsStore;
use ringscan::heading::{HeadingMonitor, SimulatedHeadingProvider};
use ringscan::models::{ScanSession, DEFAULT_SCALE_METERS, DEFAULT_SLOTS_TOTAL};
use ringscan::pipeline::{OrchestratorConfig, RunOutcome, UploadOrchestrator};
use ringscan::{ApiClient, Database, ImageVault};

#[derive(Parser)]
#[command(name = "ringscan", about = "Ring capture and 3D reconstruction pipeline")]
struct Cli {
    #[arg(long, env = "RINGSCAN_DATA_DIR", default_value = "./ringscan-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture a full ring with the simulated compass and stub camera.
    Capture {
        #[arg(long, default_value_t = DEFAULT_SCALE_METERS)]
        scale_meters: f64,
        #[arg(long, default_value_t = DEFAULT_SLOTS_TOTAL)]
        slots: u32,
    },
    /// Upload a captured session and poll the reconstruction job.
    Pipeline { session_id: String },
    /// List stored scan sessions, newest first.
    List,
    /// Dump one session as JSON.
    Show { session_id: String },
    /// Delete a session and its image tree.
    Delete { session_id: String },
    /// Copy a session's captured images to a directory, one file per slot.
    Export { session_id: String, dir: PathBuf },
    /// Show or update the API endpoint settings.
    Config {
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        /// Probe the configured backend's health endpoint.
        #[arg(long)]
        test: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("failed to create data dir {}", cli.data_dir.display()))?;
    let settings = SettingsStore::new(cli.data_dir.join("settings.json"))?;
    let db = Database::new(cli.data_dir.join("scans.db"))?;
    let vault = ImageVault::new(&cli.data_dir);

    match cli.command {
        Command::Capture { scale_meters, slots } => {
            run_capture(&db, &vault, scale_meters, slots).await
        }
        Command::Pipeline { session_id } => run_pipeline(&db, &settings, &session_id).await,
        Command::List => list_sessions(&db).await,
        Command::Show { session_id } => show_session(&db, &session_id).await,
        Command::Delete { session_id } => delete_session(&db, &vault, &session_id).await,
        Command::Export { session_id, dir } => export_session(&db, &vault, &session_id, &dir).await,
        Command::Config {
            base_url,
            api_key,
            test,
        } => update_config(&settings, base_url, api_key, test).await,
    }
}

async fn run_capture(db: &Database, vault: &ImageVault, scale_meters: f64, slots: u32) -> Result<()> {
    let session = ScanSession::new(scale_meters, slots);
    db.insert_session(&session).await?;
    vault.ensure_session_dirs(&session.id)?;

    let config = CaptureConfig::default();
    let provider = SimulatedHeadingProvider::default();
    let monitor = HeadingMonitor::start(&provider, config.stable_rate_threshold_deg_per_sec);
    let camera = Arc::new(StubPhotoSource::new(vault.staging_dir(&session.id)));

    let mut controller = AutoCaptureController::new();
    let mut feedback = controller.start(
        session.id.clone(),
        config,
        db.clone(),
        vault.clone(),
        camera,
        monitor.state(),
    )?;

    println!("capturing ring for session {}", session.id);
    let mut reported = 0;
    while feedback.changed().await.is_ok() {
        let snapshot = *feedback.borrow_and_update();
        if snapshot.captured_count != reported {
            reported = snapshot.captured_count;
            println!("  {reported}/{slots} slots captured");
        }
        if snapshot.ring_complete {
            break;
        }
    }

    controller.stop().await?;
    monitor.stop().await;

    println!("ring complete; next: ringscan pipeline {}", session.id);
    Ok(())
}

async fn run_pipeline(db: &Database, settings: &SettingsStore, session_id: &str) -> Result<()> {
    let api = ApiClient::new(settings.api())?;
    let orchestrator = UploadOrchestrator::new(db.clone(), api, OrchestratorConfig::default());

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, cancelling pipeline run");
            signal_token.cancel();
        }
    });

    match orchestrator.run(session_id, &cancel_token).await? {
        RunOutcome::Completed(session) => {
            println!("session {} is {}", session.id, session.status.as_str());
            if let Some(outputs) = session.outputs {
                if let Some(glb) = outputs.glb_url {
                    println!("  glb:  {glb}");
                }
                if let Some(usdz) = outputs.usdz_url {
                    println!("  usdz: {usdz}");
                }
            }
        }
        RunOutcome::AlreadyRunning => {
            println!("a pipeline run is already active for session {session_id}");
        }
    }
    Ok(())
}

async fn list_sessions(db: &Database) -> Result<()> {
    let sessions = db.list_sessions().await?;
    if sessions.is_empty() {
        println!("no scan sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {:<10}  {:>3} images  created {}",
            session.id,
            session.status.as_str(),
            session.images.len(),
            session.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

async fn show_session(db: &Database, session_id: &str) -> Result<()> {
    match db.get_session(session_id).await? {
        Some(session) => {
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(())
        }
        None => anyhow::bail!("scan session {session_id} not found"),
    }
}

async fn delete_session(db: &Database, vault: &ImageVault, session_id: &str) -> Result<()> {
    let removed = db.delete_session(session_id).await?;
    vault.delete_session_tree(session_id)?;
    if removed {
        println!("deleted session {session_id}");
    } else {
        println!("no session {session_id}");
    }
    Ok(())
}

async fn export_session(
    db: &Database,
    vault: &ImageVault,
    session_id: &str,
    dir: &std::path::Path,
) -> Result<()> {
    let session = db
        .get_session(session_id)
        .await?
        .with_context(|| format!("scan session {session_id} not found"))?;
    if session.images.is_empty() {
        anyhow::bail!("session {session_id} has no captured images to export");
    }

    let exported = vault.export_session_images(&session.id, &session.images, dir)?;
    for path in &exported {
        println!("  {}", path.display());
    }
    println!("exported {} images", exported.len());
    Ok(())
}

async fn update_config(
    settings: &SettingsStore,
    base_url: Option<String>,
    api_key: Option<String>,
    test: bool,
) -> Result<()> {
    if base_url.is_some() || api_key.is_some() {
        let current = settings.api();
        settings.update_api(ApiConfig {
            base_url: base_url.unwrap_or(current.base_url),
            api_key: api_key.or(current.api_key),
        })?;
    }
    let api = settings.api();
    println!("base_url: {}", api.base_url);
    println!(
        "api_key:  {}",
        if api.api_key.is_some() { "set" } else { "unset" }
    );

    if test {
        match ApiClient::new(api)?.test_connection().await {
            Ok(status) => println!("connection OK ({status})"),
            Err(err) => println!("connection failed: {err}"),
        }
    }
    Ok(())
}
