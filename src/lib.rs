//! VeilBox headless host.
//!
//! Loads a profile request and supervisor settings from JSON, then either
//! renders the sing-box configuration or runs the engine until Ctrl-C.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use veil_engine::singbox::{
    synthesize, LogFacadeSink, ProfileRequest, SupervisorPhase, SupervisorSettings, VeilService,
};

#[derive(Parser, Debug)]
#[command(name = "veilbox", version, about = "Run sing-box from a VeilBox profile")]
pub struct Cli {
    /// Supervisor settings JSON; built-in defaults apply when omitted
    #[arg(long, short, global = true, env = "VEILBOX_SETTINGS")]
    pub settings: Option<PathBuf>,
    /// sing-box binary, overriding `<exe dir>/core/sing-box`
    #[arg(long, global = true, env = "VEILBOX_ENGINE")]
    pub engine: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the engine and keep it running until Ctrl-C
    Run {
        /// Request JSON: `{"profile": {...}, "options": {...}}`
        request: PathBuf,
    },
    /// Print the synthesized configuration and exit
    Render {
        request: PathBuf,
    },
}

/// Install the fmt subscriber; `log` records from the engine crate are
/// bridged into it.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub fn load_request(path: &Path) -> anyhow::Result<ProfileRequest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing request {}", path.display()))
}

/// Settings file (or defaults) with the CLI engine override applied.
pub fn load_settings(
    settings: Option<&Path>,
    engine: Option<PathBuf>,
) -> anyhow::Result<SupervisorSettings> {
    let mut loaded = match settings {
        Some(path) => SupervisorSettings::load(path)?,
        None => SupervisorSettings::default(),
    };
    if engine.is_some() {
        loaded.engine_path = engine;
    }
    Ok(loaded)
}

/// Pretty JSON for a request, cache slot left unbound.
pub fn render(request: &ProfileRequest) -> anyhow::Result<String> {
    let document = synthesize(&request.profile, &request.options)?;
    Ok(document.to_json_pretty()?)
}

/// Run the engine until Ctrl-C or until it exits on its own.
pub async fn run_engine(settings: SupervisorSettings, request: ProfileRequest) -> anyhow::Result<()> {
    let service = VeilService::new(settings, Arc::new(LogFacadeSink)).shared();
    let info = service
        .connect_profile(request.profile, request.options)
        .await?;
    tracing::info!(
        pid = ?info.pid,
        config = %info.config_path.display(),
        "engine running, press Ctrl-C to stop"
    );

    let mut phases = service.supervisor().subscribe();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            tracing::info!("stopping engine");
            service.disconnect().await?;
            Ok(())
        }
        _ = phases.wait_for(|p| *p == SupervisorPhase::Idle) => {
            bail!("sing-box exited unexpectedly");
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Render { request } => {
            let request = load_request(&request)?;
            println!("{}", render(&request)?);
            Ok(())
        }
        Command::Run { request } => {
            let settings = load_settings(cli.settings.as_deref(), cli.engine)?;
            let request = load_request(&request)?;
            run_engine(settings, request).await
        }
    }
}
