mod animator;
mod app;
mod audio;
mod config;
mod events;
mod hud;
mod ingest;
mod presentation;
mod protocol;
mod reconciler;
mod snapshot;
mod sprites;
mod store;
mod transport;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use eframe::egui;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    app::{HudApp, HudRuntime},
    config::HudConfig,
    events::RawEvent,
    hud::{EguiSurface, LogSurface},
    presentation::{HudSurface, PresentationDriver},
    reconciler::EventReconciler,
    sprites::SpriteResolver,
    store::StateStore,
    transport::TransportChannel,
};

/// Transparent HUD overlay fed by live Project Zomboid telemetry
#[derive(Parser, Debug)]
#[command(name = "zomboid-hud", version)]
struct Cli {
    /// Config file to load (created with defaults when missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Websocket endpoint of the event relay
    #[arg(long)]
    endpoint: Option<String>,

    /// Run without a window and log HUD changes instead
    #[arg(long)]
    headless: bool,

    /// Log filter, e.g. `debug` or `zomboid_hud=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Also accept events over HTTP at this address, e.g. 127.0.0.1:8787
    #[arg(long)]
    ingest_bind: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut HudConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.transport.endpoint = endpoint.clone();
        }
        if let Some(bind) = &self.ingest_bind {
            config.ingest_bind = Some(bind.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_logging(cli.log_level.as_deref())?;

    let (mut config, config_path) = HudConfig::load_or_create(cli.config.as_deref())?;
    cli.apply(&mut config);
    info!(path = %config_path.display(), endpoint = %config.transport.endpoint, "config loaded");

    let (tx, rx) = crossbeam_channel::unbounded::<RawEvent>();

    let mut transport = TransportChannel::new(config.transport.clone());
    let transport_tx = tx.clone();
    transport.on_event(move |event| {
        let _ = transport_tx.send(event);
    });
    transport.connect();

    spawn_ingest(&config, tx);

    let sprites = Arc::new(SpriteResolver::from_config(&config.sprites));
    let store = StateStore::new(
        config.state_path()?,
        Duration::from_secs(config.store.max_age_secs),
    );
    let reconciler = EventReconciler::new(config.xp.clone(), sprites.clone());
    let connection = transport.state();

    if cli.headless {
        let driver = PresentationDriver::new(
            LogSurface::default(),
            sprites,
            config.health.clone(),
            config.toasts.clone(),
        );
        let runtime = HudRuntime::new(rx, reconciler, driver, store).with_connection(connection);
        return run_headless(runtime, transport).await;
    }

    let surface = EguiSurface::new(&config.overlay, config.animator.sheet_path.clone());
    let driver = PresentationDriver::new(
        surface,
        sprites,
        config.health.clone(),
        config.toasts.clone(),
    );
    let mut runtime =
        HudRuntime::new(rx, reconciler, driver, store).with_connection(connection);
    runtime.restore(std::time::Instant::now());

    let viewport = egui::ViewportBuilder::default()
        .with_transparent(true)
        .with_decorations(false)
        .with_always_on_top()
        .with_mouse_passthrough(true)
        .with_maximized(true)
        .with_title("Zomboid HUD");
    let native_options = eframe::NativeOptions {
        viewport,
        renderer: eframe::Renderer::Glow,
        ..Default::default()
    };

    let animator = config.animator.clone();
    eframe::run_native(
        "Zomboid HUD",
        native_options,
        Box::new(move |_cc| Ok(Box::new(HudApp::new(runtime, Some(transport), &animator)))),
    )
    .map_err(|err| anyhow::anyhow!("failed starting overlay window: {err}"))?;

    Ok(())
}

fn spawn_ingest(config: &HudConfig, tx: Sender<RawEvent>) {
    let Some(bind) = config.ingest_bind.clone() else {
        return;
    };
    if !ingest::is_valid_bind(&bind) {
        warn!(bind = %bind, "ignoring invalid ingest bind address");
        return;
    }
    tokio::spawn(async move {
        if let Err(err) = ingest::run_ingest_server(&bind, tx).await {
            error!(?err, "ingest server stopped");
        }
    });
}

async fn run_headless<S: HudSurface>(
    mut runtime: HudRuntime<S>,
    mut transport: TransportChannel,
) -> Result<()> {
    runtime.restore(std::time::Instant::now());
    info!("running headless; press ctrl-c to exit");
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                runtime.pump(std::time::Instant::now());
            }
        }
    }
    runtime.shutdown();
    transport.disconnect();
    info!("shutting down");
    Ok(())
}

/// Logs to stderr and to a daily rolling file under the OS data dir.
fn setup_logging(level: Option<&str>) -> Result<WorkerGuard> {
    let env_filter = match level {
        Some(level) => {
            EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let log_dir = dirs::data_local_dir()
        .context("unable to locate OS data directory")?
        .join("zomboid-hud")
        .join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed creating log dir at {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "zomboid-hud.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false),
        )
        .init();

    info!(dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}
