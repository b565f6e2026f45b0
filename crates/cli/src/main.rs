//! dropflow entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: `--config PATH` (or `dropflow.toml`) layered
//!    under `DROPFLOW__*` environment variables, validated at load.
//! 2. **Wire observability**: `tracing-subscriber` with an env filter, text or
//!    JSON output, and an optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: record/signup store, tokio timer service,
//!    upstream HTTP client and the domain event sink, injected into the
//!    orchestrator components.
//! 4. **Re-arm pending timers**: every handle recorded by a previous process
//!    is scheduled again on the fresh timer service.
//! 5. **Run the event loop**: notification JSON lines from the intake
//!    (file or stdin) alongside timer deliveries, until Ctrl-C or until the
//!    intake is exhausted with no timers pending.

mod app;
mod lanes;
mod settings;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lifecycle::{
    Clock, DeferredScheduler, DomainEventSink, DrawCatalog, OrderCreator, ParticipantDirectory,
    RecordStore, SignupStore, SystemClock,
};
use orchestrator::{DrawExecutionEngine, Reconciler, SignupRegistrar};
use store::{FileStore, MemoryStore};
use timers::TokioScheduler;
use tokio::io::{AsyncRead, BufReader};
use tracing::{info, warn};
use upstream::{HttpEventForwarder, HttpUpstreamClient, LogEventSink, UpstreamSettings};

use crate::app::App;
use crate::settings::Settings;

/// Reconciles drop and prize-draw lifecycle notifications into timed events.
#[derive(Debug, Parser)]
#[command(name = "dropflow", version, about)]
struct Cli {
    /// Configuration file (TOML). Defaults to `dropflow.toml` if present.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _telemetry = telemetry::init(&settings.telemetry)?;

    let (records, signups) = open_store(&settings).await?;
    let upstream_client = Arc::new(
        HttpUpstreamClient::new(&UpstreamSettings {
            base_url: settings.upstream.base_url.clone(),
            access_token: settings.upstream.access_token.clone(),
            request_timeout: settings.upstream.request_timeout(),
        })
        .context("failed to build upstream client")?,
    );
    let sink: Arc<dyn DomainEventSink> = match &settings.events.forward_url {
        Some(url) => Arc::new(
            HttpEventForwarder::new(
                url,
                settings.upstream.access_token.clone(),
                settings.upstream.request_timeout(),
            )
            .context("failed to build event forwarder")?,
        ),
        None => {
            warn!("events.forward_url not set; domain events are only logged");
            Arc::new(LogEventSink)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (scheduler, deliveries) = TokioScheduler::new(settings.timers.channel_capacity);
    let catalog: Arc<dyn DrawCatalog> = upstream_client.clone();
    let directory: Arc<dyn ParticipantDirectory> = upstream_client.clone();
    let orders: Arc<dyn OrderCreator> = upstream_client;

    let app = App {
        reconciler: Arc::new(
            Reconciler::new(
                Arc::clone(&records),
                Arc::new(scheduler.clone()) as Arc<dyn DeferredScheduler>,
                sink,
                Arc::clone(&clock),
            )
            .with_redelivery_delay(settings.timers.redelivery_delay()),
        ),
        engine: Arc::new(DrawExecutionEngine::new(
            Arc::clone(&catalog),
            Arc::clone(&signups),
            orders,
        )),
        registrar: Arc::new(SignupRegistrar::new(
            records, signups, catalog, directory, clock,
        )),
        scheduler,
    };

    let rearmed = app
        .reconciler
        .rearm_pending()
        .await
        .context("failed to re-arm pending timers")?;
    info!(
        records = rearmed.records,
        rearmed = rearmed.rearmed,
        dropped = rearmed.dropped,
        "pending timers re-armed"
    );

    let intake = open_intake(&settings).await?;
    info!("dropflow started");
    let summary = app
        .run(BufReader::new(intake), deliveries, ctrl_c())
        .await;
    info!(?summary, "dropflow stopped");
    Ok(())
}

async fn open_store(settings: &Settings) -> Result<(Arc<dyn RecordStore>, Arc<dyn SignupStore>)> {
    match &settings.store.path {
        Some(path) => {
            let store = FileStore::open(path)
                .await
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            let records: Arc<dyn RecordStore> = Arc::new(store.clone());
            let signups: Arc<dyn SignupStore> = Arc::new(store);
            Ok((records, signups))
        }
        None => {
            warn!("store.path not set; reconciliation state is held in memory only");
            let store = MemoryStore::new();
            let records: Arc<dyn RecordStore> = Arc::new(store.clone());
            let signups: Arc<dyn SignupStore> = Arc::new(store);
            Ok((records, signups))
        }
    }
}

async fn open_intake(settings: &Settings) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    match &settings.intake.path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open intake {}", path.display()))?;
            info!(path = %path.display(), "reading notifications from file");
            Ok(Box::new(file))
        }
        None => {
            info!("reading notifications from stdin");
            Ok(Box::new(tokio::io::stdin()))
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C; running until intake ends");
        std::future::pending::<()>().await;
    }
}
