use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reelsmith_events::{EventBus, EventJournal};
use reelsmith_worker::protocol;
use reelsmith_worker::service::{BackgroundSchedule, RenderService};
use reelsmith_worker::WorkerConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "reelsmith_worker=debug,reelsmith_pipeline=debug,reelsmith_core=info";

/// How long the journal gets to flush after shutdown.
const JOURNAL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    tracing::info!(
        pool_size = config.pool_size,
        engine = %config.engine_program,
        storage = %config.storage.kind(),
        scripts_dir = %config.scripts_dir.display(),
        output_dir = %config.output_dir.display(),
        "Worker starting",
    );

    let table = reelsmith_db::open_job_table(&config.database_url)
        .await
        .context("failed to open job store")?;

    let bus = Arc::new(EventBus::default());
    let journal_handle = tokio::spawn(EventJournal::run(bus.subscribe()));

    let assembly = RenderService::build(&config, Arc::new(table), bus.clone())
        .await
        .context("failed to assemble render service")?;
    tracing::info!(
        requeued = assembly.recovery.requeued,
        retrying = assembly.recovery.retrying,
        orphaned = assembly.recovery.orphaned,
        "Persisted jobs recovered",
    );
    let service = RenderService::start(
        assembly.queue,
        assembly.pool,
        Some(assembly.sweeper),
        BackgroundSchedule::from_config(&config),
    )
    .with_storage(assembly.storage);

    tokio::select! {
        result = read_requests(&service) => {
            result?;
            tracing::info!("Request stream closed, serving until shutdown signal");
            shutdown_signal().await;
        }
        () = shutdown_signal() => {}
    }

    service.shutdown().await;
    drop(service);
    drop(bus);
    match tokio::time::timeout(JOURNAL_DRAIN_TIMEOUT, journal_handle).await {
        Ok(Ok(written)) => tracing::info!(written, "Event journal closed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Event journal task failed"),
        Err(_) => tracing::warn!("Event journal still open at exit"),
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Logs go to stderr; stdout carries the response stream.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Read newline-delimited commands from stdin and answer each with one JSON
/// line on stdout. Returns when stdin closes.
async fn read_requests(service: &RenderService) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = protocol::handle_line(service, &line).await;
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
