use broke_protocol::Endpoint;
use broke_worker::handler::{LogHandler, SleepHandler};
use broke_worker::{MessageHandler, Worker, WorkerConfig};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "broke-worker")]
#[command(about = "Worker processes for the broke broker", long_about = None)]
struct Args {
    /// Broker endpoint, e.g. tcp://127.0.0.1:5555
    #[arg(short, long)]
    broker: Option<String>,

    /// Base worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Number of workers to run
    #[arg(short, long)]
    workers: Option<usize>,

    /// Simulated processing time per message in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    // Override with CLI args
    if let Some(broker) = args.broker {
        config.broker_address = broker;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.processing_delay_ms = delay_ms;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }

    let endpoint: Endpoint = config.broker_address.parse()?;
    let handler: Arc<dyn MessageHandler> = if config.processing_delay_ms > 0 {
        Arc::new(SleepHandler::new(config.processing_delay_ms))
    } else {
        Arc::new(LogHandler)
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    let mut tasks = Vec::new();
    for identity in config.worker_identities() {
        let worker = Worker::new(
            identity,
            endpoint.clone(),
            handler.clone(),
            config.reconnect_interval(),
        );
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { worker.run(cancel).await }));
    }
    tracing::info!("Started {} workers against {}", tasks.len(), endpoint);

    let mut handled = 0;
    for task in tasks {
        handled += task.await??;
    }
    tracing::info!("Handled {} messages", handled);

    Ok(())
}
