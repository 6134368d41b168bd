use broke_broker::metrics::BrokerMetrics;
use broke_broker::{Broker, BrokerConfig, Producer};
use broke_core::Message;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use axum::Router;

#[derive(Parser, Debug)]
#[command(name = "broke-broker")]
#[command(about = "At-least-once message broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "broke.yaml")]
    config: String,

    /// Endpoint to bind, e.g. tcp://*:5555
    #[arg(long)]
    address: Option<String>,

    /// Redelivery interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<String>,

    /// Produce numbered demo messages ("Yo"); 0 produces forever
    #[arg(long)]
    produce: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = std::path::Path::new(&args.config).exists();
    let mut config = if config_found {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    // Override with CLI args
    if let Some(address) = args.address {
        config.broker.address = address;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.broker.redelivery_interval_ms = interval_ms;
    }
    if let Some(metrics_address) = args.metrics_address {
        config.monitoring.metrics_address = Some(metrics_address);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Broker::bind(&config).await?;
    let cancel = CancellationToken::new();

    // Start metrics server
    if let Some(addr) = config.monitoring.metrics_address.clone() {
        let metrics = broker.metrics();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics, addr, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    if let Some(count) = args.produce {
        tokio::spawn(produce(broker.producer(), count, cancel.clone()));
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        shutdown.cancel();
    });

    let workers = broker.workers();
    broker.run(config.redelivery_interval(), cancel).await?;

    for worker in workers.all_workers() {
        tracing::info!(
            "Worker {}: {} requests, {} deliveries, {} acks, last seen {}",
            worker.identity,
            worker.requests,
            worker.deliveries,
            worker.acks,
            worker.last_seen.to_rfc3339()
        );
    }

    Ok(())
}

/// Feed `{id, "Yo"}` messages with increasing ids
async fn produce(producer: Producer, count: u64, cancel: CancellationToken) {
    let mut id = 1u64;
    while count == 0 || id <= count {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = producer.push(Message::new(id, "Yo")) => {
                if let Err(e) = result {
                    tracing::warn!("Producer stopped: {}", e);
                    break;
                }
            }
        }
        id += 1;
    }
    tracing::info!("Produced {} messages", id - 1);
}

async fn start_metrics_server(
    metrics: Arc<BrokerMetrics>,
    addr: String,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, routing::get};

    async fn metrics_handler(
        State(metrics): State<Arc<BrokerMetrics>>,
    ) -> Result<String, (StatusCode, String)> {
        metrics
            .render()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}
