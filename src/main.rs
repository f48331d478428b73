//! Order Latency Telemetry
//!
//! Serves the latency dashboard API and queries a running instance.

use chrono::Utc;
use clap::{Parser, Subcommand};
use latency_monitor::{
    api::{self, ApiState},
    client::TelemetryClient,
    config::Config,
    ingest::IngestGateway,
    query::QueryService,
    simulate::DemoFeed,
    storage::{
        flush_archive_writer, restore_from_archive, spawn_archive_writer, LatencyArchive,
        SqliteArchive,
    },
    store::LatencyStore,
    types::{LatencySubmission, OrderStatus},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "latency-monitor")]
#[command(about = "Order execution latency telemetry server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Server URL for client commands (defaults to the configured server)
    #[arg(long)]
    url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the telemetry server
    Serve {
        /// Feed synthetic latency records into the store
        #[arg(long)]
        demo: bool,
    },
    /// Show current latency statistics
    Stats {
        /// Include percentiles, SLA and per-broker breakdown
        #[arg(long)]
        detailed: bool,
    },
    /// Show recent latency logs
    Logs {
        /// Only logs for this order id
        #[arg(long)]
        order_id: Option<String>,
        /// Number of logs to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Record a latency measurement on a running server
    Record {
        order_id: String,
        #[arg(long)]
        broker: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "MARKET")]
        order_type: String,
        #[arg(long)]
        rtt_ms: f64,
        #[arg(long)]
        total_ms: f64,
        #[arg(long, default_value = "0")]
        validation_ms: f64,
        #[arg(long, default_value = "0")]
        response_ms: f64,
        #[arg(long, default_value = "0")]
        overhead_ms: f64,
        /// Mark the order as failed with this error
        #[arg(long)]
        error: Option<String>,
        /// Mark the order as failed without detail
        #[arg(long)]
        failed: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;
    let base_url = cli.url.clone().unwrap_or_else(|| config.server.base_url());

    match cli.command {
        Commands::Serve { demo } => run_server(config, demo).await,
        Commands::Stats { detailed } => show_stats(&base_url, detailed).await,
        Commands::Logs { order_id, limit } => show_logs(&base_url, order_id, limit).await,
        Commands::Record {
            order_id,
            broker,
            symbol,
            order_type,
            rtt_ms,
            total_ms,
            validation_ms,
            response_ms,
            overhead_ms,
            error,
            failed,
        } => {
            let status = if failed || error.is_some() {
                OrderStatus::Failure
            } else {
                OrderStatus::Success
            };
            let submission = LatencySubmission {
                order_id,
                broker,
                symbol,
                order_type,
                timestamp: None,
                rtt_ms,
                total_latency_ms: total_ms,
                validation_latency_ms: validation_ms,
                response_latency_ms: response_ms,
                overhead_ms,
                status,
                error,
            };
            record_latency(&base_url, &submission).await
        }
    }
}

async fn run_server(config: Config, demo: bool) -> anyhow::Result<()> {
    tracing::info!("Starting latency telemetry server");

    let retention = config.retention.policy();
    let store = Arc::new(LatencyStore::new(retention));
    tracing::info!(
        "Retention: {} records{}",
        retention.max_records,
        retention
            .max_age
            .map(|age| format!(", {}s max age", age.as_secs()))
            .unwrap_or_default()
    );

    let mut gateway = IngestGateway::new(store.clone())
        .with_breakdown_tolerance(config.ingest.breakdown_tolerance_ms);

    // Optional SQLite archive: restore the window, then persist write-behind
    let mut archive: Option<Arc<dyn LatencyArchive>> = None;
    let mut writer = None;
    if let Some(storage) = &config.storage {
        let sqlite: Arc<dyn LatencyArchive> =
            Arc::new(SqliteArchive::connect(&storage.path, storage.timeout()).await?);

        match restore_from_archive(&store, sqlite.as_ref(), retention.max_records).await {
            Ok(restored) => {
                tracing::info!("Restored {} latency records from archive", restored);
                let (handle, task) =
                    spawn_archive_writer(sqlite.clone(), storage.queue_capacity, storage.batch_size);
                gateway = gateway.with_archive(handle);
                writer = Some(task);
                archive = Some(sqlite);
            }
            Err(e) => tracing::error!(
                "Archive id range unreadable, records will not be persisted: {}",
                e
            ),
        }
    } else {
        tracing::warn!("Storage not configured, latency records are kept in memory only");
    }

    let gateway = Arc::new(gateway);
    let query = QueryService::new(store.clone(), config.export.format()?)
        .with_limits(config.query.default_limit, config.query.max_limit);

    // Background retention sweep
    {
        let store = store.clone();
        let purge_after = config
            .storage
            .as_ref()
            .and_then(|s| s.purge_after_days)
            .map(|days| chrono::Duration::days(i64::from(days)));
        let archive = archive.clone();
        let interval = Duration::from_secs(config.retention.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let evicted = store.evict_expired(now);
                if evicted > 0 {
                    tracing::info!("Evicted {} expired latency records", evicted);
                }
                if let (Some(archive), Some(age)) = (&archive, purge_after) {
                    match archive.purge_before(now - age).await {
                        Ok(0) => {}
                        Ok(purged) => tracing::info!("Purged {} archived latency records", purged),
                        Err(e) => tracing::warn!("Archive purge failed: {}", e),
                    }
                }
            }
        });
    }

    let demo_feed = demo.then(|| {
        tracing::warn!("Demo mode: synthetic latency records are being generated");
        let feed = DemoFeed::new(0.05);
        tokio::spawn(feed.run(gateway.clone(), Duration::from_millis(750)))
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let served = api::start_server(ApiState::new(query, gateway), addr).await;

    // Every gateway clone must be gone before the archive queue closes
    if let Some(feed) = demo_feed {
        feed.abort();
        let _ = feed.await;
    }
    if let Some(writer) = writer {
        tracing::info!("Flushing archive queue");
        if flush_archive_writer(writer, Duration::from_secs(10)).await {
            tracing::info!("Archive queue flushed");
        }
    }
    served?;

    tracing::info!("Latency telemetry server stopped");
    Ok(())
}

async fn show_stats(base_url: &str, detailed: bool) -> anyhow::Result<()> {
    let client = TelemetryClient::new(base_url)?;

    if !detailed {
        let stats = client.stats().await?;
        println!("\n⏱  Order Latency\n");
        println!("Total Orders:  {}", stats.total_orders);
        println!(
            "Failed:        {} ({:.1}%)",
            stats.failed_orders,
            stats.failure_rate_pct()
        );
        println!("Avg RTT:       {:.2} ms", stats.avg_rtt);
        println!("P99 RTT:       {:.2} ms", stats.p99_rtt);
        return Ok(());
    }

    let stats = client.detailed_stats().await?;
    println!("\n⏱  Order Latency (detailed)\n");
    println!("Total Orders:  {}", stats.total_orders);
    println!("Failed:        {} ({:.1}%)", stats.failed_orders, stats.failure_rate_pct);
    println!("Avg RTT:       {:.2} ms", stats.avg_rtt);
    println!("Avg Total:     {:.2} ms", stats.avg_total_latency);
    println!("Avg Overhead:  {:.2} ms", stats.avg_overhead);
    println!(
        "RTT p50/p90/p95/p99: {:.2} / {:.2} / {:.2} / {:.2} ms",
        stats.rtt_percentiles.p50,
        stats.rtt_percentiles.p90,
        stats.rtt_percentiles.p95,
        stats.rtt_percentiles.p99
    );
    println!(
        "Under 100/150/200 ms: {:.1}% / {:.1}% / {:.1}%",
        stats.sla.under_100ms_pct, stats.sla.under_150ms_pct, stats.sla.under_200ms_pct
    );

    if !stats.brokers.is_empty() {
        println!("\n{:<12} {:>8} {:>8} {:>10} {:>10}", "Broker", "Orders", "Failed", "Avg RTT", "P99 RTT");
        println!("{}", "-".repeat(52));
        for broker in &stats.brokers {
            println!(
                "{:<12} {:>8} {:>8} {:>10.2} {:>10.2}",
                broker.broker, broker.total_orders, broker.failed_orders, broker.avg_rtt, broker.p99_rtt
            );
        }
    }
    Ok(())
}

async fn show_logs(base_url: &str, order_id: Option<String>, limit: Option<usize>) -> anyhow::Result<()> {
    let client = TelemetryClient::new(base_url)?;
    let logs = match &order_id {
        Some(order_id) => client.logs_for_order(order_id).await?,
        None => client.recent_logs(limit).await?,
    };

    if logs.is_empty() {
        println!("No latency logs found");
        return Ok(());
    }

    println!(
        "\n{:>6} {:<16} {:<10} {:<16} {:<7} {:>9} {:>9} {:<8}",
        "ID", "Order", "Broker", "Symbol", "Type", "RTT", "Total", "Status"
    );
    println!("{}", "-".repeat(90));
    for log in &logs {
        println!(
            "{:>6} {:<16} {:<10} {:<16} {:<7} {:>9.2} {:>9.2} {:<8}{}",
            log.id,
            log.order_id,
            log.broker,
            log.symbol,
            log.order_type,
            log.rtt_ms,
            log.total_latency_ms,
            log.status,
            log.error.as_deref().map(|e| format!(" {}", e)).unwrap_or_default()
        );
    }
    Ok(())
}

async fn record_latency(base_url: &str, submission: &LatencySubmission) -> anyhow::Result<()> {
    let client = TelemetryClient::new(base_url)?;
    let id = client.record(submission).await?;
    println!("✅ Recorded latency for order {} (id {})", submission.order_id, id);
    Ok(())
}
