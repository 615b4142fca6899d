use arbo::config::{AppConfig, BrokerConfig, LogConfig};
use arbo::detector::ArbitrageDetector;
use arbo::feed::ReplayFeed;
use arbo::kraken::KrakenFuturesClient;
use arbo::processor::MessageProcessor;
use arbo::simulator::ExchangeSimulator;
use arbo::trade_log::TradeLogger;
use arbo::types::Tick;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load config
    let config = AppConfig::load("config.toml").unwrap_or_else(|e| {
        eprintln!("Failed to load config: {}", e);
        std::process::exit(1);
    });

    // Initialize tracing: console layer plus a plain-text file layer, each
    // with its own level from the environment
    let log_config = LogConfig::from_env();
    std::fs::create_dir_all("logs")?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("logs/arbo.log")?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log_config.console_level));
    let file_filter = EnvFilter::new(&log_config.file_level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file))
                .with_filter(file_filter),
        )
        .init();

    info!("Arbo - Cross-Venue Arbitrage Simulator starting...");
    info!(
        venues = ?config.general.venues,
        threshold_pct = config.detector.threshold_pct,
        alignment_threshold_pct = config.detector.alignment_threshold_pct,
        leverage = config.simulator.leverage,
        persist = config.simulator.persist,
        "Config loaded"
    );

    // The broker consumer runs out of process; surface its contract so an
    // operator can line the replay up with the real queue
    let broker = BrokerConfig::from_env();
    info!(
        url = %broker.rabbitmq_url,
        exchange = %broker.exchange_name,
        queue = %broker.queue_name,
        routing_key = %broker.routing_key,
        queue_length = broker.queue_length,
        "Broker ingress is external; replaying ticks from file"
    );

    // Optional connectivity preflight against Kraken Futures
    if config.kraken.enabled {
        let client = KrakenFuturesClient::new(config.kraken.api_url.clone());
        match client.tickers().await {
            Ok(tickers) => {
                info!("✓ Kraken Futures reachable: {} tickers", tickers.len());
            }
            Err(e) => {
                warn!("✗ Kraken Futures preflight failed: {}", e);
            }
        }
    }

    // Per-venue simulators, seeded or restored from snapshots
    let initial_funds: BTreeMap<String, Decimal> = config
        .simulator
        .initial_funds
        .iter()
        .map(|(asset, amount)| {
            (
                asset.clone(),
                Decimal::try_from(*amount).unwrap_or_default(),
            )
        })
        .collect();

    let mut simulators = BTreeMap::new();
    for venue in &config.general.venues {
        match ExchangeSimulator::new(venue, initial_funds.clone(), &config.simulator) {
            Ok(sim) => {
                info!(
                    venue = %venue,
                    balances = ?sim.balances(),
                    "✓ Simulator ready"
                );
                simulators.insert(venue.clone(), sim);
            }
            Err(e) => {
                error!("✗ Failed to initialize simulator for {}: {}", venue, e);
                eprintln!("\n❌ Could not load simulator state for {}: {}", venue, e);
                std::process::exit(1);
            }
        }
    }

    let detector = ArbitrageDetector::new(&config.detector);
    let mut processor = MessageProcessor::new(simulators, detector, &config.trading);
    processor.set_trade_log(TradeLogger::new(&config.logging));

    // Channels
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(broker.queue_length.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Feed task
    let feed = ReplayFeed::new(config.general.replay_path.clone(), tick_tx);
    let feed_shutdown = shutdown_rx.clone();
    let feed_handle = tokio::spawn(async move {
        feed.run(feed_shutdown).await;
    });

    // Processor task: ticks are handled strictly in arrival order
    let processor_shutdown = shutdown_rx.clone();
    let mut processor_handle =
        tokio::spawn(async move { processor.run(tick_rx, processor_shutdown).await });

    info!("Arbo running. Press Ctrl+C to stop.");
    let result = tokio::select! {
        res = &mut processor_handle => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received...");
            let _ = shutdown_tx.send(true);
            (&mut processor_handle).await
        }
    };
    let _ = feed_handle.await;

    match result {
        Ok(Ok(())) => {
            info!("Arbo shut down cleanly.");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Unrecoverable snapshot error: {}", e);
            eprintln!("\n❌ Snapshot I/O failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Processor task failed: {}", e);
            std::process::exit(1);
        }
    }
}
