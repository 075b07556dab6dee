// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Doorwatch - door sensor liveness and escalation service

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use doorwatch::core::EventBus;
use doorwatch::db::Database;
use doorwatch::notify::{LogNotifier, Notifier, NtfyNotifier};
use doorwatch::store::{SensorSettings, SledStore, StateStore};
use doorwatch::streaming::{MqttClient, StreamingManager, WebSocketServer};
use doorwatch::{Collaborators, Config, Engine, VERSION};

/// Doorwatch - door sensor liveness and escalation service
#[derive(Parser, Debug)]
#[command(name = "doorwatch")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Door sensor status ingest, open-too-long escalation and heartbeat loss alerts")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Log notifications instead of sending them
    #[arg(long)]
    mock: bool,

    /// MQTT broker address
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// WebSocket server port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Data directory for the state store and audit database
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Initialize logging
    let level = if args.trace {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("doorwatch v{}", VERSION);
    info!("Configuration loaded from {:?}", config_path);

    // Override with command line args
    if args.mock {
        config.engine.mock_mode = true;
    }
    if let Some(data_dir) = args.data_dir {
        config.relocate(data_dir);
    }
    if let Some(port) = args.ws_port {
        config.streaming.websocket_port = port;
    }
    if let Some(broker) = args.mqtt_broker {
        config.bus.broker = broker;
    }

    info!("Mock mode: {}", config.engine.mock_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let sled = Arc::new(SledStore::open(&config.store).context("opening state store")?);
    let store: Arc<dyn StateStore> = sled.clone();
    let database = Arc::new(Database::open(&config.database).context("opening audit database")?);
    let settings = Arc::new(SensorSettings::new(
        store.clone(),
        database.clone(),
        &config.engine,
    ));

    let notifier: Arc<dyn Notifier> = if config.engine.mock_mode || !config.notifier.enabled {
        info!("Notifications will be logged only");
        Arc::new(LogNotifier)
    } else {
        Arc::new(NtfyNotifier::new(&config.notifier).context("building ntfy client")?)
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (bus, bus_rx) = EventBus::new(config.engine.queue_capacity);
    let mqtt = Arc::new(MqttClient::new(&config.bus, bus).context("starting MQTT client")?);

    let websocket = if config.streaming.websocket_enabled {
        let server = Arc::new(WebSocketServer::new(
            config.streaming.websocket_port,
            config.streaming.websocket_max_clients,
            Some(store.clone()),
        ));
        server
            .start(shutdown_tx.subscribe())
            .await
            .context("starting WebSocket server")?;
        Some(server)
    } else {
        None
    };

    let republish = config.streaming.ha_republish.then(|| mqtt.clone());
    let broadcaster = Arc::new(StreamingManager::new(republish, websocket));

    let engine = Engine::new(
        Collaborators {
            store,
            audit: database,
            notifier,
            broadcaster,
            config: settings.clone(),
            admin: settings,
        },
        &config.engine,
    );

    let engine_task = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { engine.run(bus_rx, shutdown).await }
    });

    info!("doorwatch running, press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, cleaning up...");
    let _ = shutdown_tx.send(());
    if let Err(e) = engine_task.await {
        warn!("Engine task ended abnormally: {}", e);
    }
    engine.shutdown().await;

    if mqtt.is_connected() {
        if let Err(e) = mqtt.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }
    }
    if let Err(e) = sled.flush().await {
        warn!("Flushing state store failed: {}", e);
    }

    info!("doorwatch shutdown complete");
    Ok(())
}
