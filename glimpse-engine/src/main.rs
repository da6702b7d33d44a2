//! glimpse-engine — entry point.
//!
//! ```text
//! glimpse-engine                 Run in the foreground
//! glimpse-engine --config <path> Load a custom config TOML
//! glimpse-engine --gen-config    Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use glimpse_core::{
    ClientRegistry, Controller, EngineGateway, Message, MessageEncoder, MessageSink, run_publisher,
};
use glimpse_engine::capture::SyntheticBackend;
use glimpse_engine::config::EngineConfig;
use glimpse_engine::transport::{
    ConnectorPorts, PublisherHub, run_collector, run_connector, run_publisher_listener,
    session_hex,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "glimpse-engine", about = "Adaptive remote-display streaming engine")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "glimpse-engine.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&EngineConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = EngineConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session_id = config.session_id();
    info!("glimpse-engine v{}", env!("CARGO_PKG_VERSION"));
    info!("session: {}", session_hex(session_id));

    // Bind transports before anything is announced.
    let bind = &config.transport.bind_address;
    let connector = TcpListener::bind((bind.as_str(), config.transport.connector_port)).await?;
    let publisher = TcpListener::bind((bind.as_str(), config.transport.publisher_port)).await?;
    let collector = TcpListener::bind((bind.as_str(), config.transport.collector_port)).await?;
    info!(
        "connector {}, publisher {}, collector {}",
        connector.local_addr()?,
        publisher.local_addr()?,
        collector.local_addr()?
    );

    // Engine plumbing.
    let registry = Arc::new(Mutex::new(ClientRegistry::new(
        config.to_quality_settings(),
        Instant::now(),
    )));
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let gateway = Arc::new(EngineGateway::new(Arc::clone(&registry), message_tx));
    let encoder = Arc::new(MessageEncoder::new(session_id));

    let hub = Arc::new(PublisherHub::new());
    tokio::spawn(run_publisher(
        message_rx,
        Arc::clone(&hub) as Arc<dyn MessageSink>,
    ));
    tokio::spawn(run_publisher_listener(publisher, Arc::clone(&hub)));
    tokio::spawn(run_collector(collector, Arc::clone(&gateway), session_id));
    tokio::spawn(run_connector(
        connector,
        Arc::clone(&gateway),
        session_id,
        ConnectorPorts {
            publisher_port: config.transport.publisher_port,
            collector_port: config.transport.collector_port,
        },
    ));

    let mut controller = Controller::new(
        Box::new(SyntheticBackend::new()),
        Arc::clone(&gateway),
        Arc::clone(&encoder),
        config.to_controller_settings(),
    );

    // Ctrl-C handler.
    let stop = controller.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    controller.run().await?;

    // Tell every client the session is over before dropping the
    // publisher.
    {
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sender = |mask: u64, message: Message| {
            let _ = gateway.publish(encoder.encode(mask, &message));
        };
        registry.disconnect_all(&mut sender);
    }
    // Give the publisher pump a moment to flush.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    Ok(())
}
