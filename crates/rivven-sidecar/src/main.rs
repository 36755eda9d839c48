//! rivven-sidecar - Kafka sidecar for stateless JSON endpoints
//!
//! # Usage
//!
//! ```bash
//! # Run with configuration from the environment
//! rivven-sidecar
//!
//! # Run with a configuration file
//! rivven-sidecar -c sidecar.yaml
//!
//! # Validate configuration
//! rivven-sidecar -c sidecar.yaml validate
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rivven_sidecar::broker::{kafka, Broker};
use rivven_sidecar::config::{GlobalSettings, LogFormat, SidecarConfig};
use rivven_sidecar::health::{self, HealthState, SharedHealthState};
use rivven_sidecar::ingress::HttpIngress;
use rivven_sidecar::invoker::HttpInvoker;
use rivven_sidecar::schema::{ExternalRegistry, SchemaCache, SchemaCodec};
use rivven_sidecar::{Pipeline, SidecarError};

#[derive(Parser)]
#[command(name = "rivven-sidecar")]
#[command(version, about = "Kafka sidecar for stateless JSON endpoints")]
struct Cli {
    /// Path to configuration file (environment variables are used when omitted)
    #[arg(short, long, env = "RIVVEN_SIDECAR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sidecar (default)
    Run,
    /// Validate configuration and print a summary
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;

    init_logging(cli.verbose, &config.settings);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Validate => validate_config(&config),
    }
}

fn load_config(path: Option<&PathBuf>) -> rivven_sidecar::Result<SidecarConfig> {
    let (source, loaded) = match path {
        Some(path) => (path.display().to_string(), SidecarConfig::from_file(path)),
        None => ("environment".to_string(), SidecarConfig::from_env()),
    };
    loaded.map_err(|e| SidecarError::config(format!("{} ({:#})", source, e)))
}

fn init_logging(verbose: bool, settings: &GlobalSettings) {
    let filter = if verbose || settings.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

async fn run(config: SidecarConfig) -> Result<()> {
    info!("Starting rivven-sidecar");

    if config.settings.startup_delay_secs > 0 {
        info!(
            "Waiting {}s before startup",
            config.settings.startup_delay_secs
        );
        tokio::time::sleep(Duration::from_secs(config.settings.startup_delay_secs)).await;
    }

    let cancel = CancellationToken::new();

    let health_state: SharedHealthState = Arc::new(RwLock::new(HealthState::new(
        config.has_broker_driver(),
        config.has_ingress_driver(),
    )));

    if config.settings.health.enabled {
        let health_config = config.settings.health.clone();
        let health_state = health_state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = health::start_health_server(health_config, health_state, cancel).await
            {
                error!("Health server failed: {}", e);
            }
        });
    }

    let (broker, pipeline) = build_pipeline(&config, health_state).await?;

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal (Ctrl+C)");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
        }
    });

    let result = pipeline.run(cancel.clone()).await;
    cancel.cancel();

    info!("Initiating graceful shutdown...");
    if let Err(e) = broker.close().await {
        warn!("Broker did not close cleanly: {}", e);
    }

    match result {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(kind = %e.kind(), "Pipeline stopped on fatal error: {}", e);
            Err(SidecarError::from(e).into())
        }
    }
}

/// Wire the schema codec, the broker layer and both drivers
async fn build_pipeline(
    config: &SidecarConfig,
    health_state: SharedHealthState,
) -> rivven_sidecar::Result<(Arc<Broker>, Pipeline)> {
    let registry = ExternalRegistry::new(&config.schema_registry)
        .map_err(|e| SidecarError::startup(format!("schema registry client: {}", e)))?;
    let cache = SchemaCache::new(
        Arc::new(registry),
        Duration::from_secs(config.schema_registry.refresh_interval_secs),
    );
    let codec = Arc::new(SchemaCodec::new(cache));

    let broker = Arc::new(kafka::connect(&config.broker)?);

    let mut pipeline = Pipeline::new(
        codec,
        broker.clone(),
        config.pipeline.clone(),
        health_state,
    );

    if config.has_broker_driver() {
        let invoker = HttpInvoker::new(&config.remote)
            .map_err(|e| SidecarError::startup(format!("remote invoker: {}", e)))?;
        pipeline = pipeline.with_broker(broker.clone(), Arc::new(invoker));
    }

    if config.has_ingress_driver() {
        let ingress = HttpIngress::bind(&config.ingress)
            .await
            .map_err(|e| SidecarError::startup(format!("ingress listener: {}", e)))?;
        pipeline = pipeline.with_ingress(Arc::new(ingress));
    }

    Ok((broker, pipeline))
}

fn validate_config(config: &SidecarConfig) -> Result<()> {
    println!("✓ Configuration valid!\n");

    println!("Broker:");
    println!("  Bootstrap servers:");
    for server in &config.broker.bootstrap_servers {
        println!("    - {}", server);
    }
    if config.has_broker_driver() {
        println!("  Consumer group: {}", config.broker.consumer_group);
        println!("  Start offset: {}", config.broker.start_offset.as_str());
        println!("  Topics:");
        for topic in &config.broker.topics {
            println!("    - {}", topic);
        }
        println!("  Remote endpoint: {}", config.remote.url);
    } else {
        println!("  Topics: none (broker driver disabled)");
    }
    println!();

    println!("Schema Registry:");
    println!("  URL: {}", config.schema_registry.url);
    println!(
        "  Refresh interval: {}s",
        config.schema_registry.refresh_interval_secs
    );
    println!();

    println!("Ingress:");
    if config.has_ingress_driver() {
        println!(
            "  Listening on: {}:{}{}",
            config.ingress.host, config.ingress.port, config.ingress.path
        );
    } else {
        println!("  disabled");
    }
    println!();

    println!("Pipeline:");
    if config.pipeline.allowed_topics.is_empty() {
        println!("  Allowed topics: any");
    } else {
        println!("  Allowed topics:");
        for topic in &config.pipeline.allowed_topics {
            println!("    - {}", topic);
        }
    }
    println!("  Commit on success: {}", config.pipeline.commit_on_success);
    println!("  Terminate on error: {}", config.pipeline.terminate_on_error);

    Ok(())
}
