//! Clinical API Gateway - Main Entry Point

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinical_gateway::{GatewayConfig, start_server};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinical_gateway=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let matches = Command::new("clinical-gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("API Gateway for the clinical platform backend and AI service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("gateway.toml"),
        )
        .arg(
            Arg::new("routes")
                .long("routes")
                .help("Print available routes and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("routes") {
        clinical_gateway::server::print_routes();
        return Ok(());
    }

    // Load configuration
    let default_config = "gateway.toml".to_string();
    let config_path = matches
        .get_one::<String>("config")
        .unwrap_or(&default_config);
    // A missing file means defaults; a file or environment that fails to
    // load or validate is fatal
    let config = GatewayConfig::from_file(config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    info!("Loaded configuration from: {}", config_path);

    if config.uses_default_secret() {
        warn!(
            "Using the built-in development JWT secret; set GATEWAY_AUTH__JWT_SECRET in production"
        );
    }

    info!(
        "Starting Clinical API Gateway v{} ({})",
        env!("CARGO_PKG_VERSION"),
        config.server.environment
    );
    info!("Server will bind to: {}", config.server_address());
    info!("Upstreams:");
    info!("  Backend: {}", config.services.backend_url);
    info!("  AI service: {}", config.services.ai_service_url);

    info!("Features enabled:");
    info!("  CORS: {}", config.cors.enabled);
    info!("  Rate Limiting: {}", config.rate_limiting.enabled);
    info!("  Response Cache: {}", config.cache.enabled);
    info!("  Metrics: {}", config.monitoring.metrics_enabled);
    info!("  Compression: {}", config.server.compression);

    if let Err(e) = start_server(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
