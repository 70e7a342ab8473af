use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use identity::config::LogConfig;
use identity::{db, routes, AppState, Config};

const DEFAULT_CONFIG_PATH: &str = "./etc/identity.toml";

const USAGE: &str = "\
Usage: identity [OPTIONS]
Options:
  -config <path>  Path to configuration file (default: ./etc/identity.toml)
  -help, --help   Print this help message";

/// Value following `-config`, if any
fn config_path(args: &[String]) -> String {
    args.iter()
        .position(|arg| arg == "-config")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// RUST_LOG wins over the configured level
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "-help" || arg == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let path = config_path(&args);
    // Logging is not up yet, so report a bad config file on stderr
    let config = Config::load(&path).unwrap_or_else(|e| {
        eprintln!("Could not load config file: {:#}, using defaults", e);
        Config::default()
    });
    init_tracing(&config.log);
    info!(config = %path, "Starting identity server");

    let addr: SocketAddr = config.addr.parse().unwrap_or_else(|_| {
        warn!("Invalid address '{}', using default 0.0.0.0:8080", config.addr);
        SocketAddr::from(([0, 0, 0, 0], 8080))
    });

    let conn = db::init_database(&config.database).await.map_err(|e| {
        tracing::error!("Database initialization failed: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!(
        cache = config.policy.cache,
        timeout_secs = config.policy.timeout_secs,
        policy_dir = %config.policy.dir.display(),
        "Policy engine ready"
    );

    let app = routes::create_router(AppState::new(conn, config));
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
