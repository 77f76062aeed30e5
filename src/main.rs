//! wsgate: serves `./public` and hands `/ws` connections to a subscriber.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use wsgate::config::{load_config, validation::validate_config, ConfigError, ServerConfig};
use wsgate::lifecycle::{wait_for_shutdown_signal, Shutdown};
use wsgate::observability::{init_logging, LogFormat};
use wsgate::subscriber::EchoSubscriber;
use wsgate::Server;

#[derive(Parser)]
#[command(name = "wsgate")]
#[command(about = "Static file server with a websocket subscription endpoint", long_about = None)]
struct Cli {
    /// TOML config file with `addr` and `timeout_secs`.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file.
    #[arg(long)]
    addr: Option<String>,

    /// Request timeout in seconds, overrides the config file.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Directory served under `/public/`; must contain `index.html`.
    #[arg(long, default_value = "./public")]
    public_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    tracing::info!("wsgate v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = cli.addr {
        config.addr = addr;
    }
    if let Some(secs) = cli.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    tracing::info!(
        addr = %config.addr,
        timeout_secs = config.timeout.as_secs(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let token = shutdown.token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.trigger();
    });

    let server = Server::new(config, EchoSubscriber).with_public_dir(cli.public_dir);
    server.start(token).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
