use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use msgport_broker::{Broker, BrokerConfig, DEFAULT_SOCKET_DIR};
use msgport_platform::ManifestPlatform;

#[derive(Parser, Debug)]
#[command(name = "messageportd")]
#[command(about = "Message-port broker daemon")]
struct Cli {
    /// Directory holding the broker socket.
    #[arg(long, default_value = DEFAULT_SOCKET_DIR)]
    socket_dir: PathBuf,
    /// Path to the platform application manifest.
    #[arg(long)]
    platform_manifest: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let platform = match &cli.platform_manifest {
        Some(path) => ManifestPlatform::load(path)?,
        None => {
            tracing::warn!(
                "no platform manifest given; peers not listed in one cannot be identified"
            );
            ManifestPlatform::new()
        }
    };
    let platform = Arc::new(platform);

    tracing::info!("messageportd starting");

    let config = BrokerConfig {
        socket_dir: cli.socket_dir,
    };
    let broker = Broker::bind(&config, platform.clone(), platform)?;
    broker.run().await?;

    tracing::error!("messageportd exited unexpectedly");
    Ok(())
}
