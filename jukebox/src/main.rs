mod bootstrap;
mod server;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use jukebox_core::logging;

use server::JukeboxServer;

#[derive(Debug, Parser)]
#[command(name = "jukebox", version, about = "Shared music-video queue with synchronized playback")]
struct Cli {
    /// YAML or TOML configuration file
    #[arg(short, long, env = "JUKEBOX_CONFIG_PATH")]
    config: Option<String>,

    /// Keep the queue in process memory instead of Postgres
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration (fail fast)
    let config = bootstrap::load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Jukebox starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Database and migrations
    let pool = if cli.in_memory {
        warn!("Running with an in-memory queue; nothing survives a restart");
        None
    } else {
        let pool = bootstrap::init_database(&config).await?;

        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                anyhow::anyhow!("Migration failed: {e}")
            })?;
        info!("Migrations completed");
        Some(pool)
    };

    // 4. Wire services
    let services = bootstrap::init_services(&config, pool).await?;

    // 5. Serve until a shutdown signal
    JukeboxServer::new(config, services).start().await
}
