//! Configuration loading, database connection and service wiring.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};

use jukebox_api::http::{GuestIdentity, IdentityResolver, SessionIdentity};
use jukebox_core::acquisition::{AcquisitionBackend, YtDlpSource};
use jukebox_core::repository::{
    BannedWordRepository, MemoryQueueStore, PgQueueStore, QueueStore, SessionRepository,
};
use jukebox_core::segmenter::{ArtifactStore, FfmpegTranscoder, StreamPipeline};
use jukebox_core::service::{AdmissionPolicy, Orchestrator, OrchestratorSettings};
use jukebox_core::Config;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Load configuration from the given file, `./config.yaml`, or the
/// environment alone, then validate it.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let path = explicit.map(str::to_string).or_else(|| {
        Path::new(DEFAULT_CONFIG_FILE)
            .exists()
            .then(|| DEFAULT_CONFIG_FILE.to_string())
    });

    let config = match &path {
        Some(path) => {
            if !Path::new(path).exists() {
                anyhow::bail!("Config file {path} does not exist");
            }
            eprintln!("Loading config from {path}");
            Config::from_file(path).with_context(|| format!("Failed to load {path}"))?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env().context("Failed to load configuration from environment")?
        }
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        );
    }

    Ok(config)
}

/// Initialize the database connection pool. Migrations run in `main`.
pub async fn init_database(config: &Config) -> Result<PgPool> {
    if config.database.url.is_empty() {
        anyhow::bail!("database.url is empty; set JUKEBOX_DATABASE__URL or pass --in-memory");
    }

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            anyhow::anyhow!("Database connection failed: {e}")
        })?;

    info!("Database connected successfully");
    Ok(pool)
}

/// Everything the HTTP layer needs.
pub struct Services {
    pub orchestrator: Orchestrator,
    pub identity: Arc<dyn IdentityResolver>,
}

pub async fn init_services(config: &Config, pool: Option<PgPool>) -> Result<Services> {
    info!("Initializing services...");

    let store: Arc<dyn QueueStore> = match &pool {
        Some(pool) => Arc::new(PgQueueStore::new(pool.clone())),
        None => Arc::new(MemoryQueueStore::with_history_cap(config.playback.history_cap)),
    };

    let mut admission = AdmissionPolicy::new(&config.admission);
    if let Some(pool) = &pool {
        let words = BannedWordRepository::new(pool.clone()).list().await?;
        info!(count = words.len(), "Loaded moderated words");
        admission.extend_banned_words(words);
    }

    let source = Arc::new(YtDlpSource::new(&config.acquisition)?);
    let acquisition = Arc::new(AcquisitionBackend::new(
        source,
        config.acquisition.egress.clone(),
    )?);
    info!(
        egress = config.acquisition.egress.len(),
        "Acquisition backend initialized"
    );

    let artifacts = ArtifactStore::new(
        config.segmenter.stream_dir.clone(),
        config.segmenter.manifest_name.clone(),
    );
    artifacts.prepare().await?;
    tokio::fs::create_dir_all(&config.segmenter.work_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.segmenter.work_dir.display()))?;

    let pipeline = Arc::new(StreamPipeline::new(
        Arc::clone(&acquisition),
        Arc::new(FfmpegTranscoder::new(&config.segmenter)),
        artifacts,
        config.segmenter.work_dir.clone(),
    ));

    let orchestrator = Orchestrator::new(
        store,
        acquisition,
        pipeline,
        admission,
        OrchestratorSettings::from_config(config),
    );
    orchestrator.refresh().await?;
    info!("Orchestrator initialized");

    let identity: Arc<dyn IdentityResolver> = match pool {
        Some(pool) if !config.server.allow_guests => {
            Arc::new(SessionIdentity::new(SessionRepository::new(pool)))
        }
        _ => {
            warn!("Guest identities enabled; clients choose their own id and name");
            Arc::new(GuestIdentity)
        }
    };

    Ok(Services {
        orchestrator,
        identity,
    })
}
