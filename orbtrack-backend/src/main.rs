use orbtrack_backend::config::{self, ConfigOrigin};
use orbtrack_backend::module::elements::ElementSetSource;
use orbtrack_backend::module::publisher::SnapshotPublisher;
use orbtrack_backend::module::scheduled::{ScheduledTaskConfig, ScheduledTaskManager};
use orbtrack_backend::module::track::TrackingPipeline;

use anyhow::{Context, Result};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (config, origin) = config::read_config(&config_path)?;

    // Initialize logging
    let _logging_guard =
        orbtrack_backend::logging::init_logging(&config.log_dir, "orbtrack-backend", &config.log_level)?;

    tracing::info!("Orbtrack backend starting...");
    if origin == ConfigOrigin::Defaults {
        tracing::warn!("Config file {} not found, using defaults", config_path);
    }
    tracing::info!(
        "Tracking groups {:?}, {} observers, publishing to {}",
        config.acquisition.groups,
        config.observers.len(),
        config.output_dir
    );

    let source = ElementSetSource::from_config(&config.acquisition)
        .context("Failed to initialize element-set sources")?;
    tracing::info!("Element-set sources: {:?}", source.source_names());

    let pipeline = TrackingPipeline::from_config(config).context("Invalid tracking configuration")?;
    let publisher = SnapshotPublisher::new(&config.output_dir);
    publisher.ensure_output_dir().await?;

    let mut task_manager = ScheduledTaskManager::new(
        ScheduledTaskConfig::from(config),
        pipeline,
        source,
        publisher,
    );
    task_manager.start_all()?;
    tracing::info!("All scheduled tasks started successfully");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    task_manager.shutdown().await;

    Ok(())
}
