use anyhow::Context;
use reel_config::load_config;
use reel_config::shared::WorkerConfig;

/// Loads and validates the worker configuration.
pub fn load_worker_config() -> anyhow::Result<WorkerConfig> {
    let config = load_config::<WorkerConfig>().context("failed to load worker configuration")?;
    config
        .validate()
        .context("invalid worker configuration")?;

    Ok(config)
}
