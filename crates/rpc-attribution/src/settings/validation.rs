use crate::settings::Settings;
use anyhow::{Result, bail};
use std::ops::RangeInclusive;

pub const OBSERVATION_WINDOW_RANGE_MS: RangeInclusive<u64> = 10_000..=20_000;

/// Validate the configuration values
pub fn validate_config(settings: &Settings) -> Result<()> {
    // Validate log level
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        bail!(
            "Invalid log level '{}'. Valid options are: {:?}",
            settings.log_level,
            valid_log_levels
        );
    }

    if settings.env.is_empty() {
        bail!("Environment tag cannot be empty");
    }

    // Validate probe settings
    if settings.probe.timeout_ms == 0 {
        bail!("Probe timeout_ms must be greater than 0");
    }

    // Validate observer settings
    if !settings.observer.target_url.starts_with("http://")
        && !settings.observer.target_url.starts_with("https://")
    {
        bail!("Observer target_url must start with http:// or https://");
    }

    if settings.observer.navigation_timeout_ms == 0 {
        bail!("Observer navigation_timeout_ms must be greater than 0");
    }

    if !OBSERVATION_WINDOW_RANGE_MS.contains(&settings.observer.window_ms) {
        bail!(
            "Observer window_ms must be between {} and {}, got {}",
            OBSERVATION_WINDOW_RANGE_MS.start(),
            OBSERVATION_WINDOW_RANGE_MS.end(),
            settings.observer.window_ms
        );
    }

    // Validate intake settings
    if !settings.intake.url.starts_with("https://") && !settings.intake.url.starts_with("http://")
    {
        bail!("Intake url must start with http:// or https://");
    }

    // Validate providers
    if let Err(err) = settings.registry() {
        bail!("Invalid providers: {err}");
    }

    Ok(())
}
