pub mod validation;

use crate::{
    intake::DEFAULT_INTAKE_URL,
    observer::{DEFAULT_NAVIGATION_TIMEOUT, DEFAULT_OBSERVATION_WINDOW, DEFAULT_TARGET_URL},
    probe::DEFAULT_PROBE_TIMEOUT,
    registry::{DYDX_MAINNET_PROVIDERS, ProviderEndpoint, ProviderRegistry},
};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{env, fmt, path::Path, path::PathBuf, time::Duration};
use validation::validate_config;

pub const ENV_PREFIX: &str = "RPC_ATTRIBUTION";
pub const REGION_FALLBACK_ENV: &str = "AWS_REGION";
pub const API_KEY_FALLBACK_ENV: &str = "DD_API_KEY";
pub const UNKNOWN_REGION: &str = "unknown";

/// Main settings for a provider-attribution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level for application logging (e.g., "info", "debug", "warn", "error")
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Execution region reported with every record; falls back to AWS_REGION
    #[serde(default)]
    pub region: Option<String>,
    /// Deployment environment tag (`env:<value>` in ddtags)
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub observer: ObserverSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub intake: IntakeSettings,
    /// Candidate RPC endpoints in attribution order
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Per-endpoint budget for the `status` call
    pub timeout_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverSettings {
    /// Page whose outbound traffic is attributed
    pub target_url: String,
    pub navigation_timeout_ms: u64,
    /// Fixed collection window after the page has loaded
    pub window_ms: u64,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT.as_millis() as u64,
            window_ms: DEFAULT_OBSERVATION_WINDOW.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Chromium binary; auto-detected when unset
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_true")]
    pub ignore_https_errors: bool,
    /// Extra command line flags passed to chromium
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            ignore_https_errors: true,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSettings {
    /// HTTP log intake endpoint
    pub url: String,
    /// Intake API key; falls back to DD_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_INTAKE_URL.to_string(),
            api_key: None,
        }
    }
}

impl Settings {
    /// Load from an optional config file, then `RPC_ATTRIBUTION__*` environment
    /// variables (which take priority), then validate.
    pub fn new<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        // NOTE: It's ok if this fails (file might not exist)
        let _ = dotenvy::dotenv();

        let mut settings = Self::load(path, environment())?;
        settings.apply_env_fallbacks(|key| env::var(key).ok());
        validate_config(&settings)?;

        Ok(settings)
    }

    fn load<P: AsRef<Path>>(path: Option<P>, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(file) = path {
            builder = builder.add_source(File::with_name(&file.as_ref().to_string_lossy()));
        }

        builder
            .add_source(environment)
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Problems that do not stop a run but should be surfaced once logging is up.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.intake.api_key.is_none() {
            warnings.push(format!(
                "no intake api key configured (set {ENV_PREFIX}__INTAKE__API_KEY or {API_KEY_FALLBACK_ENV}); log delivery will be skipped"
            ));
        }
        warnings
    }

    /// Fill region and API key from the conventional environment variables
    /// when they were not configured explicitly.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.region.as_deref().is_none_or(str::is_empty) {
            self.region = lookup(REGION_FALLBACK_ENV).filter(|region| !region.is_empty());
        }
        if self.intake.api_key.as_deref().is_none_or(str::is_empty) {
            self.intake.api_key = lookup(API_KEY_FALLBACK_ENV).filter(|key| !key.is_empty());
        }
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(UNKNOWN_REGION)
    }

    pub fn registry(&self) -> crate::Result<ProviderRegistry> {
        ProviderRegistry::new(self.providers.iter().cloned())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.observer.navigation_timeout_ms)
    }

    pub fn observation_window(&self) -> Duration {
        Duration::from_millis(self.observer.window_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            region: None,
            env: default_env(),
            probe: ProbeSettings::default(),
            observer: ObserverSettings::default(),
            browser: BrowserSettings::default(),
            intake: IntakeSettings::default(),
            providers: default_providers(),
        }
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers = self
            .providers
            .iter()
            .map(|p| format!("{}={}", p.name, p.host))
            .collect::<Vec<_>>()
            .join(", ");

        write!(
            f,
            "Settings {{\n\
             \tRegion: {}\n\
             \tEnv: {}\n\
             \tProbe timeout: {}ms\n\
             \tTarget: {} (navigation {}ms, window {}ms)\n\
             \tIntake: {} (api key {})\n\
             \tProviders: [{}]\n\
             }}",
            self.region(),
            self.env,
            self.probe.timeout_ms,
            self.observer.target_url,
            self.observer.navigation_timeout_ms,
            self.observer.window_ms,
            self.intake.url,
            if self.intake.api_key.is_some() {
                "set"
            } else {
                "missing"
            },
            providers,
        )
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("browser.args")
        .try_parsing(true)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_env() -> String {
    "prod".to_string()
}

fn default_true() -> bool {
    true
}

fn default_providers() -> Vec<ProviderEndpoint> {
    DYDX_MAINNET_PROVIDERS
        .iter()
        .map(|(host, name)| ProviderEndpoint::new(*host, *name))
        .collect()
}
