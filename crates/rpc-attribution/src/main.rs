use anyhow::{Context, Result};
use clap::Parser;
use rpc_attribution::{
    coordinator::{InvocationEvent, InvocationOutput, RunCoordinator},
    intake::DatadogIntake,
    observer::{ChromiumLauncher, Observer},
    probe::{JsonRpcStatusClient, Prober},
    settings::Settings,
};
use std::{fs, path::PathBuf, process::ExitCode};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "rpc-attribution",
    about = "Detects which RPC provider the dYdX front-end uses and reports provider latency",
    version,
    author,
    after_help = r#"Configuration:
    Configuration can be provided via:
    1. Environment variables with RPC_ATTRIBUTION__ prefix (e.g., RPC_ATTRIBUTION__OBSERVER__WINDOW_MS)
    2. .env file in the current directory
    3. Config file with -c option
    AWS_REGION and DD_API_KEY are used when region and intake api key are not configured.

Examples:
    # One run with the default provider list
    rpc-attribution

    # Replay a scheduler event
    rpc-attribution --event event.json"#
)]
pub struct Cli {
    /// Path to the configuration file (TOML format)
    #[clap(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Invocation event (JSON) carrying `requestContext.requestId`
    #[clap(short = 'e', long, value_name = "FILE")]
    pub event: Option<PathBuf>,

    /// Request identifier, overrides the one in the event
    #[clap(long)]
    pub request_id: Option<String>,
}

impl Cli {
    fn event(&self) -> Result<InvocationEvent> {
        if let Some(request_id) = &self.request_id {
            return Ok(InvocationEvent::with_request_id(request_id));
        }

        match &self.event {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read event file {}", path.display()))?;
                serde_json::from_str(&raw).context("Failed to parse invocation event")
            }
            None => Ok(InvocationEvent::default()),
        }
    }

    async fn run(self) -> Result<InvocationOutput> {
        let settings = Settings::new(self.config.as_ref())?;
        init_logging(&settings.log_level)?;
        info!("{settings}");
        for warning in settings.warnings() {
            warn!("{warning}");
        }

        let event = self.event()?;
        let registry = settings.registry()?;

        let prober = Prober::new(
            JsonRpcStatusClient::new(settings.probe_timeout())?,
            settings.probe_timeout(),
        );
        let observer = Observer::new(
            ChromiumLauncher::new(settings.browser.clone(), settings.navigation_timeout()),
            settings.observer.target_url.clone(),
            settings.navigation_timeout(),
            settings.observation_window(),
        );
        let intake = DatadogIntake::new(&settings.intake.url, settings.intake.api_key.clone())?;

        let coordinator = RunCoordinator::new(
            registry,
            prober,
            observer,
            intake,
            settings.region(),
            settings.env.clone(),
        );

        let shutdown = shutdown_listener()?;
        Ok(coordinator.run(&event, &shutdown).await)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let output = cli.run().await?;

    println!("{}", serde_json::to_string(&output)?);

    Ok(if output.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn shutdown_listener() -> Result<CancellationToken> {
    let cancellation_token = CancellationToken::new();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM listener")?;
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = signal::ctrl_c() => {},
            }
            warn!("shutdown signal received, interrupting run");
            cancellation_token.cancel();
        }
    });

    Ok(cancellation_token)
}
