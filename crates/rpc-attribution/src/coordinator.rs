use crate::{
    Error,
    intake::{LogIntake, deliver_best_effort},
    observer::{BrowserLauncher, Observer},
    probe::{Prober, StatusClient},
    registry::ProviderRegistry,
    report::{IntakeRecord, RunMetadata, RunReport, build_report, source},
};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const UNKNOWN_REQUEST_ID: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Probing,
    Observing,
    Reporting,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Probing => "probing",
            Stage::Observing => "observing",
            Stage::Reporting => "reporting",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    /// `ddsource` of the error record emitted when a run fails in this stage
    /// with `error`.
    pub fn failure_source(&self, error: &Error) -> &'static str {
        match (self, error) {
            (_, Error::Interrupted) => source::LAMBDA_ERROR,
            (Stage::Observing, _) => source::PUPPETEER_ERROR,
            _ => source::LAMBDA_ERROR,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invocation event; only the request context identifier is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    #[serde(default)]
    pub request_context: Option<RequestContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub request_id: Option<String>,
}

impl InvocationEvent {
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_context: Some(RequestContext {
                request_id: Some(request_id.into()),
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        self.request_context
            .as_ref()
            .and_then(|context| context.request_id.as_deref())
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_REQUEST_ID)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InvocationOutput {
    Success,
    Error { message: String },
}

impl InvocationOutput {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutput::Success)
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: Error,
}

/// Runs probing, observation and reporting once per invocation.
pub struct RunCoordinator<C, L, I> {
    registry: ProviderRegistry,
    prober: Prober<C>,
    observer: Observer<L>,
    intake: I,
    region: String,
    env: String,
}

impl<C, L, I> RunCoordinator<C, L, I>
where
    C: StatusClient,
    L: BrowserLauncher,
    I: LogIntake,
{
    pub fn new(
        registry: ProviderRegistry,
        prober: Prober<C>,
        observer: Observer<L>,
        intake: I,
        region: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            prober,
            observer,
            intake,
            region: region.into(),
            env: env.into(),
        }
    }

    /// Execute one attribution run. Always yields a status; failures are
    /// reported to the log intake on a best-effort basis. Cancelling
    /// `shutdown` fails the run in its current stage after the browser
    /// session has been released.
    pub async fn run(
        &self,
        event: &InvocationEvent,
        shutdown: &CancellationToken,
    ) -> InvocationOutput {
        let metadata = RunMetadata {
            region: self.region.clone(),
            request_id: event.request_id().to_string(),
            env: self.env.clone(),
            started_at: Utc::now(),
        };

        info!(
            request_id = %metadata.request_id,
            region = %metadata.region,
            "starting provider attribution run"
        );

        let stage = Mutex::new(Stage::Start);
        let outcome = AssertUnwindSafe(self.execute(&metadata, &stage, shutdown))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(StageFailure {
                    stage: current(&stage),
                    error: Error::Unexpected(panic_message(panic.as_ref())),
                })
            });

        match outcome {
            Ok(report) => {
                info!(
                    region = %report.metadata.region,
                    provider = report.provider_or_unknown(),
                    latency = %report.detected_latency,
                    "provider attribution run complete"
                );
                InvocationOutput::Success
            }
            Err(StageFailure { stage: failed, error }) => {
                advance(&stage, Stage::Failed);
                error!(stage = %failed, error = %error, "provider attribution run failed");

                let message = error.to_string();
                let record = IntakeRecord::stage_failure(
                    &metadata,
                    failed.failure_source(&error),
                    failed.as_str(),
                    &message,
                );
                deliver_best_effort(&self.intake, &record).await;

                InvocationOutput::Error { message }
            }
        }
    }

    async fn execute(
        &self,
        metadata: &RunMetadata,
        stage: &Mutex<Stage>,
        shutdown: &CancellationToken,
    ) -> Result<RunReport, StageFailure> {
        advance(stage, Stage::Probing);
        let probe_results = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!("shutdown requested while probing");
                return Err(StageFailure {
                    stage: Stage::Probing,
                    error: Error::Interrupted,
                });
            }
            probe_results = self.prober.probe_all(&self.registry) => probe_results,
        };
        for (provider, result) in probe_results.iter() {
            info!(
                %provider,
                latency = %result.latency,
                block_height = %result.block_height,
                "probe result"
            );
        }
        for failure in probe_results.failures() {
            let record = IntakeRecord::probe_failure(
                metadata,
                &failure.provider,
                &failure.error.to_string(),
            );
            deliver_best_effort(&self.intake, &record).await;
        }

        advance(stage, Stage::Observing);
        let attribution = self
            .observer
            .observe(&self.registry, shutdown)
            .await
            .map_err(|error| StageFailure {
                stage: Stage::Observing,
                error,
            })?;

        advance(stage, Stage::Reporting);
        let report = build_report(metadata, &probe_results, &attribution);
        info!(
            region = %metadata.region,
            provider = report.provider_or_unknown(),
            latency = %report.detected_latency,
            "detected rpc provider"
        );
        deliver_best_effort(&self.intake, &IntakeRecord::from_report(&report)).await;

        advance(stage, Stage::Done);
        Ok(report)
    }
}

fn advance(stage: &Mutex<Stage>, next: Stage) {
    if let Ok(mut current) = stage.lock() {
        debug!(from = %*current, to = %next, "run stage transition");
        *current = next;
    }
}

fn current(stage: &Mutex<Stage>) -> Stage {
    stage.lock().map(|stage| *stage).unwrap_or(Stage::Start)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "stage panicked".to_string()
    }
}
