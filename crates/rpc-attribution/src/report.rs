use crate::{
    observer::{AttributionResult, UNKNOWN_PROVIDER},
    probe::{BlockHeight, Latency, ProbeResults},
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// `ddsource` values understood by the alerting side.
pub mod source {
    pub const CUSTOM_CHECKER: &str = "custom-checker";
    pub const PING_ERROR: &str = "ping_error";
    pub const PUPPETEER_ERROR: &str = "puppeteer_error";
    pub const LAMBDA_ERROR: &str = "lambda_error";
}

/// Identity of one invocation, attached to every record it emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub region: String,
    pub request_id: String,
    pub env: String,
    pub started_at: DateTime<Utc>,
}

/// Latency of the detected provider: the probe's value, or unknown when the
/// detected provider was never probed (including no detection at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedLatency {
    Probed(Latency),
    Unknown,
}

impl fmt::Display for DetectedLatency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectedLatency::Probed(latency) => write!(f, "{latency}"),
            DetectedLatency::Unknown => f.write_str(UNKNOWN_PROVIDER),
        }
    }
}

impl Serialize for DetectedLatency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DetectedLatency::Probed(latency) => latency.serialize(serializer),
            DetectedLatency::Unknown => serializer.serialize_str(UNKNOWN_PROVIDER),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub detected_provider: Option<String>,
    pub detected_latency: DetectedLatency,
    pub latencies: IndexMap<String, Latency>,
    pub block_heights: IndexMap<String, BlockHeight>,
    pub request_counts: IndexMap<String, usize>,
}

/// Merge probe and observation outputs into the report for one run.
pub fn build_report(
    metadata: &RunMetadata,
    probe_results: &ProbeResults,
    attribution: &AttributionResult,
) -> RunReport {
    let detected_latency = attribution
        .detected_provider
        .as_deref()
        .and_then(|provider| probe_results.get(provider))
        .map_or(DetectedLatency::Unknown, |result| {
            DetectedLatency::Probed(result.latency)
        });

    RunReport {
        metadata: metadata.clone(),
        detected_provider: attribution.detected_provider.clone(),
        detected_latency,
        latencies: probe_results.latencies(),
        block_heights: probe_results.block_heights(),
        request_counts: attribution.request_counts.clone(),
    }
}

impl RunReport {
    pub fn provider_or_unknown(&self) -> &str {
        self.detected_provider.as_deref().unwrap_or(UNKNOWN_PROVIDER)
    }

    pub fn message(&self) -> String {
        format!(
            "Region: {}, RPC provider: {}, latency: {}ms, latencies: {}, block heights: {}, request_counts: {}",
            self.metadata.region,
            self.provider_or_unknown(),
            self.detected_latency,
            to_json(&self.latencies),
            to_json(&self.block_heights),
            to_json(&self.request_counts),
        )
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Info,
    Error,
}

/// Body of one log intake submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntakeRecord {
    pub message: String,
    pub ddsource: String,
    pub ddtags: String,
    pub status: LogStatus,
    pub region: String,
    pub provider: Option<String>,
    pub latency_ms: Option<DetectedLatency>,
    pub latencies: Option<IndexMap<String, Latency>>,
    pub block_heights: Option<IndexMap<String, BlockHeight>>,
    pub request_counts: Option<IndexMap<String, usize>>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    /// Start of the run that produced this record.
    pub timestamp: DateTime<Utc>,
}

impl IntakeRecord {
    /// The run's single success record.
    pub fn from_report(report: &RunReport) -> Self {
        let metadata = &report.metadata;
        let provider = report.provider_or_unknown();

        Self {
            message: report.message(),
            ddsource: source::CUSTOM_CHECKER.to_string(),
            ddtags: ddtags(&[
                ("env", metadata.env.as_str()),
                ("provider", provider),
                ("region", metadata.region.as_str()),
            ]),
            status: LogStatus::Info,
            region: metadata.region.clone(),
            provider: Some(provider.to_string()),
            latency_ms: Some(report.detected_latency),
            latencies: Some(report.latencies.clone()),
            block_heights: Some(report.block_heights.clone()),
            request_counts: Some(report.request_counts.clone()),
            request_id: Some(metadata.request_id.clone()),
            timestamp: metadata.started_at,
        }
    }

    /// A provider that could not be probed.
    pub fn probe_failure(metadata: &RunMetadata, provider: &str, reason: &str) -> Self {
        Self {
            message: format!("Error pinging provider {provider}: {reason}"),
            ddsource: source::PING_ERROR.to_string(),
            ddtags: ddtags(&[
                ("env", metadata.env.as_str()),
                ("provider", provider),
                ("region", metadata.region.as_str()),
            ]),
            provider: Some(provider.to_string()),
            ..Self::error_base(metadata)
        }
    }

    /// A run that failed in `stage`.
    pub fn stage_failure(
        metadata: &RunMetadata,
        ddsource: &str,
        stage: &str,
        message: &str,
    ) -> Self {
        Self {
            message: format!("Error in {stage}: {message}"),
            ddsource: ddsource.to_string(),
            ddtags: ddtags(&[
                ("env", metadata.env.as_str()),
                ("region", metadata.region.as_str()),
                ("stage", stage),
            ]),
            ..Self::error_base(metadata)
        }
    }

    fn error_base(metadata: &RunMetadata) -> Self {
        Self {
            message: String::new(),
            ddsource: String::new(),
            ddtags: String::new(),
            status: LogStatus::Error,
            region: metadata.region.clone(),
            provider: None,
            latency_ms: None,
            latencies: None,
            block_heights: None,
            request_counts: None,
            request_id: Some(metadata.request_id.clone()),
            timestamp: metadata.started_at,
        }
    }
}

fn ddtags(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}:{value}"))
        .collect::<Vec<_>>()
        .join(",")
}
