pub mod client;

pub use client::{JsonRpcStatusClient, StatusClient, StatusResponse};

use crate::{Error, registry::ProviderRegistry};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::{fmt, time::Duration};
use tokio::time::{Instant, timeout};
use tracing::{info, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5_000);

const UNREACHABLE: &str = "unreachable";
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Latency {
    Millis(u64),
    Unreachable,
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Latency::Millis(ms) => write!(f, "{ms}"),
            Latency::Unreachable => f.write_str(UNREACHABLE),
        }
    }
}

impl Serialize for Latency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Latency::Millis(ms) => serializer.serialize_u64(*ms),
            Latency::Unreachable => serializer.serialize_str(UNREACHABLE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockHeight {
    Reported(u64),
    Unknown,
    Unreachable,
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockHeight::Reported(height) => write!(f, "{height}"),
            BlockHeight::Unknown => f.write_str(UNKNOWN),
            BlockHeight::Unreachable => f.write_str(UNREACHABLE),
        }
    }
}

impl Serialize for BlockHeight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockHeight::Reported(height) => serializer.serialize_u64(*height),
            BlockHeight::Unknown => serializer.serialize_str(UNKNOWN),
            BlockHeight::Unreachable => serializer.serialize_str(UNREACHABLE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub latency: Latency,
    pub block_height: BlockHeight,
}

impl ProbeResult {
    pub const UNREACHABLE: Self = Self {
        latency: Latency::Unreachable,
        block_height: BlockHeight::Unreachable,
    };

    pub fn responded(latency_ms: u64, block_height: BlockHeight) -> Self {
        Self {
            latency: Latency::Millis(latency_ms),
            block_height,
        }
    }
}

/// A provider whose probe failed; kept so the failure can be reported separately.
#[derive(Debug)]
pub struct ProbeFailure {
    pub provider: String,
    pub error: Error,
}

/// One probe result per registered provider, in registry order.
#[derive(Debug, Default)]
pub struct ProbeResults {
    results: IndexMap<String, ProbeResult>,
    failures: Vec<ProbeFailure>,
}

impl ProbeResults {
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (String, ProbeResult)>,
    {
        Self {
            results: results.into_iter().collect(),
            failures: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, provider: &str) -> Option<&ProbeResult> {
        self.results.get(provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProbeResult)> {
        self.results.iter().map(|(name, result)| (name.as_str(), result))
    }

    pub fn failures(&self) -> &[ProbeFailure] {
        &self.failures
    }

    pub fn latencies(&self) -> IndexMap<String, Latency> {
        self.results
            .iter()
            .map(|(name, result)| (name.clone(), result.latency))
            .collect()
    }

    pub fn block_heights(&self) -> IndexMap<String, BlockHeight> {
        self.results
            .iter()
            .map(|(name, result)| (name.clone(), result.block_height))
            .collect()
    }
}

/// Fans one `status` call out to every registered endpoint.
pub struct Prober<C> {
    client: C,
    timeout: Duration,
}

impl<C: StatusClient> Prober<C> {
    pub fn new(client: C, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Probe every endpoint concurrently; a failing endpoint is recorded as
    /// unreachable and never affects the others.
    pub async fn probe_all(&self, registry: &ProviderRegistry) -> ProbeResults {
        info!(providers = registry.len(), "probing providers");

        let outcomes = join_all(
            registry
                .iter()
                .map(|(host, name)| async move { (name, self.probe_one(host, name).await) }),
        )
        .await;

        let mut probe_results = ProbeResults::default();
        for (name, outcome) in outcomes {
            let result = match outcome {
                Ok(result) => result,
                Err(error) => {
                    probe_results.failures.push(ProbeFailure {
                        provider: name.to_string(),
                        error,
                    });
                    ProbeResult::UNREACHABLE
                }
            };
            probe_results.results.insert(name.to_string(), result);
        }

        info!(
            providers = probe_results.len(),
            failed = probe_results.failures.len(),
            "finished probing providers"
        );

        probe_results
    }

    async fn probe_one(&self, host: &str, name: &str) -> Result<ProbeResult, Error> {
        let start = Instant::now();

        let response = match timeout(self.timeout, self.client.status(host)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(provider = name, %host, error = %err, "provider probe failed");
                return Err(Error::Probe {
                    host: host.to_string(),
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                warn!(provider = name, %host, timeout_ms = self.timeout.as_millis() as u64, "provider probe timed out");
                return Err(Error::Probe {
                    host: host.to_string(),
                    reason: format!("timed out after {}ms", self.timeout.as_millis()),
                });
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        let block_height = response.block_height();
        info!(provider = name, latency_ms, %block_height, "provider responded");

        Ok(ProbeResult::responded(latency_ms, block_height))
    }
}
