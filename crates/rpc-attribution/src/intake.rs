use crate::{Error, Result, report::IntakeRecord};
use async_trait::async_trait;
use mockall::automock;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

pub const DEFAULT_INTAKE_URL: &str = "https://http-intake.logs.ap1.datadoghq.com/v1/input";
pub const API_KEY_HEADER: &str = "DD-API-KEY";

const INTAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[automock]
#[async_trait]
pub trait LogIntake: Send + Sync {
    async fn send(&self, record: &IntakeRecord) -> Result<()>;
}

/// Datadog HTTP log intake.
#[derive(Debug, Clone)]
pub struct DatadogIntake {
    http: reqwest::Client,
    url: Url,
    api_key: Option<String>,
}

impl DatadogIntake {
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(INTAKE_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: Url::parse(url)?,
            api_key,
        })
    }
}

#[async_trait]
impl LogIntake for DatadogIntake {
    async fn send(&self, record: &IntakeRecord) -> Result<()> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(Error::Reporting("no intake api key configured".to_string()));
        };

        self.http
            .post(self.url.clone())
            .header(API_KEY_HEADER, api_key)
            .json(record)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| Error::Reporting(err.to_string()))?;

        Ok(())
    }
}

/// Send `record`, logging and swallowing any delivery failure.
pub async fn deliver_best_effort<I: LogIntake + ?Sized>(intake: &I, record: &IntakeRecord) -> bool {
    match intake.send(record).await {
        Ok(()) => {
            debug!(ddsource = %record.ddsource, "log record delivered");
            true
        }
        Err(err) => {
            error!(ddsource = %record.ddsource, error = %err, "failed to deliver log record");
            false
        }
    }
}
