use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// An outbound request made by the observed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRequest {
    pub url: String,
    /// Milliseconds since the unix epoch at which the request was seen.
    pub timestamp_ms: i64,
}

impl ObservedRequest {
    pub fn new(url: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            url: url.into(),
            timestamp_ms,
        }
    }
}

/// A single isolated page in a browser process.
#[async_trait]
pub trait PageSession: Send {
    /// Forward every outbound request the page makes into `sink` until the
    /// session closes.
    async fn subscribe_requests(&mut self, sink: UnboundedSender<ObservedRequest>) -> Result<()>;

    /// Navigate and wait for the document to load, failing after `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Tear down the page and its browser process.
    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn PageSession>>;
}
