pub mod browser;
pub mod chromium;
pub mod record;

pub use browser::{BrowserLauncher, ObservedRequest, PageSession};
pub use chromium::ChromiumLauncher;
pub use record::{AttributionResult, ObservationRecords, UNKNOWN_PROVIDER};

use crate::{Error, Result, registry::ProviderRegistry};
use std::time::Duration;
use tokio::{
    sync::mpsc::{UnboundedReceiver, unbounded_channel},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_TARGET_URL: &str = "https://dydx.trade/trade/ETH-USD";
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_OBSERVATION_WINDOW: Duration = Duration::from_millis(20_000);

/// Watches a live page's outbound traffic to infer which provider serves it.
pub struct Observer<L> {
    launcher: L,
    target_url: String,
    navigation_timeout: Duration,
    window: Duration,
}

impl<L: BrowserLauncher> Observer<L> {
    pub fn new(
        launcher: L,
        target_url: impl Into<String>,
        navigation_timeout: Duration,
        window: Duration,
    ) -> Self {
        Self {
            launcher,
            target_url: target_url.into(),
            navigation_timeout,
            window,
        }
    }

    /// Open a page session, load the target page and collect requests for
    /// the full observation window, then attribute the traffic.
    ///
    /// The session is closed on every path out of this function once it has
    /// been opened, including cancellation through `shutdown`; setup,
    /// navigation and interruption errors are returned after teardown.
    pub async fn observe(
        &self,
        registry: &ProviderRegistry,
        shutdown: &CancellationToken,
    ) -> Result<AttributionResult> {
        info!(url = %self.target_url, "starting provider observation");

        let mut session = self.launcher.open_session().await?;
        let (sink, mut requests) = unbounded_channel();
        let mut records = ObservationRecords::new(registry.len());

        let outcome = {
            let window = async {
                session.subscribe_requests(sink).await?;

                info!(url = %self.target_url, "navigating to page");
                session
                    .navigate(&self.target_url, self.navigation_timeout)
                    .await?;

                info!(
                    window_ms = self.window.as_millis() as u64,
                    "page loaded, waiting for requests"
                );
                sleep(self.window).await;
                Ok::<_, Error>(())
            };
            tokio::pin!(window);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break Err(Error::Interrupted),
                    Some(request) = requests.recv() => record_request(registry, &mut records, &request),
                    result = &mut window => break result,
                }
            }
        };

        // Requests already delivered when the window closed still count.
        drain(registry, &mut records, &mut requests);

        info!("closing browser session");
        if let Err(err) = session.close().await {
            warn!(?err, "failed to close browser session");
        }

        outcome?;

        let attribution = records.attribute(registry);
        for (provider, count) in &attribution.request_counts {
            info!(%provider, requests = count, "provider request count");
        }
        info!(
            provider = attribution.provider_or_unknown(),
            total_requests = records.total(),
            "detected rpc provider"
        );

        Ok(attribution)
    }
}

fn record_request(
    registry: &ProviderRegistry,
    records: &mut ObservationRecords,
    request: &ObservedRequest,
) {
    if let Some(index) = registry.match_request(&request.url) {
        records.append(index, request.timestamp_ms);
    }
}

fn drain(
    registry: &ProviderRegistry,
    records: &mut ObservationRecords,
    requests: &mut UnboundedReceiver<ObservedRequest>,
) {
    while let Ok(request) = requests.try_recv() {
        record_request(registry, records, &request);
    }
}
