use crate::{
    Error, Result,
    observer::browser::{BrowserLauncher, ObservedRequest, PageSession},
    settings::BrowserSettings,
};
use async_trait::async_trait;
use chromiumoxide::{
    Browser, BrowserConfig, Page,
    cdp::browser_protocol::{
        network::EventRequestWillBeSent,
        page::{EventDomContentEventFired, NavigateParams},
    },
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::{future::Future, time::Duration};
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

// CDP commands must outlive the slowest navigation we allow.
const COMMAND_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Launches a headless Chromium process per session.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    settings: BrowserSettings,
    command_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings, navigation_timeout: Duration) -> Self {
        Self {
            settings,
            command_timeout: navigation_timeout + COMMAND_TIMEOUT_MARGIN,
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.command_timeout)
            .args(self.settings.args.iter());

        if !self.settings.headless {
            builder = builder.with_head();
        }
        if !self.settings.ignore_https_errors {
            builder = builder.respect_https_errors();
        }
        if let Some(executable) = &self.settings.executable {
            builder = builder.chrome_executable(executable);
        }

        builder.build().map_err(Error::Session)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn open_session(&self) -> Result<Box<dyn PageSession>> {
        let (mut browser, mut handler) = Browser::launch(self.browser_config()?).await?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(?err, "browser handler error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                if let Err(close_err) = browser.close().await {
                    warn!(?close_err, "failed to close browser after page creation error");
                }
                handler_task.abort();
                return Err(err.into());
            }
        };

        info!("browser launched and new page created");

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            listener_task: None,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    listener_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn subscribe_requests(&mut self, sink: UnboundedSender<ObservedRequest>) -> Result<()> {
        let mut events = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await?;

        self.listener_task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let request =
                    ObservedRequest::new(event.request.url.clone(), Utc::now().timestamp_millis());
                if sink.send(request).is_err() {
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn navigate(&mut self, url: &str, navigation_timeout: Duration) -> Result<()> {
        // Subscribed before navigating so the event cannot be missed.
        let dom_content = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await?;

        let page = &self.page;
        let navigation = async move {
            page.execute(NavigateParams::new(url))
                .await
                .map(|response| response.result.error_text)
                .map_err(|err| Error::Navigation {
                    url: url.to_string(),
                    reason: err.to_string(),
                })
        };

        wait_for_dom_content(url, navigation, dom_content, navigation_timeout).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumSession {
            mut browser,
            page: _,
            handler_task,
            listener_task,
        } = *self;

        if let Some(listener_task) = listener_task {
            listener_task.abort();
        }

        let closed = browser.close().await;
        if closed.is_ok()
            && let Err(err) = browser.wait().await
        {
            warn!(?err, "failed waiting for browser process to exit");
        }
        handler_task.abort();

        closed?;
        info!("browser closed");
        Ok(())
    }
}

/// Drive `navigation` (resolving to the CDP `errorText`, if any) and then wait
/// for the first `DOMContentLoaded`, all within `budget`. Subresources that
/// never finish loading do not hold navigation up.
async fn wait_for_dom_content<N, S>(
    url: &str,
    navigation: N,
    dom_content: S,
    budget: Duration,
) -> Result<()>
where
    N: Future<Output = Result<Option<String>>>,
    S: Stream,
{
    let loaded = async {
        if let Some(reason) = navigation.await? {
            return Err(Error::Navigation {
                url: url.to_string(),
                reason,
            });
        }

        tokio::pin!(dom_content);
        match dom_content.next().await {
            Some(_) => Ok(()),
            None => Err(Error::Navigation {
                url: url.to_string(),
                reason: "page closed before DOMContentLoaded".to_string(),
            }),
        }
    };

    match timeout(budget, loaded).await {
        Ok(result) => result,
        Err(_) => Err(Error::NavigationTimeout {
            url: url.to_string(),
            timeout: budget,
        }),
    }
}
