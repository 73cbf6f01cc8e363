#![allow(dead_code)]

use async_trait::async_trait;
use rpc_attribution::{
    Error, Result,
    intake::LogIntake,
    observer::{BrowserLauncher, ObservedRequest, PageSession},
    probe::{StatusClient, StatusResponse},
    registry::{ProviderEndpoint, ProviderRegistry},
    report::IntakeRecord,
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time::sleep,
};

pub fn registry(entries: &[(&str, &str)]) -> ProviderRegistry {
    ProviderRegistry::new(
        entries
            .iter()
            .map(|(host, name)| ProviderEndpoint::new(*host, *name)),
    )
    .unwrap()
}

/// Status client answering each host after a fixed delay; unknown hosts fail.
#[derive(Debug, Clone, Default)]
pub struct DelayedStatusClient {
    responses: HashMap<String, (Duration, u64)>,
}

impl DelayedStatusClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responds(mut self, host: &str, delay: Duration, height: u64) -> Self {
        self.responses.insert(host.to_string(), (delay, height));
        self
    }
}

#[async_trait]
impl StatusClient for DelayedStatusClient {
    async fn status(&self, host: &str) -> Result<StatusResponse> {
        let Some((delay, height)) = self.responses.get(host).copied() else {
            return Err(Error::Unexpected(format!("connection refused by {host}")));
        };
        sleep(delay).await;
        Ok(StatusResponse::with_height(json!(height.to_string())))
    }
}

/// Log intake keeping every record it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingIntake {
    records: Arc<Mutex<Vec<IntakeRecord>>>,
    reject: bool,
}

impl RecordingIntake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every submission but reports each one as failed.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<IntakeRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn with_source(&self, ddsource: &str) -> Vec<IntakeRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.ddsource == ddsource)
            .collect()
    }
}

#[async_trait]
impl LogIntake for RecordingIntake {
    async fn send(&self, record: &IntakeRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        if self.reject {
            return Err(Error::Reporting("503 Service Unavailable".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Navigation {
    Loads,
    Fails(String),
    /// Hangs until the navigation budget runs out.
    Stalls,
}

/// What one fake page does once opened.
#[derive(Debug, Clone)]
pub struct PageScript {
    pub navigation: Navigation,
    /// Emitted while the page loads, before navigation returns.
    pub during_load: Vec<ObservedRequest>,
    /// Emitted after load, each at its offset from the end of navigation.
    pub after_load: Vec<(Duration, ObservedRequest)>,
}

impl PageScript {
    pub fn loads() -> Self {
        Self {
            navigation: Navigation::Loads,
            during_load: Vec::new(),
            after_load: Vec::new(),
        }
    }

    pub fn with_navigation(mut self, navigation: Navigation) -> Self {
        self.navigation = navigation;
        self
    }

    pub fn request(mut self, url: &str, timestamp_ms: i64) -> Self {
        self.during_load.push(ObservedRequest::new(url, timestamp_ms));
        self
    }

    pub fn request_after(mut self, offset: Duration, url: &str, timestamp_ms: i64) -> Self {
        self.after_load
            .push((offset, ObservedRequest::new(url, timestamp_ms)));
        self
    }
}

/// Browser launcher replaying a `PageScript`, counting sessions opened and closed.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    script: PageScript,
    launch_error: Option<String>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            launch_error: None,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            launch_error: Some(reason.to_string()),
            ..Self::new(PageScript::loads())
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn open_session(&self) -> Result<Box<dyn PageSession>> {
        if let Some(reason) = &self.launch_error {
            return Err(Error::Session(reason.clone()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            sink: None,
            emitter: None,
            closed: self.closed.clone(),
        }))
    }
}

struct ScriptedSession {
    script: PageScript,
    sink: Option<UnboundedSender<ObservedRequest>>,
    emitter: Option<JoinHandle<()>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PageSession for ScriptedSession {
    async fn subscribe_requests(&mut self, sink: UnboundedSender<ObservedRequest>) -> Result<()> {
        self.sink = Some(sink);
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        if let Some(sink) = &self.sink {
            for request in &self.script.during_load {
                let _ = sink.send(request.clone());
            }
        }

        match &self.script.navigation {
            Navigation::Loads => {}
            Navigation::Fails(reason) => {
                return Err(Error::Navigation {
                    url: url.to_string(),
                    reason: reason.clone(),
                });
            }
            Navigation::Stalls => {
                sleep(timeout).await;
                return Err(Error::NavigationTimeout {
                    url: url.to_string(),
                    timeout,
                });
            }
        }

        if let Some(sink) = self.sink.clone() {
            let after_load = self.script.after_load.clone();
            self.emitter = Some(tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                for (offset, request) in after_load {
                    sleep(offset.saturating_sub(elapsed)).await;
                    elapsed = elapsed.max(offset);
                    let _ = sink.send(request);
                }
            }));
        }

        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if let Some(emitter) = &self.emitter {
            emitter.abort();
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One HTTP request as received by `serve_once`.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: String,
}

impl CapturedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Accept a single connection on a local port, answer it with `status` and
/// `body`, and hand back what the client sent.
pub async fn serve_once(status: u16, body: &str) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        let (head, body_start) = loop {
            let read = stream.read(&mut buf).await.unwrap();
            assert!(read > 0, "connection closed before headers were sent");
            raw.extend_from_slice(&buf[..read]);
            if let Some(pos) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
                break (String::from_utf8_lossy(&raw[..pos]).to_string(), pos + 4);
            }
        };

        let content_length = head
            .lines()
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        while raw.len() < body_start + content_length {
            let read = stream.read(&mut buf).await.unwrap();
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..read]);
        }
        let request_body = String::from_utf8_lossy(&raw[body_start..]).to_string();

        let response = format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            reason_phrase(status),
            body.len(),
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();

        CapturedRequest {
            head,
            body: request_body,
        }
    });

    (addr, handle)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        403 => "Forbidden",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
