use chromiumoxide::error::CdpError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("probe of {host} failed: {reason}")]
    Probe { host: String, reason: String },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("navigation to {url} timed out after {}ms", timeout.as_millis())]
    NavigationTimeout { url: String, timeout: Duration },
    #[error("browser session error: {0}")]
    Session(String),
    #[error("log intake delivery failed: {0}")]
    Reporting(String),
    #[error("run interrupted by shutdown signal")]
    Interrupted,
    #[error("unexpected run failure: {0}")]
    Unexpected(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<CdpError> for Error {
    fn from(err: CdpError) -> Self {
        Error::Session(err.to_string())
    }
}
