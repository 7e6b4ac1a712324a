//! Client of the launcher discovery protocol
//!
//! A launcher joins a cluster by sending a join request to the master
//! and then keeps polling the master until enough peers showed up.
use std::time::Duration;

use reqwest::{Response, StatusCode};
use starterd_api::{ErrorBody, JoinRequest, PeerDirectory, HELLO_PATH};
use thiserror::Error;
use tracing::{debug, trace};

pub use starterd_api as api;

#[derive(Error, Debug)]
pub enum Error {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("rejected with {status}: {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("invalid response: {0}")]
    Decoding(#[source] reqwest::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decoding(e)
        } else {
            Self::Transport(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client talking to one launcher
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    url: String,
}

impl Client {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a client for the launcher at `addr` (`host:port`)
    ///
    /// Every request is bounded by `timeout`.
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: format!("http://{addr}{HELLO_PATH}"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current peer directory
    pub async fn hello(&self) -> Result<PeerDirectory> {
        trace!(url = %self.url, "Fetching peer directory");
        let res = self.http.get(&self.url).send().await?;
        Self::parse_directory(res).await
    }

    /// Register a launcher working in `directory`
    ///
    /// On success returns all the peers registered so far, with the
    /// new one last.
    pub async fn join(&self, directory: &str) -> Result<PeerDirectory> {
        debug!(url = %self.url, directory, "Sending join request");
        let res = self
            .http
            .post(&self.url)
            .json(&JoinRequest::new(directory))
            .send()
            .await?;
        Self::parse_directory(res).await
    }

    async fn parse_directory(res: Response) -> Result<PeerDirectory> {
        let status = res.status();
        if !status.is_success() {
            let message = match res.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("unknown").to_owned(),
            };
            return Err(Error::Rejected { status, message });
        }
        Ok(res.json().await?)
    }
}
