//! Plain-HTTP side of the packager: the status probe and text downloads.

use crate::config::{AttachEndpoint, Timings};
use crate::error::{AttachError, FetchError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Body returned by `GET /status` on a healthy packager.
pub const STATUS_RUNNING: &str = "packager-status:running";

#[async_trait]
pub trait PackagerProbe: Send + Sync {
    /// Resolves once a packager answers at `endpoint`, otherwise fails with
    /// [`AttachError::PackagerUnreachable`].
    async fn ensure_reachable(&self, endpoint: &AttachEndpoint) -> Result<(), AttachError>;
}

#[derive(Debug, Clone)]
pub struct HttpPackagerProbe {
    http: reqwest::Client,
    attempts: u32,
    interval: Duration,
    timeout: Duration,
}

impl HttpPackagerProbe {
    pub fn new(timings: &Timings) -> Self {
        Self {
            http: reqwest::Client::new(),
            attempts: timings.probe_attempts.max(1),
            interval: timings.probe_interval,
            timeout: timings.probe_timeout,
        }
    }

    async fn is_running(&self, status_url: &str) -> bool {
        let response = match self.http.get(status_url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(target: "rn_bridge::packager", url = status_url, error = %err, "status probe failed");
                return false;
            }
        };
        match response.text().await {
            Ok(body) => body.trim() == STATUS_RUNNING,
            Err(err) => {
                debug!(target: "rn_bridge::packager", url = status_url, error = %err, "status body unreadable");
                false
            }
        }
    }
}

#[async_trait]
impl PackagerProbe for HttpPackagerProbe {
    async fn ensure_reachable(&self, endpoint: &AttachEndpoint) -> Result<(), AttachError> {
        let status_url = format!("{}/status", endpoint.http_base());
        for attempt in 1..=self.attempts {
            if self.is_running(&status_url).await {
                return Ok(());
            }
            if attempt < self.attempts {
                sleep(self.interval).await;
            }
        }
        warn!(
            target: "rn_bridge::packager",
            url = %status_url,
            attempts = self.attempts,
            "packager did not report running"
        );
        Err(AttachError::PackagerUnreachable {
            port: endpoint.port,
        })
    }
}

/// GET `url` and return the body as text, treating non-2xx as failure.
pub async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let to_http = |source| FetchError::Http {
        url: url.to_owned(),
        source,
    };
    let response = http.get(url).send().await.map_err(to_http)?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_owned(),
            status,
        });
    }
    response.text().await.map_err(to_http)
}
