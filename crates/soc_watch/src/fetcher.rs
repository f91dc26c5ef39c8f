//! HTTP client for the Schedule of Classes page.

use crate::error::FetchError;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for the SOC client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Timeout for the whole request
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Downloads SOC result pages.
///
/// One request per call; a failed fetch is retried by the next scheduled poll.
#[derive(Debug, Clone)]
pub struct SocClient {
    client: Client,
}

impl SocClient {
    /// Creates a new client with default configuration.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(FetchConfig::default())
    }

    /// Creates a new client with custom configuration.
    pub fn with_config(config: FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Client {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Shared HTTP client, reused by the notifiers.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Fetches the page body as text.
    ///
    /// # Returns
    /// * `Ok(String)` - The HTML body
    /// * `Err(FetchError)` - On transport failure or a non-success status
    pub async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or("unspecified");
                warn!(url = %url, retry_after = %retry_after, "Rate limited (429)");
            } else {
                warn!(url = %url, status = status.as_u16(), "SOC request failed");
            }
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        debug!(
            url = %url,
            bytes = body.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched SOC page"
        );

        Ok(body)
    }
}
