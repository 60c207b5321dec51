//! Backend-side helper that posts events to the relay's ingestion endpoint.

use std::time::Duration;

use serde::Serialize;

use crate::error::RelayError;

/// Ingestion endpoint used when none is configured.
pub const DEFAULT_RELAY_ENDPOINT: &str = "http://localhost:8081/update";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fire-and-forget publisher for the relay's `POST /update` endpoint.
///
/// Failures never propagate out of [`notify`](Self::notify); the
/// triggering operation is expected to proceed regardless of delivery.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    endpoint: String,
}

impl Notifier {
    /// Creates a notifier posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RelayError> {
        let client = http_client().map_err(|e| RelayError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// The ingestion URL this notifier posts to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts `event` as JSON and reports the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Publish`] on transport failure, timeout, or a
    /// non-2xx answer.
    pub async fn try_notify<T>(&self, event: &T) -> Result<(), RelayError>
    where
        T: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Publish(format!("relay answered {status}: {body}")))
    }

    /// Posts `event`, logging instead of failing. Returns whether the relay
    /// accepted it.
    pub async fn notify<T>(&self, event: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match self.try_notify(event).await {
            Ok(()) => {
                tracing::info!(endpoint = %self.endpoint, "notification sent");
                true
            }
            Err(error) => {
                tracing::error!(endpoint = %self.endpoint, %error, "notification failed");
                false
            }
        }
    }
}

fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
}

impl Default for Notifier {
    fn default() -> Self {
        Self {
            client: http_client().unwrap_or_default(),
            endpoint: DEFAULT_RELAY_ENDPOINT.to_owned(),
        }
    }
}
