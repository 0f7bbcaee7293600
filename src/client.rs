//! Accrual calculator client.
//!
//! `GET {base}/api/orders/{id}` with the per-call timeout baked into the
//! transport, so a hung calculator cancels the request itself rather than
//! leaking a racing timer task.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{ClientBuilder, StatusCode};

use crate::error_handling::{ClientError, InitializationError};
use crate::model::{AccrualInfo, OrderId};

const RATE_LIMIT_BODY_PREFIX: &str = "No more than ";
const RATE_LIMIT_BODY_SUFFIX: &str = " requests per minute allowed";

/// Capability interface toward the accrual calculator.
///
/// Implementations must be safe to call from many workers at once.
#[async_trait]
pub trait AccrualClient: Send + Sync {
    /// Fetches the calculator's verdict for one order.
    async fn get_order_info(&self, order_id: &OrderId) -> Result<AccrualInfo, ClientError>;
}

/// HTTP implementation of [`AccrualClient`].
pub struct HttpAccrualClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    /// Builds a client against `base_url` with `call_timeout` enforced on
    /// every request.
    pub fn new(
        base_url: impl Into<String>,
        call_timeout: Duration,
    ) -> Result<Self, InitializationError> {
        let client = ClientBuilder::new().timeout(call_timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(HttpAccrualClient { client, base_url })
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn get_order_info(&self, order_id: &OrderId) -> Result<AccrualInfo, ClientError> {
        let url = format!("{}/api/orders/{}", self.base_url, order_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ClientError::transport)?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if !content_type.starts_with("application/json") {
                    return Err(ClientError::Decode(format!(
                        "unexpected content type {content_type:?}"
                    )));
                }
                let body = response.bytes().await.map_err(ClientError::transport)?;
                serde_json::from_slice(&body)
                    .map_err(|e| ClientError::Decode(format!("bad accrual payload: {e}")))
            }
            StatusCode::NO_CONTENT => Err(ClientError::NoContent),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        ClientError::Decode("missing or non-integer Retry-After header".to_string())
                    })?;
                let body = response.text().await.map_err(ClientError::transport)?;
                let allowed_rpm = parse_allowed_rpm(&body).ok_or_else(|| {
                    ClientError::Decode(format!("unexpected rate limit message: {body:?}"))
                })?;
                Err(ClientError::TooManyRequests {
                    retry_after: Duration::from_secs(retry_after),
                    allowed_rpm,
                })
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::Transport(format!("calculator error: {body}")))
            }
            other => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::Transport(format!(
                    "unexpected status {other}: {body}"
                )))
            }
        }
    }
}

/// Extracts N from "No more than N requests per minute allowed".
fn parse_allowed_rpm(body: &str) -> Option<u64> {
    body.trim()
        .strip_prefix(RATE_LIMIT_BODY_PREFIX)?
        .strip_suffix(RATE_LIMIT_BODY_SUFFIX)?
        .trim()
        .parse()
        .ok()
}
