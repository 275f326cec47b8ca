//! Order service HTTP client.
//!
//! Reads the active and cancelled order feeds and issues the guest's
//! cancel-order command. The feeds return every order in the hotel; room
//! filtering happens client-side in [`crate::orders`].

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::FeedError;
use crate::orders::Order;

/// Default timeout for feed requests. Kept below the poll interval range so
/// a hung request cannot stall a poller for long.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the order service base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment (paths carry their own)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn join_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: &reqwest::Error) -> FeedError {
    if err.is_connect() {
        return FeedError::Unreachable(url.to_string());
    }
    if err.is_timeout() {
        return FeedError::Timeout(url.to_string());
    }
    if err.is_builder() {
        return FeedError::InvalidUrl(url.to_string());
    }
    FeedError::Network {
        url: url.to_string(),
        detail: err.to_string(),
    }
}

fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 | 403 => "Not authorized to read orders".to_string(),
        404 => "Order service endpoint not found".to_string(),
        s if s >= 500 => "Order service error".to_string(),
        _ => "Unexpected response from order service".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FeedPaths {
    pub orders: String,
    pub cancelled: String,
    pub cancel: String,
}

impl Default for FeedPaths {
    fn default() -> Self {
        Self {
            orders: "/api/orders".to_string(),
            cancelled: "/api/cancelled-orders".to_string(),
            cancel: "/api/orders/cancel".to_string(),
        }
    }
}

/// Source of raw order feed bodies for the pollers.
pub trait OrderFeed: Send + Sync + 'static {
    fn fetch_orders(&self) -> impl Future<Output = Result<Value, FeedError>> + Send;
    fn fetch_cancelled_orders(&self) -> impl Future<Output = Result<Value, FeedError>> + Send;
}

#[derive(Clone)]
pub struct FeedClient {
    base_url: String,
    paths: FeedPaths,
    client: Client,
}

impl FeedClient {
    pub fn new(base_url: &str, paths: FeedPaths) -> Result<Self, FeedError> {
        let base_url = normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err(FeedError::InvalidUrl(base_url));
        }
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| friendly_error(&base_url, &e))?;
        Ok(Self {
            base_url,
            paths,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, FeedError> {
        let full_url = join_path(&self.base_url, path);
        let mut req = self
            .client
            .request(method, &full_url)
            .header("Accept", "application/json");
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            // Prefer the server's own error text when it sends JSON.
            let message = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| {
                    json.get("error")
                        .or_else(|| json.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| status_message(status));
            return Err(FeedError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| FeedError::Body(e.to_string()))
    }

    /// Ask the service to cancel an order. One-way: the result shows up in
    /// the cancelled feed on a later poll.
    pub async fn cancel_order(
        &self,
        order_id: &str,
        reason: &str,
        original_order: Option<&Order>,
    ) -> Result<Value, FeedError> {
        let body = serde_json::json!({
            "orderId": order_id,
            "reason": reason,
            "originalOrder": original_order,
        });
        let result = self
            .request(Method::POST, &self.paths.cancel, Some(body))
            .await?;
        info!(order_id, "Cancel request sent");
        Ok(result)
    }
}

impl OrderFeed for FeedClient {
    async fn fetch_orders(&self) -> Result<Value, FeedError> {
        debug!(path = %self.paths.orders, "Fetching active orders");
        self.request(Method::GET, &self.paths.orders, None).await
    }

    async fn fetch_cancelled_orders(&self) -> Result<Value, FeedError> {
        debug!(path = %self.paths.cancelled, "Fetching cancelled orders");
        self.request(Method::GET, &self.paths.cancelled, None).await
    }
}
