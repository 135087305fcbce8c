//! RabbitMQ publisher using the broker's management HTTP API.
//!
//! Each publish is a short-lived exchange: declare the exchange (idempotent),
//! then publish one persistent JSON message. No connection is kept between
//! calls.
//!
//! RabbitMQ documents the management `/publish` endpoint as a diagnostics
//! tool rather than a production publishing path. Messages are sent with
//! `delivery_mode = 2`, but there are no publisher confirms: the only
//! delivery signal is the `routed` flag in the response, and an unrouted
//! message is reported as an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::EventPublisher;
use crate::config::EventsConfig;
use crate::errors::NotificationError;
use crate::models::SupplierEvent;

/// Overall bound on one management API request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct PublishResponse {
    routed: bool,
}

/// Publishes events to a topic exchange through the management API.
pub struct RabbitMqPublisher {
    api_url: Url,
    vhost: String,
    exchange: String,
    routing_key: String,
    username: String,
    password: Option<String>,
    http: reqwest::Client,
}

impl RabbitMqPublisher {
    /// Create a publisher from the `[events]` configuration.
    pub fn new(config: &EventsConfig) -> Result<Self, NotificationError> {
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| NotificationError::InvalidUrl(format!("{}: {}", config.api_url, e)))?;
        if api_url.cannot_be_a_base() {
            return Err(NotificationError::InvalidUrl(config.api_url.clone()));
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        info!(
            api_url = %api_url,
            exchange = %config.exchange,
            routing_key = %config.routing_key,
            "RabbitMQ event publisher enabled"
        );

        Ok(Self {
            api_url,
            vhost: config.vhost.clone(),
            exchange: config.exchange.clone(),
            routing_key: config.routing_key.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        })
    }

    /// `{api}/api/exchanges/{vhost}/{exchange}[/publish]`, with each
    /// segment percent-encoded (the default vhost `/` becomes `%2F`).
    fn exchange_url(&self, publish: bool) -> Result<Url, NotificationError> {
        let mut url = self.api_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| NotificationError::InvalidUrl(self.api_url.to_string()))?;
            segments
                .pop_if_empty()
                .extend(["api", "exchanges", self.vhost.as_str(), self.exchange.as_str()]);
            if publish {
                segments.push("publish");
            }
        }
        Ok(url)
    }

    async fn declare_exchange(&self) -> Result<(), NotificationError> {
        let url = self.exchange_url(false)?;
        debug!(url = %url, "declaring exchange");
        let resp = self
            .http
            .put(url)
            .basic_auth(&self.username, self.password.as_ref())
            .json(&json!({"type": "topic", "durable": true}))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RabbitMqPublisher {
    async fn publish(&self, event: &SupplierEvent) -> Result<(), NotificationError> {
        self.declare_exchange().await?;

        let payload = serde_json::to_string(event)?;
        let body = json!({
            "properties": {
                "delivery_mode": 2,
                "content_type": "application/json",
            },
            "routing_key": self.routing_key,
            "payload": payload,
            "payload_encoding": "string",
        });

        let resp = self
            .http
            .post(self.exchange_url(true)?)
            .basic_auth(&self.username, self.password.as_ref())
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let outcome: PublishResponse = resp.json().await?;
        if !outcome.routed {
            return Err(NotificationError::NotRouted {
                routing_key: self.routing_key.clone(),
            });
        }

        debug!(supplier_id = %event.supplier_id, "event published");
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, NotificationError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "broker returned error");
    Err(NotificationError::Rejected {
        status: status.as_u16(),
        body,
    })
}
