//! Outbound cache invalidation notifications.

use async_trait::async_trait;
use serde::Serialize;

pub const CACHE_INVALIDATED: &str = "routing.cache.invalidated";

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("routing key must be a non-empty string")]
    InvalidRoutingKey,
    #[error("publish rejected with status code {0}")]
    Status(u16),
    #[error("http client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

#[derive(Serialize, Debug, PartialEq)]
pub struct CacheInvalidated<'a> {
    #[serde(rename = "elasticUrl")]
    pub routing_key: &'a str,
}

impl<'a> CacheInvalidated<'a> {
    /// Refuses to build a notification without a routing key.
    pub fn new(routing_key: &'a str) -> Result<Self, PublishError> {
        if routing_key.is_empty() {
            tracing::error!("cache invalidation requested without a routing key");
            return Err(PublishError::InvalidRoutingKey);
        }
        Ok(CacheInvalidated { routing_key })
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_cache_invalidated(&self, routing_key: &str) -> Result<(), PublishError>;
}

/// Posts notifications to an HTTP endpoint of the message transport.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
}

impl WebhookPublisher {
    pub fn new(url: String) -> Self {
        WebhookPublisher {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish_cache_invalidated(&self, routing_key: &str) -> Result<(), PublishError> {
        let payload = CacheInvalidated::new(routing_key)?;
        tracing::info!(elastic_url = routing_key, "publishing cache invalidation");

        let response = self
            .client
            .post(&self.url)
            .header("x-event-name", CACHE_INVALIDATED)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PublishError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Only logs notifications. Used for local runs without a transport.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish_cache_invalidated(&self, routing_key: &str) -> Result<(), PublishError> {
        let payload = CacheInvalidated::new(routing_key)?;
        tracing::info!(
            event = CACHE_INVALIDATED,
            elastic_url = payload.routing_key,
            "cache invalidated"
        );
        Ok(())
    }
}
