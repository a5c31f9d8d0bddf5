//! Notification senders and the rate limiting decorator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::store::{OutboundRecord, OutboundStore, UserId};
use crate::clock::Clock;
use crate::error::{Result, SendLimitError};
use crate::ratelimit::{Decision, RateLimiterProvider, Topic};

/// A request to send one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to_user_id: UserId,
    pub topic: Topic,
    pub contents: String,
}

impl SendRequest {
    pub fn new(to_user_id: UserId, topic: impl Into<Topic>, contents: impl Into<String>) -> Self {
        Self {
            to_user_id,
            topic: topic.into(),
            contents: contents.into(),
        }
    }
}

/// Delivers notifications.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<()>;
}

#[async_trait]
impl<S: Sender + ?Sized> Sender for Arc<S> {
    async fn send(&self, request: &SendRequest) -> Result<()> {
        (**self).send(request).await
    }
}

/// Sender that records every send in the outbound history.
///
/// Stands in for the transport: the record is what later rate limit
/// decisions count.
#[derive(Debug, Clone)]
pub struct RecordingSender {
    store: Arc<dyn OutboundStore>,
    clock: Arc<dyn Clock>,
}

impl RecordingSender {
    pub fn new(store: Arc<dyn OutboundStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, request: &SendRequest) -> Result<()> {
        let record = OutboundRecord::new(request.to_user_id, request.topic.clone(), self.clock.now());
        self.store.record(record).await?;

        info!(
            topic = %request.topic,
            user_id = request.to_user_id,
            "Sent notification"
        );
        Ok(())
    }
}

/// Wraps a sender and refuses sends that the topic's rate limiter blocks.
///
/// Blocked sends return [`SendLimitError::RateLimited`] and never reach the
/// wrapped sender. Allowed sends are forwarded unchanged.
pub struct RateLimitedSender<S> {
    delegate: S,
    provider: Arc<RateLimiterProvider>,
}

impl<S: Sender> RateLimitedSender<S> {
    pub fn new(delegate: S, provider: Arc<RateLimiterProvider>) -> Self {
        Self { delegate, provider }
    }

    /// Evaluate a request without sending it.
    pub async fn check(&self, request: &SendRequest) -> Result<Decision> {
        self.provider
            .for_topic(&request.topic)
            .evaluate(request.to_user_id, &request.topic)
            .await
    }

    pub fn provider(&self) -> &Arc<RateLimiterProvider> {
        &self.provider
    }

    pub fn into_inner(self) -> S {
        self.delegate
    }
}

#[async_trait]
impl<S: Sender> Sender for RateLimitedSender<S> {
    #[instrument(skip(self, request), fields(topic = %request.topic, user_id = request.to_user_id))]
    async fn send(&self, request: &SendRequest) -> Result<()> {
        if let Decision::Block(reason) = self.check(request).await? {
            warn!(reason = %reason, "Skipping `{}` send due to rate limit", request.topic);
            return Err(SendLimitError::RateLimited {
                topic: request.topic.clone(),
            });
        }

        self.delegate.send(request).await
    }
}
