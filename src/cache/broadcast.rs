//! Process-wide publish/subscribe transport for invalidation messages.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::events::InvalidationEnvelope;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast transport error on `{topic}`: {message}")]
    Transport { topic: String, message: String },
}

/// Publish/subscribe seam between workers.
///
/// Publishing is fire-and-forget: a topic without subscribers is not an error.
#[async_trait]
pub trait Broadcast: Send + Sync {
    /// Deliver `envelope` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers reached.
    async fn publish(
        &self,
        topic: &str,
        envelope: InvalidationEnvelope,
    ) -> Result<usize, BroadcastError>;

    /// Stream of every envelope published on `topic` from now on.
    fn subscribe(&self, topic: &str) -> BoxStream<'static, InvalidationEnvelope>;
}

/// In-process transport backed by one `tokio::sync::broadcast` channel per
/// topic.
///
/// Several coordinators sharing one `LocalBroadcast` behave like workers
/// sharing a cluster bus.
pub struct LocalBroadcast {
    channels: DashMap<String, broadcast::Sender<InvalidationEnvelope>>,
    capacity: usize,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<InvalidationEnvelope> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broadcast for LocalBroadcast {
    async fn publish(
        &self,
        topic: &str,
        envelope: InvalidationEnvelope,
    ) -> Result<usize, BroadcastError> {
        match self.sender(topic).send(envelope) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                debug!(topic, "No subscribers for invalidation message");
                Ok(0)
            }
        }
    }

    fn subscribe(&self, topic: &str) -> BoxStream<'static, InvalidationEnvelope> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        stream::unfold((receiver, topic), |(mut receiver, topic)| async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => return Some((envelope, (receiver, topic))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            topic = %topic,
                            skipped,
                            "Invalidation subscriber lagged; messages were dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
