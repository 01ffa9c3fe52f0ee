//! NATS-backed queue adapter.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::request::QueuedInvocation;

/// Failure modes of an enqueue. There is no local retry: a failed
/// publish surfaces straight to the caller as a 500.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to encode queue message: {0}")]
    Encode(String),

    #[error("failed to publish to queue: {0}")]
    Publish(String),
}

/// Destination for async invocations.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, invocation: QueuedInvocation) -> Result<(), QueueError>;
}

/// Publishes invocations onto a NATS subject.
pub struct NatsQueue {
    client: async_nats::Client,
    subject: String,
}

impl NatsQueue {
    /// Connect to the broker at `endpoint` (`host:port`) and publish to
    /// `subject`.
    pub async fn connect(
        endpoint: &str,
        subject: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client = async_nats::connect(endpoint)
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        let subject = subject.into();
        info!(endpoint, subject, "connected to NATS");
        Ok(Self { client, subject })
    }

    /// Wrap an already-connected client (used by tests).
    pub fn with_client(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl Queue for NatsQueue {
    async fn enqueue(&self, invocation: QueuedInvocation) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&invocation)
            .map_err(|e| QueueError::Encode(e.to_string()))?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        // Don't report accepted until the broker actually has it.
        self.client
            .flush()
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        debug!(
            function = %invocation.name,
            call_id = %invocation.id,
            subject = %self.subject,
            "queued async invocation"
        );
        Ok(())
    }
}
