use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::content::UpstreamRequest;
use crate::credentials::CredentialPool;
use crate::errors::{AttemptRecord, FailoverError, FailureClass};
use crate::provider::{UpstreamProvider, UpstreamReply};

const EVENT_CAPACITY: usize = 64;

/// Typed operational signal published by the failover client.
///
/// Status displays subscribe to these instead of inferring state from logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialEvent {
    /// The credential at `index` produced a successful reply.
    Used { index: usize },
    /// The credential at `index` failed one attempt.
    Failed {
        index: usize,
        class: FailureClass,
        status_code: Option<u16>,
        message: String,
    },
}

/// Successful failover call.
#[derive(Debug)]
pub struct FailoverSuccess {
    /// Index of the credential that answered.
    pub credential_index: usize,
    pub reply: UpstreamReply,
    /// Retryable failures that preceded the winning attempt.
    pub failed_attempts: Vec<AttemptRecord>,
}

/// Walks the credential pool in order until one attempt succeeds.
///
/// Attempts are strictly sequential, so a single user turn never has more
/// than one upstream call in flight.
pub struct FailoverClient {
    provider: Arc<dyn UpstreamProvider>,
    pool: Arc<CredentialPool>,
    backoff: Duration,
    events: broadcast::Sender<CredentialEvent>,
}

impl FailoverClient {
    pub fn new(
        provider: Arc<dyn UpstreamProvider>,
        pool: Arc<CredentialPool>,
        backoff: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            pool,
            backoff,
            events,
        }
    }

    /// Subscribes to credential usage/failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Calls the upstream, failing over on retryable errors.
    ///
    /// A fatal failure is returned as-is without trying further credentials;
    /// exhausting the pool returns every recorded attempt.
    pub async fn call(&self, request: &UpstreamRequest) -> Result<FailoverSuccess, FailoverError> {
        let provider = self.provider.name();
        let mut failed_attempts = Vec::new();
        let mut credentials = self.pool.next_from(0).peekable();

        while let Some(credential) = credentials.next() {
            let index = credential.index();
            debug!(provider, credential_index = index, "upstream attempt");

            let error = match self.provider.generate(credential, request).await {
                Ok(reply) => {
                    info!(
                        provider,
                        credential_index = index,
                        failed_attempts = failed_attempts.len(),
                        "upstream call succeeded"
                    );
                    self.publish(CredentialEvent::Used { index });
                    return Ok(FailoverSuccess {
                        credential_index: index,
                        reply,
                        failed_attempts,
                    });
                }
                Err(error) => error,
            };

            let record = AttemptRecord::classify(index, &error);
            self.publish(CredentialEvent::Failed {
                index,
                class: record.class,
                status_code: record.status_code,
                message: record.message.clone(),
            });

            match record.class {
                FailureClass::Fatal => {
                    warn!(provider, credential_index = index, error = %error, "fatal upstream failure");
                    return Err(FailoverError::Fatal(record));
                }
                FailureClass::Retryable => {
                    warn!(provider, credential_index = index, error = %error, "retryable upstream failure");
                    failed_attempts.push(record);
                    if credentials.peek().is_some() && !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        warn!(
            provider,
            attempts = failed_attempts.len(),
            "credential pool exhausted"
        );
        Err(FailoverError::PoolExhausted {
            attempts: failed_attempts,
        })
    }

    fn publish(&self, event: CredentialEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
