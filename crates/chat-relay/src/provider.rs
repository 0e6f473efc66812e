use std::pin::Pin;

use futures::StreamExt as _;

use crate::content::UpstreamRequest;
use crate::credentials::Credential;
use crate::errors::ProviderError;

/// Incremental event from a truly streaming upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Next fragment of generated text.
    TextDelta { text: String },
    /// Explicit end-of-content marker.
    Completed { finish_reason: Option<String> },
}

/// Boxed stream of provider events.
pub type ProviderEventStream =
    Pin<Box<dyn futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'static>>;

/// Successful answer from one upstream attempt.
pub enum UpstreamReply {
    /// Non-streaming upstream: the whole reply at once.
    Complete {
        text: String,
        finish_reason: Option<String>,
    },
    /// Streaming upstream: fragments as they are generated.
    Streaming(ProviderEventStream),
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete {
                text,
                finish_reason,
            } => f
                .debug_struct("Complete")
                .field("chars", &text.chars().count())
                .field("finish_reason", finish_reason)
                .finish(),
            Self::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

impl UpstreamReply {
    /// Convenience constructor for a complete payload.
    pub fn complete(text: impl Into<String>) -> Self {
        Self::Complete {
            text: text.into(),
            finish_reason: None,
        }
    }

    /// Drains the reply into a single string.
    ///
    /// A stream that ends without `Completed` is a protocol error.
    pub async fn into_text(self) -> Result<String, ProviderError> {
        match self {
            Self::Complete { text, .. } => Ok(text),
            Self::Streaming(mut stream) => {
                let mut text = String::new();
                while let Some(event) = stream.next().await {
                    match event? {
                        ProviderEvent::TextDelta { text: delta } => text.push_str(&delta),
                        ProviderEvent::Completed { .. } => return Ok(text),
                    }
                }
                Err(ProviderError::protocol(
                    "upstream stream ended without completion",
                ))
            }
        }
    }
}

/// Contract implemented by upstream generation endpoints.
///
/// One call is one attempt with one credential; failover across credentials
/// is the caller's job.
#[async_trait::async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Short provider name for logs (for example `gemini`).
    fn name(&self) -> &str;

    /// Issues one generation call.
    ///
    /// Returning `Ok` means the upstream accepted the request; a streaming
    /// reply may still fail later, but that failure is no longer eligible
    /// for failover.
    async fn generate(
        &self,
        credential: &Credential,
        request: &UpstreamRequest,
    ) -> Result<UpstreamReply, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn streaming_reply_collects_until_completed() {
        let reply = UpstreamReply::Streaming(Box::pin(stream::iter(vec![
            Ok(ProviderEvent::TextDelta { text: "Hel".into() }),
            Ok(ProviderEvent::TextDelta { text: "lo".into() }),
            Ok(ProviderEvent::Completed {
                finish_reason: Some("STOP".into()),
            }),
        ])));
        assert_eq!(reply.into_text().await.expect("text"), "Hello");
    }

    #[tokio::test]
    async fn streaming_reply_without_end_marker_is_protocol_error() {
        let reply = UpstreamReply::Streaming(Box::pin(stream::iter(vec![Ok(
            ProviderEvent::TextDelta { text: "Hel".into() },
        )])));
        assert!(matches!(
            reply.into_text().await,
            Err(ProviderError::Protocol { .. })
        ));
    }
}
