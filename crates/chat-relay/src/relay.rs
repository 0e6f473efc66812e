use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::content::{Turn, UpstreamRequest};
use crate::credentials::CredentialPool;
use crate::errors::RelayError;
use crate::failover::{CredentialEvent, FailoverClient};
use crate::options::GenerationConfig;
use crate::prompts::{DEFAULT_TITLE, clean_title, title_prompt};
use crate::provider::UpstreamProvider;
use crate::turn::TurnBuilder;
use crate::vendors::gemini::{GeminiClientConfig, GeminiProvider};

pub(crate) struct RelayInner {
    pub(crate) failover: Arc<FailoverClient>,
    pub(crate) config: RelayConfig,
}

/// Entry point for running chat turns through the credential pool.
#[derive(Clone)]
pub struct Relay {
    pub(crate) inner: Arc<RelayInner>,
}

impl Relay {
    /// Starts a builder for wiring a provider, credentials and config.
    pub fn builder() -> RelayBuilder {
        RelayBuilder::default()
    }

    /// Builds a Gemini-backed relay from `CHAT_RELAY_*` variables.
    pub fn from_env() -> Result<Self, RelayError> {
        let provider = GeminiProvider::new(GeminiClientConfig::from_env()?)?;
        Self::builder()
            .provider(Arc::new(provider))
            .credentials(CredentialPool::from_env()?)
            .config(RelayConfig::from_env()?)
            .build()
    }

    /// Starts a new user turn.
    pub fn turn(&self) -> TurnBuilder {
        TurnBuilder::new(self.inner.clone())
    }

    /// Subscribes to typed credential usage/failure events.
    pub fn subscribe_credentials(&self) -> broadcast::Receiver<CredentialEvent> {
        self.inner.failover.subscribe()
    }

    pub fn credential_count(&self) -> usize {
        self.inner.failover.pool().len()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Asks the upstream for a short title for a conversation starting with
    /// `first_message`.
    ///
    /// Goes through the same failover path as turns, but never fails: any
    /// upstream error or empty reply yields [`DEFAULT_TITLE`].
    pub async fn conversation_title(&self, first_message: &str) -> String {
        if first_message.trim().is_empty() {
            return DEFAULT_TITLE.to_string();
        }
        let request = UpstreamRequest::new(vec![Turn::user(title_prompt(first_message))])
            .generation(GenerationConfig::title());
        let reply = match self.inner.failover.call(&request).await {
            Ok(success) => success.reply.into_text().await,
            Err(err) => {
                warn!(error = %err, "title generation failed");
                return DEFAULT_TITLE.to_string();
            }
        };
        match reply {
            Ok(text) => {
                let title = clean_title(&text);
                debug!(%title, "generated conversation title");
                title
            }
            Err(err) => {
                warn!(error = %err, "title reply unreadable");
                DEFAULT_TITLE.to_string()
            }
        }
    }
}

/// Builder used to wire the upstream provider and credentials before creating
/// a [`Relay`].
#[derive(Default)]
pub struct RelayBuilder {
    provider: Option<Arc<dyn UpstreamProvider>>,
    credentials: Option<CredentialPool>,
    config: Option<RelayConfig>,
}

impl RelayBuilder {
    pub fn provider(mut self, provider: Arc<dyn UpstreamProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn credentials(mut self, pool: CredentialPool) -> Self {
        self.credentials = Some(pool);
        self
    }

    /// Overrides the default [`RelayConfig`].
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the relay, validating that a provider and a non-empty credential
    /// pool were supplied.
    pub fn build(self) -> Result<Relay, RelayError> {
        let provider = self
            .provider
            .ok_or_else(|| RelayError::Config("no upstream provider configured".into()))?;
        let pool = self
            .credentials
            .ok_or_else(|| RelayError::Config("no credentials configured".into()))?;
        if pool.is_empty() {
            return Err(RelayError::Config("credential pool is empty".into()));
        }
        let config = self.config.unwrap_or_default();
        config.validate()?;

        debug!(
            provider = provider.name(),
            credentials = pool.len(),
            backoff_ms = config.failover_backoff.as_millis() as u64,
            "relay configured"
        );
        let failover = FailoverClient::new(provider, Arc::new(pool), config.failover_backoff);
        Ok(Relay {
            inner: Arc::new(RelayInner {
                failover: Arc::new(failover),
                config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::errors::ProviderError;
    use crate::provider::UpstreamReply;

    struct TitleProvider(Result<&'static str, u16>);

    #[async_trait::async_trait]
    impl UpstreamProvider for TitleProvider {
        fn name(&self) -> &str {
            "title"
        }

        async fn generate(
            &self,
            _credential: &Credential,
            request: &UpstreamRequest,
        ) -> Result<UpstreamReply, ProviderError> {
            assert_eq!(request.generation, GenerationConfig::title());
            assert!(request.system_instruction.is_none());
            match self.0 {
                Ok(text) => Ok(UpstreamReply::complete(text)),
                Err(status) => Err(ProviderError::upstream(Some(status), "nope")),
            }
        }
    }

    fn relay(reply: Result<&'static str, u16>) -> Relay {
        Relay::builder()
            .provider(Arc::new(TitleProvider(reply)))
            .credentials(CredentialPool::new(["a"]).expect("pool"))
            .config(RelayConfig::default().failover_backoff(std::time::Duration::ZERO))
            .build()
            .expect("relay")
    }

    #[test]
    fn build_requires_provider_and_credentials() {
        let missing_provider = Relay::builder()
            .credentials(CredentialPool::new(["a"]).expect("pool"))
            .build();
        assert!(
            matches!(missing_provider, Err(RelayError::Config(message)) if message.contains("provider"))
        );

        let missing_credentials = Relay::builder()
            .provider(Arc::new(TitleProvider(Ok("x"))))
            .build();
        assert!(
            matches!(missing_credentials, Err(RelayError::Config(message)) if message.contains("credentials"))
        );
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = Relay::builder()
            .provider(Arc::new(TitleProvider(Ok("x"))))
            .credentials(CredentialPool::new(["a", "b"]).expect("pool"))
            .config(RelayConfig::default().stream_buffer_capacity(0))
            .build();
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn title_is_cleaned() {
        let title = relay(Ok("\"Lighthouse Sketch Ideas\"\n"))
            .conversation_title("draw a lighthouse")
            .await;
        assert_eq!(title, "Lighthouse Sketch Ideas");
    }

    #[tokio::test]
    async fn title_falls_back_on_failure() {
        assert_eq!(relay(Err(400)).conversation_title("hello").await, DEFAULT_TITLE);
        assert_eq!(relay(Ok("   ")).conversation_title("hello").await, DEFAULT_TITLE);
        assert_eq!(relay(Ok("unused")).conversation_title("  ").await, DEFAULT_TITLE);
    }
}
