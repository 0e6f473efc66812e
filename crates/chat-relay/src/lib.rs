//! Resilient streaming delivery pipeline for a chat front end.
//!
//! A turn is sent upstream through a pool of interchangeable credentials with
//! failover on transient failures, re-emitted as an ordered event stream (even
//! when the upstream only returns one complete payload), and classified while
//! it grows into either plain text or a structured image-generation directive.
//!
//! # Usage
//!
//! ```no_run
//! use chat_relay::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RelayError> {
//! let relay = Relay::from_env()?;
//!
//! let mut stream = relay
//!     .turn()
//!     .user_text("Draw me a lighthouse at dusk")
//!     .start_stream()
//!     .await?;
//!
//! while let Some(event) = stream.next_event().await {
//!     print!("{}", event.to_ndjson());
//! }
//!
//! match stream.finish().await? {
//!     Completion::Text { text } => println!("{text}"),
//!     Completion::Directive { directive } => println!("{:?}", directive.prompts),
//! }
//! # Ok(())
//! # }
//! ```

/// Streaming content classifier (plain text vs. directive).
pub mod classifier;
/// Environment-driven relay configuration.
pub mod config;
/// Turn, request, directive and completion types.
pub mod content;
/// Ordered credential pool.
pub mod credentials;
/// Fragment sources and the ordered outbound event sink.
pub mod emitter;
/// Public error types.
pub mod errors;
/// Sequential credential failover around an upstream provider.
pub mod failover;
/// Process-wide tracing setup.
pub mod observability;
/// Generation budget and pacing options.
pub mod options;
/// Common imports for typical usage.
pub mod prelude;
/// System instruction and title prompt text.
pub mod prompts;
/// Upstream provider contract.
pub mod provider;
/// Relay entry point and builder.
pub mod relay;
/// Retryable vs. fatal failure classification.
pub mod retry;
/// Per-request stream session state machine.
pub mod session;
/// Credential status tracking from typed failover events.
pub mod status;
/// Turn builder, session stream and abort handle.
pub mod turn;
/// Vendor-specific upstream integrations.
pub mod vendors;
/// Outbound wire events.
pub mod wire;

pub use classifier::{ClassificationState, ContentClassifier};
pub use config::RelayConfig;
pub use content::{Attachment, Completion, Directive, DirectiveKind, Role, Turn, UpstreamRequest};
pub use credentials::{Credential, CredentialPool};
pub use errors::{
    AttemptRecord, FailoverError, FailureClass, ProviderError, RelayError, RelayFailure,
};
pub use failover::{CredentialEvent, FailoverClient, FailoverSuccess};
pub use options::{GenerationConfig, Pacing};
pub use provider::{ProviderEvent, ProviderEventStream, UpstreamProvider, UpstreamReply};
pub use relay::{Relay, RelayBuilder};
pub use status::{CredentialStatus, CredentialStatusBoard};
pub use turn::{AbortHandle, SessionStream, TurnBuilder};
pub use wire::{ErrorKind, WireEvent};
