//! Common imports for typical relay usage.
//!
//! Re-exports the builder, stream and event types most callers need so a
//! front end can drive a session with a single import line.
pub use crate::{
    AbortHandle, Attachment, Completion, CredentialEvent, Directive, GenerationConfig, Pacing,
    Relay, RelayBuilder, RelayConfig, RelayError, Role, SessionStream, Turn, TurnBuilder,
    WireEvent,
};
