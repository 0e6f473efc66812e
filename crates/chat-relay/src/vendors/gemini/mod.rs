//! Gemini (Generative Language API) provider integration.
//!
//! Vendor-specific configuration lives here so the root relay API can remain
//! provider-agnostic.
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::GeminiProvider;
pub use config::{
    BASE_URL_ENV, GeminiClientConfig, MODEL_ENV, TIMEOUT_SECS_ENV, UPSTREAM_STREAMING_ENV,
};
