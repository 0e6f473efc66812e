//! Maps a failed upstream attempt to [`FailureClass`].
//!
//! Quota exhaustion, rate limiting and transient server failures are
//! retryable on another credential. Anything else (malformed request,
//! authorization failure unrelated to quota, unsupported input) would fail
//! identically on every credential and is fatal.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{FailureClass, ProviderError};

/// Status codes that always trigger failover.
pub const RETRYABLE_STATUS_CODES: [u16; 4] = [429, 500, 502, 503];

// `rate` must not touch another letter on either side: "generate" and
// "accurate" do not count, `RATE_EXCEEDED` and "rate-limited" do.
static RETRYABLE_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)quota|limit|(?:^|[^a-z])rate(?:[^a-z]|$)")
        .expect("retryable message pattern is a valid regex")
});

/// Classifies a single failed attempt.
pub fn classify(error: &ProviderError) -> FailureClass {
    match error {
        ProviderError::Upstream {
            status_code,
            message,
        } => {
            if status_code.is_some_and(|code| RETRYABLE_STATUS_CODES.contains(&code))
                || RETRYABLE_MESSAGE.is_match(message)
            {
                FailureClass::Retryable
            } else {
                FailureClass::Fatal
            }
        }
        // Connection resets and timeouts are server-side transients from the
        // caller's point of view.
        ProviderError::Transport { .. } => FailureClass::Retryable,
        ProviderError::Protocol { message } => {
            if RETRYABLE_MESSAGE.is_match(message) {
                FailureClass::Retryable
            } else {
                FailureClass::Fatal
            }
        }
    }
}
