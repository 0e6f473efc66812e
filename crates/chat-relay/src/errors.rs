use crate::wire::ErrorKind;

/// Raw failure returned by an upstream provider for a single attempt.
///
/// These never leave the failover client unclassified; the stream session
/// only ever sees [`FailoverError`] or [`RelayFailure`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Upstream answered with an application-level failure (HTTP status,
    /// in-band error object, etc.).
    #[error("upstream error{}: {message}", status_suffix(.status_code))]
    Upstream {
        status_code: Option<u16>,
        message: String,
    },
    /// Transport or stream I/O failed before a usable answer arrived.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Upstream response shape or event sequencing was invalid.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" (status {code})"))
        .unwrap_or_default()
}

impl ProviderError {
    /// Creates an upstream application-level error.
    pub fn upstream(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code when the upstream supplied one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Upstream { status_code, .. } => *status_code,
            Self::Transport { .. } | Self::Protocol { .. } => None,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Upstream { message, .. }
            | Self::Transport { message }
            | Self::Protocol { message } => message,
        }
    }
}

/// Whether a failed attempt may be retried on the next credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Quota, rate limiting or transient server failure: fail over.
    Retryable,
    /// Anything else: every credential would fail the same way.
    Fatal,
}

/// One classified failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AttemptRecord {
    /// Position of the credential in the pool.
    pub credential_index: usize,
    pub class: FailureClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
}

impl AttemptRecord {
    /// Classifies `error` and records it against `credential_index`.
    pub fn classify(credential_index: usize, error: &ProviderError) -> Self {
        Self {
            credential_index,
            class: crate::retry::classify(error),
            status_code: error.status_code(),
            message: error.message().to_string(),
        }
    }
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "credential {}: ", self.credential_index)?;
        if let Some(code) = self.status_code {
            write!(f, "status {code}: ")?;
        }
        f.write_str(&self.message)
    }
}

/// Outcome of a failover call that produced no usable reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailoverError {
    /// A non-retryable failure; no further credentials were tried.
    #[error("upstream rejected the request ({0})")]
    Fatal(AttemptRecord),
    /// Every credential failed with a retryable error.
    #[error("all {} credentials exhausted", attempts.len())]
    PoolExhausted { attempts: Vec<AttemptRecord> },
}

impl FailoverError {
    /// Number of upstream attempts performed before giving up.
    pub fn attempt_count(&self) -> usize {
        match self {
            Self::Fatal(record) => record.credential_index + 1,
            Self::PoolExhausted { attempts } => attempts.len(),
        }
    }
}

/// Terminal failure of a stream session, surfaced as a wire `Error` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayFailure {
    /// Bad request, unsupported input, or an upstream stream that broke
    /// after it started.
    #[error("the assistant could not answer this request: {message}")]
    FatalUpstream {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
    /// Every credential failed with transient errors.
    #[error("all upstream credentials are currently exhausted; please retry shortly")]
    PoolExhausted { attempts: Vec<AttemptRecord> },
    /// The reply committed to a directive but did not parse as one.
    #[error("the image request could not be understood: {message}")]
    MalformedDirective { message: String },
}

impl RelayFailure {
    /// Wire-level error kind for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FatalUpstream { .. } => ErrorKind::FatalUpstream,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::MalformedDirective { .. } => ErrorKind::MalformedDirective,
        }
    }
}

impl From<FailoverError> for RelayFailure {
    fn from(value: FailoverError) -> Self {
        match value {
            FailoverError::Fatal(record) => RelayFailure::FatalUpstream {
                message: record.message,
                status_code: record.status_code,
            },
            FailoverError::PoolExhausted { attempts } => RelayFailure::PoolExhausted { attempts },
        }
    }
}

/// Top-level error type for the public relay API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Invalid relay, provider or credential configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to the turn builder.
    #[error("validation error: {0}")]
    Validation(String),
    /// The session ended with a terminal `Error` event.
    #[error(transparent)]
    Failed(RelayFailure),
    /// The consumer disconnected before a terminal event.
    #[error("cancelled")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<RelayFailure> for RelayError {
    fn from(value: RelayFailure) -> Self {
        RelayError::Failed(value)
    }
}
