use serde::{Deserialize, Serialize};

use crate::content::{Completion, Directive};

/// Category of a terminal `Error` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The upstream rejected the request (no failover was attempted).
    FatalUpstream,
    /// Every credential failed with transient errors.
    PoolExhausted,
    /// The reply committed to a directive but failed to parse.
    MalformedDirective,
}

/// One unit of the outbound event stream.
///
/// Events for a session are delivered in order on a single channel, which
/// closes after exactly one `Complete` or `Error`. `TextDelta`s are only sent
/// while the reply looks like plain text; when a directive is recognized,
/// `DirectiveReady.superseded_deltas` tells the consumer how many deltas it
/// already received and must now discard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WireEvent {
    /// Acknowledges the user turn being answered.
    UserEcho {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment_media_type: Option<String>,
    },
    /// Next fragment of a plain-text reply.
    TextDelta { seq: u64, text: String },
    /// A fully parsed directive.
    DirectiveReady {
        directive: Directive,
        superseded_deltas: u64,
    },
    /// Terminal success with the fully classified result.
    Complete { result: Completion },
    /// Terminal failure with a human-readable summary.
    Error { kind: ErrorKind, message: String },
}

impl WireEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Tag used on the wire (and in logs).
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserEcho { .. } => "user_echo",
            Self::TextDelta { .. } => "text_delta",
            Self::DirectiveReady { .. } => "directive_ready",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Renders the event as one newline-terminated JSON line.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|err| {
            serde_json::json!({
                "event": "error",
                "kind": ErrorKind::FatalUpstream,
                "message": format!("failed to encode {} event: {err}", self.name()),
            })
            .to_string()
        });
        line.push('\n');
        line
    }
}
