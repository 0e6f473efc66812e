//! Streaming classification of a growing reply into plain text or a
//! structured image-generation directive.
//!
//! The upstream is instructed to answer either with prose or with a single raw
//! directive object, never both. The classifier has to commit from a prefix,
//! before the object is complete enough to parse, and it never changes its
//! mind: `Undetermined` moves to exactly one of `PlainText` or
//! `StructuredDirective` and stays there.
//!
//! Every verdict depends only on the buffer content, and once a prefix yields
//! a verdict every extension of it yields the same one. Feeding the same text
//! in different chunk sizes therefore ends in the same state and directive.
//!
//! A prose reply that opens with a raw `{` is out of contract and is
//! classified as a directive (and then fails to parse).

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::content::{Completion, Directive};

/// Classification of the accumulated reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationState {
    Undetermined,
    PlainText,
    StructuredDirective,
}

/// Which prefix check committed the classifier to a directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectiveSignal {
    /// `"type": "image_generation"` is present.
    DirectiveTag,
    /// `"prompts": [` is present.
    PromptsArray,
    /// Any `"key":` inside an object opening.
    ObjectKey,
}

/// The reply committed to a directive but does not parse as one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed directive: {reason}")]
pub struct MalformedDirective {
    pub reason: String,
}

const FENCE: &str = "```";

static DIRECTIVE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""type"\s*:\s*"image_generation""#).expect("directive tag pattern is valid")
});
static PROMPTS_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""prompts"\s*:\s*\["#).expect("prompts pattern is valid"));
static OBJECT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"\\\n]+"\s*:"#).expect("object key pattern is valid"));

/// One-way content classifier for a single session.
#[derive(Debug)]
pub struct ContentClassifier {
    state: ClassificationState,
    directive: Option<Directive>,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentClassifier {
    pub fn new() -> Self {
        Self {
            state: ClassificationState::Undetermined,
            directive: None,
        }
    }

    pub fn state(&self) -> ClassificationState {
        self.state
    }

    /// The parsed directive, once the buffer holds a complete one.
    pub fn directive(&self) -> Option<&Directive> {
        self.directive.as_ref()
    }

    /// Re-examines the whole buffer after a fragment was appended.
    pub fn observe(&mut self, buffer: &str) -> ClassificationState {
        match self.state {
            ClassificationState::PlainText => {}
            ClassificationState::StructuredDirective => self.try_materialize(buffer),
            ClassificationState::Undetermined => match detect(buffer) {
                Verdict::Pending => {}
                Verdict::PlainText => {
                    debug!(buffered = buffer.len(), "classified as plain text");
                    self.state = ClassificationState::PlainText;
                }
                Verdict::Directive(signal) => {
                    debug!(buffered = buffer.len(), ?signal, "classified as directive");
                    self.state = ClassificationState::StructuredDirective;
                    self.try_materialize(buffer);
                }
            },
        }
        self.state
    }

    /// Resolves the final result once the upstream signalled end of content.
    ///
    /// A still-undetermined buffer is settled by its first significant
    /// character. A directive that never parsed is an error, never a
    /// downgrade to plain text.
    pub fn finish(&mut self, buffer: &str) -> Result<Completion, MalformedDirective> {
        if self.state == ClassificationState::Undetermined {
            self.state = match significant_body(buffer) {
                Some(body) if body.starts_with('{') => ClassificationState::StructuredDirective,
                _ => ClassificationState::PlainText,
            };
        }
        match self.state {
            ClassificationState::StructuredDirective => {
                if let Some(directive) = self.directive.clone() {
                    return Ok(Completion::Directive { directive });
                }
                let directive = parse_directive(buffer)?;
                self.directive = Some(directive.clone());
                Ok(Completion::Directive { directive })
            }
            _ => Ok(Completion::Text {
                text: buffer.to_string(),
            }),
        }
    }

    fn try_materialize(&mut self, buffer: &str) {
        if self.directive.is_some() {
            return;
        }
        let Some(body) = significant_body(buffer) else {
            return;
        };
        // An object cannot be complete before its first closing brace.
        if !body.contains('}') {
            return;
        }
        match first_directive(body) {
            Some(Ok(directive)) => {
                debug!(prompts = directive.prompts.len(), "directive materialized");
                self.directive = Some(directive);
            }
            Some(Err(err)) => trace!(error = %err, "directive not parseable yet"),
            None => {}
        }
    }
}

enum Verdict {
    Pending,
    PlainText,
    Directive(DirectiveSignal),
}

fn detect(buffer: &str) -> Verdict {
    let Some(body) = significant_body(buffer) else {
        return Verdict::Pending;
    };
    if !body.starts_with('{') {
        return Verdict::PlainText;
    }
    if DIRECTIVE_TAG.is_match(body) {
        Verdict::Directive(DirectiveSignal::DirectiveTag)
    } else if PROMPTS_ARRAY.is_match(body) {
        Verdict::Directive(DirectiveSignal::PromptsArray)
    } else if OBJECT_KEY.is_match(body) {
        Verdict::Directive(DirectiveSignal::ObjectKey)
    } else {
        Verdict::Pending
    }
}

/// Returns the content after leading whitespace and an optional opening code
/// fence (with language tag), or `None` while that prefix is still ambiguous.
fn significant_body(buffer: &str) -> Option<&str> {
    let trimmed = buffer.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    if trimmed.is_empty() {
        return None;
    }
    let body = match trimmed.strip_prefix(FENCE) {
        Some(rest) => rest
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            .trim_start(),
        // One or two backticks could still become a fence.
        None if FENCE.starts_with(trimmed) => return None,
        None => trimmed,
    };
    if body.is_empty() { None } else { Some(body) }
}

/// Parses the first JSON value of `body`; trailing content (closing fence,
/// whitespace) is ignored. `None` means the value is still incomplete.
fn first_directive(body: &str) -> Option<Result<Directive, serde_json::Error>> {
    let mut values = serde_json::Deserializer::from_str(body).into_iter::<Directive>();
    match values.next()? {
        Err(err) if err.is_eof() => None,
        other => Some(other),
    }
}

fn parse_directive(buffer: &str) -> Result<Directive, MalformedDirective> {
    let body = significant_body(buffer).ok_or_else(|| MalformedDirective {
        reason: "empty reply".into(),
    })?;
    match first_directive(body) {
        Some(Ok(directive)) => Ok(directive),
        Some(Err(err)) => Err(MalformedDirective {
            reason: err.to_string(),
        }),
        None => Err(MalformedDirective {
            reason: "reply ended before the directive was complete".into(),
        }),
    }
}
