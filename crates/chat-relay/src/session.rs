//! Per-request orchestration: one upstream call, one buffer, one classifier,
//! one outbound channel.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::{ClassificationState, ContentClassifier};
use crate::content::{Completion, Directive, UpstreamRequest};
use crate::emitter::{EventSink, FragmentSource};
use crate::errors::{RelayError, RelayFailure};
use crate::failover::FailoverClient;
use crate::options::Pacing;
use crate::wire::WireEvent;

/// Lifecycle of a [`StreamSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Receiving fragments; plain-text fragments are forwarded.
    Active,
    /// Committed to a directive; waiting for it to parse.
    Finalizing,
    /// Terminal event sent, or consumer gone.
    Closed,
}

/// Append-only text accumulated for one session.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    text: String,
    fragments: usize,
}

impl StreamBuffer {
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }
}

/// Drives one request from failover call to terminal event.
pub struct StreamSession {
    id: uuid::Uuid,
    state: SessionState,
    buffer: StreamBuffer,
    classifier: ContentClassifier,
    sink: EventSink,
    pacing: Pacing,
    delta_seq: u64,
}

impl StreamSession {
    pub fn new(id: uuid::Uuid, sink: EventSink, pacing: Pacing) -> Self {
        Self {
            id,
            state: SessionState::Active,
            buffer: StreamBuffer::default(),
            classifier: ContentClassifier::new(),
            sink,
            pacing,
            delta_seq: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion.
    ///
    /// `echo` is sent once the upstream has answered. Failover failures go
    /// straight to an `Error` event with no partial text. A consumer
    /// disconnect ends the session silently with [`RelayError::Cancelled`];
    /// an in-flight upstream call is left to finish in the background and
    /// its result is discarded.
    pub async fn run(
        mut self,
        failover: Arc<FailoverClient>,
        request: UpstreamRequest,
        echo: WireEvent,
    ) -> Result<Completion, RelayError> {
        let call = tokio::spawn(async move { failover.call(&request).await });
        let joined = tokio::select! {
            joined = call => joined,
            () = self.sink.cancelled() => return Err(self.cancel("awaiting upstream")),
        };

        let success = match joined {
            Ok(Ok(success)) => success,
            Ok(Err(failure)) => return self.fail(RelayFailure::from(failure)).await,
            Err(join_err) => {
                return self
                    .fail(RelayFailure::FatalUpstream {
                        message: format!("upstream task failed: {join_err}"),
                        status_code: None,
                    })
                    .await;
            }
        };
        debug!(session_id = %self.id, credential_index = success.credential_index, "upstream answered");

        if self.sink.emit(echo).await.is_err() {
            return Err(self.cancel("sending user echo"));
        }

        let mut source = FragmentSource::from_reply(success.reply, self.pacing);
        loop {
            let next = tokio::select! {
                next = source.next_fragment() => next,
                () = self.sink.cancelled() => return Err(self.cancel("streaming")),
            };
            match next {
                Some(Ok(fragment)) => {
                    if let Some(directive) = self.on_fragment(&fragment, &mut source).await? {
                        return self.complete_directive(directive).await;
                    }
                }
                Some(Err(err)) => {
                    warn!(session_id = %self.id, error = %err, "upstream stream interrupted");
                    return self
                        .fail(RelayFailure::FatalUpstream {
                            message: format!("upstream stream interrupted: {}", err.message()),
                            status_code: err.status_code(),
                        })
                        .await;
                }
                None => return self.complete().await,
            }
        }
    }

    /// Appends a fragment and forwards it while the reply still reads as
    /// plain text. Returns the directive once it has fully materialized.
    async fn on_fragment(
        &mut self,
        fragment: &str,
        source: &mut FragmentSource,
    ) -> Result<Option<Directive>, RelayError> {
        self.buffer.push(fragment);
        match self.classifier.observe(self.buffer.as_str()) {
            ClassificationState::Undetermined | ClassificationState::PlainText => {
                let event = WireEvent::TextDelta {
                    seq: self.delta_seq,
                    text: fragment.to_string(),
                };
                if self.sink.emit(event).await.is_err() {
                    return Err(self.cancel("sending text delta"));
                }
                self.delta_seq += 1;
                Ok(None)
            }
            ClassificationState::StructuredDirective => {
                if self.state == SessionState::Active {
                    debug!(
                        session_id = %self.id,
                        superseded_deltas = self.delta_seq,
                        "reply is a directive; suppressing text deltas"
                    );
                    self.state = SessionState::Finalizing;
                    source.unpace();
                }
                Ok(self.classifier.directive().cloned())
            }
        }
    }

    async fn complete(mut self) -> Result<Completion, RelayError> {
        match self.classifier.finish(self.buffer.as_str()) {
            Ok(Completion::Directive { directive }) => self.complete_directive(directive).await,
            Ok(completion) => self.finish_with(completion).await,
            Err(malformed) => {
                self.fail(RelayFailure::MalformedDirective {
                    message: malformed.reason,
                })
                .await
            }
        }
    }

    async fn complete_directive(mut self, directive: Directive) -> Result<Completion, RelayError> {
        let ready = WireEvent::DirectiveReady {
            directive: directive.clone(),
            superseded_deltas: self.delta_seq,
        };
        if self.sink.emit(ready).await.is_err() {
            return Err(self.cancel("sending directive"));
        }
        self.finish_with(Completion::Directive { directive }).await
    }

    async fn finish_with(mut self, completion: Completion) -> Result<Completion, RelayError> {
        let event = WireEvent::Complete {
            result: completion.clone(),
        };
        if self.sink.emit(event).await.is_err() {
            return Err(self.cancel("sending completion"));
        }
        self.state = SessionState::Closed;
        info!(
            session_id = %self.id,
            fragments = self.buffer.fragment_count(),
            text_deltas = self.delta_seq,
            directive = completion.as_directive().is_some(),
            "session complete"
        );
        Ok(completion)
    }

    async fn fail(mut self, failure: RelayFailure) -> Result<Completion, RelayError> {
        warn!(session_id = %self.id, kind = ?failure.kind(), error = %failure, "session failed");
        let event = WireEvent::Error {
            kind: failure.kind(),
            message: failure.to_string(),
        };
        if self.sink.emit(event).await.is_err() {
            return Err(self.cancel("sending error"));
        }
        self.state = SessionState::Closed;
        Err(RelayError::Failed(failure))
    }

    fn cancel(&mut self, phase: &'static str) -> RelayError {
        info!(session_id = %self.id, phase, "consumer disconnected");
        self.state = SessionState::Closed;
        RelayError::Cancelled
    }
}
