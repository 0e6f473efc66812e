use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::content::{Attachment, Completion, Role, Turn, UpstreamRequest};
use crate::emitter::EventSink;
use crate::errors::RelayError;
use crate::options::{GenerationConfig, Pacing};
use crate::prompts::compose_system_instruction;
use crate::relay::RelayInner;
use crate::session::StreamSession;
use crate::wire::WireEvent;

/// Handle used to request cancellation of a running session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The session stops at its next step without emitting further events;
    /// `finish()` then reports [`RelayError::Cancelled`]. An upstream call
    /// already in flight is not interrupted, its reply is discarded.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Builder for one user turn.
///
/// Collects the conversation context and the new message, then either
/// streams wire events or collects the final result.
pub struct TurnBuilder {
    relay: Arc<RelayInner>,
    conversation_id: Option<String>,
    history: Vec<Turn>,
    user_text: String,
    attachment: Option<Attachment>,
    system_instruction: Option<String>,
    generation: Option<GenerationConfig>,
    pacing: Option<Pacing>,
    stream_buffer_capacity: Option<usize>,
}

impl TurnBuilder {
    pub(crate) fn new(relay: Arc<RelayInner>) -> Self {
        Self {
            relay,
            conversation_id: None,
            history: Vec::new(),
            user_text: String::new(),
            attachment: None,
            system_instruction: None,
            generation: None,
            pacing: None,
            stream_buffer_capacity: None,
        }
    }

    /// Tags log lines with the caller's conversation id.
    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Prior turns, oldest first.
    pub fn history(mut self, turns: impl IntoIterator<Item = Turn>) -> Self {
        self.history = turns.into_iter().collect();
        self
    }

    /// The new user message.
    pub fn user_text(mut self, text: impl Into<String>) -> Self {
        self.user_text = text.into();
        self
    }

    /// Attaches an image (or other binary) to the new user message.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Persona override for this turn only.
    pub fn system_instruction(mut self, persona: impl Into<String>) -> Self {
        self.system_instruction = Some(persona.into());
        self
    }

    pub fn generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Bounded channel size between the session task and the consumer.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = Some(capacity);
        self
    }

    /// Validates the turn and starts a streaming session.
    ///
    /// The returned [`SessionStream`] yields a `UserEcho`, zero or more
    /// `TextDelta`s, then exactly one terminal event (`Complete` or `Error`),
    /// possibly preceded by `DirectiveReady`.
    pub async fn start_stream(self) -> Result<SessionStream, RelayError> {
        let relay = self.relay.clone();
        let ValidatedTurn {
            request,
            echo,
            conversation_id,
            pacing,
            capacity,
        } = self.validate_and_build_request()?;

        let (tx, rx) = mpsc::channel(capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let session_id = uuid::Uuid::new_v4();
        info!(
            session_id = %session_id,
            conversation_id = conversation_id.as_deref().unwrap_or("-"),
            turns = request.turns.len(),
            attachment = request.turns.last().is_some_and(|t| t.attachment.is_some()),
            "starting session"
        );

        let session = StreamSession::new(session_id, EventSink::new(tx, abort_rx), pacing);
        let failover = relay.failover.clone();
        tokio::spawn(async move {
            let result = session.run(failover, request, echo).await;
            let _ = final_tx.send(result);
        });

        Ok(SessionStream {
            session_id,
            conversation_id,
            rx,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            saw_terminal: false,
        })
    }

    /// Runs the turn to completion, discarding intermediate events.
    pub async fn collect(self) -> Result<Completion, RelayError> {
        let stream = self.start_stream().await?;
        stream.finish().await
    }

    fn validate_and_build_request(self) -> Result<ValidatedTurn, RelayError> {
        let config = &self.relay.config;
        let capacity = self
            .stream_buffer_capacity
            .unwrap_or(config.stream_buffer_capacity);
        if capacity == 0 {
            return Err(RelayError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.user_text.trim().is_empty() && self.attachment.is_none() {
            return Err(RelayError::Validation(
                "user turn needs text or an attachment".into(),
            ));
        }
        if let Some(attachment) = &self.attachment {
            validate_attachment(attachment)?;
        }
        for (index, turn) in self.history.iter().enumerate() {
            if turn.text.trim().is_empty() && turn.attachment.is_none() {
                return Err(RelayError::Validation(format!(
                    "history turn {index} is empty"
                )));
            }
            if let Some(attachment) = &turn.attachment {
                validate_attachment(attachment)?;
            }
        }
        let generation = self.generation.unwrap_or(config.generation);
        if generation.max_output_tokens == 0 {
            return Err(RelayError::Validation(
                "max_output_tokens must be greater than 0".into(),
            ));
        }

        let echo = WireEvent::UserEcho {
            text: self.user_text.clone(),
            attachment_media_type: self.attachment.as_ref().map(|a| a.media_type.clone()),
        };
        let persona = self
            .system_instruction
            .as_deref()
            .or(config.system_instruction.as_deref());

        let mut turns = self.history;
        turns.push(Turn {
            role: Role::User,
            text: self.user_text,
            attachment: self.attachment,
        });
        let request = UpstreamRequest::new(turns)
            .system_instruction(compose_system_instruction(persona))
            .generation(generation);

        Ok(ValidatedTurn {
            request,
            echo,
            conversation_id: self.conversation_id,
            pacing: self.pacing.unwrap_or(config.pacing),
            capacity,
        })
    }
}

fn validate_attachment(attachment: &Attachment) -> Result<(), RelayError> {
    if attachment.media_type.trim().is_empty() {
        return Err(RelayError::Validation(
            "attachment media type must not be empty".into(),
        ));
    }
    if attachment.data.is_empty() {
        return Err(RelayError::Validation(
            "attachment data must not be empty".into(),
        ));
    }
    Ok(())
}

struct ValidatedTurn {
    request: UpstreamRequest,
    echo: WireEvent,
    conversation_id: Option<String>,
    pacing: Pacing,
    capacity: usize,
}

/// Streaming handle returned by [`TurnBuilder::start_stream`].
///
/// Use `next_event()` to consume events as they arrive and `finish()` to obtain
/// the final result. Dropping the stream disconnects the session.
pub struct SessionStream {
    session_id: uuid::Uuid,
    conversation_id: Option<String>,
    rx: mpsc::Receiver<WireEvent>,
    final_rx: oneshot::Receiver<Result<Completion, RelayError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl SessionStream {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Returns a handle that can cancel the session.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next wire event.
    ///
    /// Returns `None` once the channel is closed (after the terminal event or
    /// after cancellation).
    pub async fn next_event(&mut self) -> Option<WireEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(WireEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains the stream (if needed) and returns the session result.
    ///
    /// This is safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<Completion, RelayError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Protocol(format!(
                "session task ended without final result (session={})",
                self.session_id
            ))),
        }
    }
}
