use std::collections::VecDeque;
use std::pin::Pin;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::content::{Role, Turn, UpstreamRequest};
use crate::credentials::Credential;
use crate::errors::{ProviderError, RelayError};
use crate::provider::{ProviderEvent, UpstreamProvider, UpstreamReply};

use super::config::GeminiClientConfig;
use super::transport::{
    SseDecoder, check_in_band_error, error_from_status, extract_candidate_text, finish_reason,
    map_gemini_frame_to_events,
};

const GEMINI_PROVIDER: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Upstream provider for Google's Generative Language API.
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiClientConfig,
}

impl GeminiProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: GeminiClientConfig) -> Result<Self, RelayError> {
        if config.model.trim().is_empty() {
            return Err(RelayError::Config(
                "Gemini client config model must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build Gemini client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider from `CHAT_RELAY_*` variables.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::new(GeminiClientConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for GeminiProvider {
    fn name(&self) -> &str {
        GEMINI_PROVIDER
    }

    async fn generate(
        &self,
        credential: &Credential,
        request: &UpstreamRequest,
    ) -> Result<UpstreamReply, ProviderError> {
        let body = build_request_body(request);
        let url = if self.config.streaming {
            self.config.stream_url()
        } else {
            self.config.generate_url()
        };
        debug!(
            model = %self.config.model,
            credential_index = credential.index(),
            streaming = self.config.streaming,
            turns = request.turns.len(),
            "sending Gemini request"
        );

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, credential.token())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("Gemini request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(error_from_status(status.as_u16(), &body));
        }

        if self.config.streaming {
            let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
            return Ok(UpstreamReply::Streaming(Box::pin(gemini_event_stream(
                bytes_stream,
            ))));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::transport(format!("Gemini response read failed: {e}")))?;
        parse_complete_body(&body)
    }
}

/// Builds a `generateContent` request body.
///
/// Assistant turns map to the `model` role; user and system turns map to
/// `user`. The system instruction travels separately.
pub(crate) fn build_request_body(request: &UpstreamRequest) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = request.turns.iter().map(render_turn).collect();
    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": {
            "temperature": request.generation.temperature,
            "maxOutputTokens": request.generation.max_output_tokens,
        },
    });
    if let Some(system) = request
        .system_instruction
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
    }
    body
}

fn render_turn(turn: &Turn) -> serde_json::Value {
    let role = match turn.role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    };
    let mut parts = Vec::with_capacity(2);
    if !turn.text.is_empty() || turn.attachment.is_none() {
        parts.push(serde_json::json!({ "text": turn.text }));
    }
    if let Some(attachment) = &turn.attachment {
        parts.push(serde_json::json!({
            "inline_data": {
                "mime_type": attachment.media_type,
                "data": STANDARD.encode(&attachment.data),
            }
        }));
    }
    serde_json::json!({ "role": role, "parts": parts })
}

fn parse_complete_body(body: &[u8]) -> Result<UpstreamReply, ProviderError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProviderError::protocol(format!("Gemini response is not valid JSON: {e}")))?;
    parse_complete_response(&value)
}

fn parse_complete_response(value: &serde_json::Value) -> Result<UpstreamReply, ProviderError> {
    check_in_band_error(value)?;
    let finish_reason = finish_reason(value);
    match extract_candidate_text(value) {
        Some(text) => Ok(UpstreamReply::Complete {
            text,
            finish_reason,
        }),
        // A candidate that finished without parts is an empty reply.
        None if finish_reason.is_some() => Ok(UpstreamReply::Complete {
            text: String::new(),
            finish_reason,
        }),
        None => Err(ProviderError::protocol(
            "Gemini response carried no candidate text",
        )),
    }
}

fn gemini_event_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<ProviderEvent>,
        completed: bool,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            completed: false,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    if state.completed {
                        return Ok(None);
                    }
                    // Closing the body is the end marker when no chunk
                    // carried a finish reason.
                    state.completed = true;
                    return Ok(Some((
                        ProviderEvent::Completed {
                            finish_reason: None,
                        },
                        state,
                    )));
                }

                let frames = match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => state.decoder.push_chunk(&chunk),
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(format!(
                            "Gemini streaming read failed: {e}"
                        )));
                    }
                    None => {
                        state.done = true;
                        state.decoder.finish().into_iter().collect()
                    }
                };
                for frame in frames {
                    for event in map_gemini_frame_to_events(&frame)? {
                        if state.completed {
                            continue;
                        }
                        if matches!(event, ProviderEvent::Completed { .. }) {
                            state.completed = true;
                        }
                        state.pending.push_back(event);
                    }
                }
            }
        },
    )
}
