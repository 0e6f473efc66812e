use crate::errors::ProviderError;
use crate::provider::ProviderEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing frame the server closed without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    buf.windows(2)
        .enumerate()
        .find_map(|(i, pair)| match pair {
            b"\n\n" => Some((i, 2)),
            b"\r\n" if buf[i..].starts_with(b"\r\n\r\n") => Some((i, 4)),
            _ => None,
        })
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

pub(crate) fn map_gemini_frame_to_events(
    frame: &SseFrame,
) -> Result<Vec<ProviderEvent>, ProviderError> {
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::protocol(format!("invalid Gemini SSE JSON frame: {e}")))?;
    map_gemini_json_to_events(&value)
}

/// Maps one `GenerateContentResponse` chunk to provider events.
///
/// A chunk can carry text and a finish reason at once; the text delta always
/// comes first.
pub(crate) fn map_gemini_json_to_events(
    value: &serde_json::Value,
) -> Result<Vec<ProviderEvent>, ProviderError> {
    check_in_band_error(value)?;
    let mut events = Vec::new();
    if let Some(text) = extract_candidate_text(value).filter(|t| !t.is_empty()) {
        events.push(ProviderEvent::TextDelta { text });
    }
    if let Some(reason) = finish_reason(value) {
        events.push(ProviderEvent::Completed {
            finish_reason: Some(reason),
        });
    }
    Ok(events)
}

/// Turns error objects and blocked prompts inside a 2xx body into errors.
pub(crate) fn check_in_band_error(value: &serde_json::Value) -> Result<(), ProviderError> {
    if let Some(error) = value.get("error") {
        let status = error
            .get("code")
            .and_then(|v| v.as_u64())
            .and_then(|code| u16::try_from(code).ok());
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Gemini returned an error object");
        return Err(ProviderError::upstream(status, message));
    }
    let has_candidates = value
        .get("candidates")
        .and_then(|v| v.as_array())
        .is_some_and(|c| !c.is_empty());
    if !has_candidates
        && let Some(reason) = value
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(|v| v.as_str())
    {
        return Err(ProviderError::upstream(
            None,
            format!("prompt blocked by Gemini: {reason}"),
        ));
    }
    Ok(())
}

/// Concatenated text parts of the first candidate (thought parts skipped).
pub(crate) fn extract_candidate_text(value: &serde_json::Value) -> Option<String> {
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let texts: Vec<&str> = parts
        .iter()
        .filter(|p| p.get("thought").and_then(|v| v.as_bool()) != Some(true))
        .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}

pub(crate) fn finish_reason(value: &serde_json::Value) -> Option<String> {
    value
        .get("candidates")?
        .get(0)?
        .get("finishReason")?
        .as_str()
        .map(ToOwned::to_owned)
}

/// Builds the attempt error for a non-2xx response.
pub(crate) fn error_from_status(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("Gemini request failed with status {status}")
            } else {
                trimmed.to_string()
            }
        });
    ProviderError::upstream(Some(status), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 = b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hel";
        let part2 = b"lo\"}]}}]}\r\n\r\ndata: {}\n\n";
        assert!(decoder.push_chunk(part1).is_empty());
        let frames = decoder.push_chunk(part2);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].data.ends_with("}]}}]}"));
        assert_eq!(frames[1].data, "{}");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn decoder_flushes_unterminated_trailing_frame() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push_chunk(b": keepalive\n\ndata: {\"a\":1}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(SseFrame {
                event: None,
                data: "{\"a\":1}".into()
            })
        );
    }

    #[test]
    fn maps_text_then_completion_from_final_chunk() {
        let chunk = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi "}, {"text": "there"}]},
                "finishReason": "STOP"
            }]
        });
        let events = map_gemini_json_to_events(&chunk).expect("map");
        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta {
                    text: "Hi there".into()
                },
                ProviderEvent::Completed {
                    finish_reason: Some("STOP".into())
                },
            ]
        );
    }

    #[test]
    fn thought_parts_are_skipped() {
        let chunk = serde_json::json!({
            "candidates": [{"content": {"parts": [
                {"text": "pondering", "thought": true},
                {"text": "answer"}
            ]}}]
        });
        assert_eq!(extract_candidate_text(&chunk).as_deref(), Some("answer"));
    }

    #[test]
    fn in_band_errors_and_blocked_prompts_fail() {
        let err = map_gemini_json_to_events(&serde_json::json!({
            "error": {"code": 429, "message": "Resource has been exhausted (e.g. check quota)."}
        }))
        .expect_err("error object");
        assert_eq!(err.status_code(), Some(429));

        let err = map_gemini_json_to_events(&serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .expect_err("blocked");
        assert!(err.message().contains("SAFETY"));
    }

    #[test]
    fn status_errors_prefer_json_message() {
        let err = error_from_status(
            400,
            r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#,
        );
        assert_eq!(err, ProviderError::upstream(Some(400), "API key not valid."));
        let err = error_from_status(503, "  ");
        assert!(err.message().contains("status 503"));
    }
}
