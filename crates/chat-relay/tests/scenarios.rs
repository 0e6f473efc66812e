//! End-to-end sessions against a scripted upstream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_relay::prelude::*;
use chat_relay::{
    Credential, CredentialPool, CredentialStatus, CredentialStatusBoard, ErrorKind,
    ProviderError, ProviderEvent, RelayFailure, UpstreamProvider, UpstreamReply, UpstreamRequest,
};
use futures::stream;

enum Script {
    Fail(ProviderError),
    Reply(&'static str),
    Chunks(Vec<&'static str>),
    Hang,
}

/// Upstream whose behavior is scripted per credential token.
struct ScriptedUpstream {
    scripts: HashMap<&'static str, Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    fn new(scripts: impl IntoIterator<Item = (&'static str, Script)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for ScriptedUpstream {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        credential: &Credential,
        _request: &UpstreamRequest,
    ) -> Result<UpstreamReply, ProviderError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(credential.token().to_string());
        match self.scripts.get(credential.token()) {
            Some(Script::Fail(err)) => Err(err.clone()),
            Some(Script::Reply(text)) => Ok(UpstreamReply::complete(*text)),
            Some(Script::Chunks(chunks)) => {
                let mut events: Vec<Result<ProviderEvent, ProviderError>> = chunks
                    .iter()
                    .map(|c| Ok(ProviderEvent::TextDelta { text: c.to_string() }))
                    .collect();
                events.push(Ok(ProviderEvent::Completed {
                    finish_reason: Some("STOP".into()),
                }));
                Ok(UpstreamReply::Streaming(Box::pin(stream::iter(events))))
            }
            Some(Script::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            None => Err(ProviderError::upstream(Some(401), "unknown key")),
        }
    }
}

fn relay(upstream: Arc<ScriptedUpstream>, keys: &[&str]) -> Relay {
    Relay::builder()
        .provider(upstream)
        .credentials(CredentialPool::new(keys.iter().copied()).expect("pool"))
        .config(
            RelayConfig::default()
                .failover_backoff(Duration::ZERO)
                .pacing(Pacing::immediate(3)),
        )
        .build()
        .expect("relay")
}

async fn run_turn(relay: &Relay, text: &str) -> (Vec<WireEvent>, Result<Completion, RelayError>) {
    let mut stream = relay
        .turn()
        .user_text(text)
        .start_stream()
        .await
        .expect("start");
    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event);
    }
    (events, stream.finish().await)
}

fn quota() -> Script {
    Script::Fail(ProviderError::upstream(Some(429), "Resource has been exhausted"))
}

fn unavailable() -> Script {
    Script::Fail(ProviderError::upstream(Some(503), "The model is overloaded"))
}

fn terminal_count(events: &[WireEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

#[tokio::test]
async fn quota_failover_then_plain_text_stream() {
    let upstream = ScriptedUpstream::new([
        ("k0", quota()),
        ("k1", quota()),
        ("k2", quota()),
        ("k3", Script::Reply("Hello there")),
    ]);
    let relay = relay(upstream.clone(), &["k0", "k1", "k2", "k3"]);
    let mut credential_events = relay.subscribe_credentials();

    let (events, result) = run_turn(&relay, "hi").await;

    assert_eq!(upstream.calls(), vec!["k0", "k1", "k2", "k3"]);
    assert_eq!(
        events.first(),
        Some(&WireEvent::UserEcho {
            text: "hi".into(),
            attachment_media_type: None
        })
    );
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            WireEvent::TextDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello there");
    let seqs: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            WireEvent::TextDelta { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());
    assert_eq!(
        events.last(),
        Some(&WireEvent::Complete {
            result: Completion::Text {
                text: "Hello there".into()
            }
        })
    );
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(
        result,
        Ok(Completion::Text {
            text: "Hello there".into()
        })
    );

    let mut board = CredentialStatusBoard::new(relay.credential_count());
    while let Ok(event) = credential_events.try_recv() {
        board.apply(&event);
    }
    assert_eq!(board.active_index(), Some(3));
    assert_eq!(board.failed_count(), 3);
    assert!(matches!(board.status(0), Some(CredentialStatus::Failed { .. })));
}

#[tokio::test]
async fn streamed_directive_is_never_shown_as_text() {
    let upstream = ScriptedUpstream::new([(
        "k0",
        Script::Chunks(vec![
            r#"{"type":"image_generation","#,
            r#""prompts":["a","b","#,
            r#""c","d"]}"#,
        ]),
    )]);
    let relay = relay(upstream, &["k0"]);

    let (events, result) = run_turn(&relay, "draw a cat").await;

    assert!(
        !events
            .iter()
            .any(|e| matches!(e, WireEvent::TextDelta { .. })),
        "{events:?}"
    );
    let directive: Directive =
        serde_json::from_str(r#"{"type":"image_generation","prompts":["a","b","c","d"]}"#)
            .expect("directive");
    assert_eq!(
        &events[1..],
        &[
            WireEvent::DirectiveReady {
                directive: directive.clone(),
                superseded_deltas: 0
            },
            WireEvent::Complete {
                result: Completion::Directive {
                    directive: directive.clone()
                }
            },
        ]
    );
    assert_eq!(result, Ok(Completion::Directive { directive }));
}

#[tokio::test]
async fn fatal_upstream_error_stops_failover() {
    let upstream = ScriptedUpstream::new([
        (
            "k0",
            Script::Fail(ProviderError::upstream(Some(400), "Invalid argument")),
        ),
        ("k1", Script::Reply("never reached")),
    ]);
    let relay = relay(upstream.clone(), &["k0", "k1"]);

    let (events, result) = run_turn(&relay, "hi").await;

    assert_eq!(upstream.calls(), vec!["k0"]);
    assert_eq!(events.len(), 1, "{events:?}");
    assert!(matches!(
        &events[0],
        WireEvent::Error { kind: ErrorKind::FatalUpstream, message } if message.contains("Invalid argument")
    ));
    assert!(matches!(
        result,
        Err(RelayError::Failed(RelayFailure::FatalUpstream {
            status_code: Some(400),
            ..
        }))
    ));
}

#[tokio::test]
async fn exhausted_pool_reports_every_attempt() {
    let upstream = ScriptedUpstream::new([
        ("k0", unavailable()),
        ("k1", unavailable()),
        ("k2", unavailable()),
        ("k3", unavailable()),
    ]);
    let relay = relay(upstream.clone(), &["k0", "k1", "k2", "k3"]);

    let (events, result) = run_turn(&relay, "hi").await;

    assert_eq!(upstream.calls().len(), 4);
    assert_eq!(events.len(), 1, "{events:?}");
    assert!(matches!(
        events[0],
        WireEvent::Error {
            kind: ErrorKind::PoolExhausted,
            ..
        }
    ));
    match result {
        Err(RelayError::Failed(RelayFailure::PoolExhausted { attempts })) => {
            assert_eq!(attempts.len(), 4);
            assert!(attempts.iter().all(|a| a.status_code == Some(503)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_directive_surfaces_as_error_event() {
    let upstream = ScriptedUpstream::new([(
        "k0",
        Script::Reply(r#"{"type":"image_generation","prompts":["only one"]}"#),
    )]);
    let relay = relay(upstream, &["k0"]);

    let (events, result) = run_turn(&relay, "draw").await;

    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(
        events.last(),
        Some(WireEvent::Error {
            kind: ErrorKind::MalformedDirective,
            ..
        })
    ));
    assert!(matches!(
        result,
        Err(RelayError::Failed(RelayFailure::MalformedDirective { .. }))
    ));
}

#[tokio::test]
async fn abort_while_upstream_hangs_cancels_quietly() {
    let upstream = ScriptedUpstream::new([("k0", Script::Hang)]);
    let relay = relay(upstream, &["k0"]);

    let mut stream = relay.turn().user_text("hi").start_stream().await.expect("start");
    stream.abort_handle().abort();
    assert!(stream.next_event().await.is_none());
    assert_eq!(stream.finish().await, Err(RelayError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn default_pacing_spaces_fragments() {
    let upstream = ScriptedUpstream::new([("k0", Script::Reply("abcde"))]);
    let relay = Relay::builder()
        .provider(upstream)
        .credentials(CredentialPool::new(["k0"]).expect("pool"))
        .build()
        .expect("relay");

    let started = tokio::time::Instant::now();
    let (events, result) = run_turn(&relay, "hi").await;
    let elapsed = started.elapsed();

    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, WireEvent::TextDelta { .. }))
            .count(),
        5
    );
    assert!(result.is_ok());
    assert!(elapsed >= Duration::from_millis(80), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(120), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn abort_mid_stream_stops_pacing_without_terminal_event() {
    let upstream = ScriptedUpstream::new([("k0", Script::Reply("abcdefghij"))]);
    let relay = Relay::builder()
        .provider(upstream)
        .credentials(CredentialPool::new(["k0"]).expect("pool"))
        .build()
        .expect("relay");

    let mut stream = relay.turn().user_text("hi").start_stream().await.expect("start");
    assert!(matches!(
        stream.next_event().await,
        Some(WireEvent::UserEcho { .. })
    ));
    for expected in ["a", "b", "c"] {
        match stream.next_event().await {
            Some(WireEvent::TextDelta { text, .. }) => assert_eq!(text, expected),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    let aborted_at = tokio::time::Instant::now();
    stream.abort_handle().abort();
    let mut trailing = Vec::new();
    while let Some(event) = stream.next_event().await {
        trailing.push(event);
    }
    assert_eq!(stream.finish().await, Err(RelayError::Cancelled));

    assert!(trailing.is_empty(), "{trailing:?}");
    assert!(
        aborted_at.elapsed() < Duration::from_millis(20),
        "{:?}",
        aborted_at.elapsed()
    );
}

#[tokio::test]
async fn directive_with_blank_prompt_completes() {
    let upstream = ScriptedUpstream::new([(
        "k0",
        Script::Reply(r#"{"type":"image_generation","prompts":["a","","c","d"]}"#),
    )]);
    let relay = relay(upstream, &["k0"]);

    let (events, result) = run_turn(&relay, "draw").await;

    assert_eq!(terminal_count(&events), 1);
    match result {
        Ok(Completion::Directive { directive }) => {
            assert_eq!(directive.prompts, vec!["a", "", "c", "d"]);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
