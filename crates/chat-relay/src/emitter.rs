//! Turning upstream replies into ordered outbound events.
//!
//! [`FragmentSource`] yields text fragments either from a true upstream stream
//! or by segmenting a complete payload and releasing it at a steady pace.
//! [`EventSink`] delivers [`WireEvent`]s on the session's single channel and
//! closes it right after the terminal event.
//!
//! Classification is not this module's concern: the session decides which
//! fragments become `TextDelta` events.

use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::errors::ProviderError;
use crate::options::Pacing;
use crate::provider::{ProviderEvent, ProviderEventStream, UpstreamReply};
use crate::wire::WireEvent;

/// Splits `payload` into fragments of `chars_per_fragment` characters.
///
/// Concatenating the fragments always yields `payload` unchanged.
pub fn segment(payload: &str, chars_per_fragment: usize) -> Vec<String> {
    let size = chars_per_fragment.max(1);
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in payload.chars() {
        current.push(ch);
        count += 1;
        if count == size {
            fragments.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

/// Ordered fragments of one upstream reply.
pub enum FragmentSource {
    /// Synthetic streaming of a complete payload.
    Paced {
        fragments: VecDeque<String>,
        interval: Duration,
        released: usize,
    },
    /// Pass-through of a true upstream stream.
    Live { stream: ProviderEventStream, done: bool },
}

impl FragmentSource {
    pub fn from_reply(reply: UpstreamReply, pacing: Pacing) -> Self {
        match reply {
            UpstreamReply::Complete { text, .. } => Self::paced(&text, pacing),
            UpstreamReply::Streaming(stream) => Self::Live {
                stream,
                done: false,
            },
        }
    }

    pub fn paced(payload: &str, pacing: Pacing) -> Self {
        Self::Paced {
            fragments: segment(payload, pacing.fragment_len()).into(),
            interval: pacing.interval,
            released: 0,
        }
    }

    /// Next fragment, `None` at end of content.
    ///
    /// Paced sources wait `interval` before every fragment but the first.
    /// Dropping the returned future drops the pacing timer with it.
    pub async fn next_fragment(&mut self) -> Option<Result<String, ProviderError>> {
        match self {
            Self::Paced {
                fragments,
                interval,
                released,
            } => {
                if fragments.is_empty() {
                    return None;
                }
                if *released > 0 && !interval.is_zero() {
                    tokio::time::sleep(*interval).await;
                }
                *released += 1;
                fragments.pop_front().map(Ok)
            }
            Self::Live { stream, done } => {
                while !*done {
                    match stream.next().await {
                        Some(Ok(ProviderEvent::TextDelta { text })) if text.is_empty() => {}
                        Some(Ok(ProviderEvent::TextDelta { text })) => return Some(Ok(text)),
                        Some(Ok(ProviderEvent::Completed { finish_reason })) => {
                            debug!(?finish_reason, "upstream stream completed");
                            *done = true;
                        }
                        Some(Err(err)) => {
                            *done = true;
                            return Some(Err(err));
                        }
                        None => {
                            *done = true;
                            return Some(Err(ProviderError::protocol(
                                "upstream stream ended without completion",
                            )));
                        }
                    }
                }
                None
            }
        }
    }

    /// Stops pacing; remaining fragments are released back to back.
    ///
    /// Used once nothing more will be shown incrementally.
    pub fn unpace(&mut self) {
        if let Self::Paced { interval, .. } = self {
            *interval = Duration::ZERO;
        }
    }
}

/// The consumer is gone (channel dropped or abort requested) or the sink was
/// already closed by a terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Ordered, single-channel delivery of one session's wire events.
pub struct EventSink {
    tx: Option<mpsc::Sender<WireEvent>>,
    abort_rx: watch::Receiver<bool>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<WireEvent>, abort_rx: watch::Receiver<bool>) -> Self {
        Self {
            tx: Some(tx),
            abort_rx,
        }
    }

    /// Sends one event in order. A terminal event closes the channel; nothing
    /// can be emitted after it.
    pub async fn emit(&mut self, event: WireEvent) -> Result<(), Disconnected> {
        if self.is_aborted() {
            self.tx = None;
            return Err(Disconnected);
        }
        let Some(tx) = self.tx.as_ref() else {
            debug!(event = event.name(), "dropping event after terminal");
            return Err(Disconnected);
        };
        let terminal = event.is_terminal();
        let sent = tx.send(event).await.is_ok();
        if terminal || !sent {
            self.tx = None;
        }
        if sent { Ok(()) } else { Err(Disconnected) }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(mpsc::Sender::is_closed)
    }

    fn is_aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    /// Resolves once the consumer disconnects or requests an abort.
    pub async fn cancelled(&mut self) {
        if self.is_aborted() {
            return;
        }
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let abort_rx = &mut self.abort_rx;
        tokio::select! {
            () = tx.closed() => {}
            () = wait_for_abort(abort_rx) => {}
        }
    }
}

async fn wait_for_abort(abort_rx: &mut watch::Receiver<bool>) {
    loop {
        if abort_rx.changed().await.is_err() {
            // Abort handle dropped: only a channel close can cancel now.
            std::future::pending::<()>().await;
        }
        if *abort_rx.borrow() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Completion;
    use futures::stream;

    fn sink(capacity: usize) -> (EventSink, mpsc::Receiver<WireEvent>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (abort_tx, abort_rx) = watch::channel(false);
        (EventSink::new(tx, abort_rx), rx, abort_tx)
    }

    async fn drain(source: &mut FragmentSource) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(fragment) = source.next_fragment().await {
            out.push(fragment.expect("fragment"));
        }
        out
    }

    #[test]
    fn segmentation_preserves_content_and_char_boundaries() {
        assert_eq!(segment("Hello", 2), vec!["He", "ll", "o"]);
        assert_eq!(segment("héllo wörld", 1).concat(), "héllo wörld");
        assert_eq!(segment("日本語", 1), vec!["日", "本", "語"]);
        assert!(segment("", 3).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn paced_source_waits_between_fragments() {
        let mut source = FragmentSource::paced("abcd", Pacing::default());
        let started = tokio::time::Instant::now();
        assert_eq!(drain(&mut source).await, vec!["a", "b", "c", "d"]);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(60), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(80), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn unpace_releases_the_rest_immediately() {
        let mut source = FragmentSource::paced("abcd", Pacing::default());
        let first = source.next_fragment().await.expect("first").expect("ok");
        assert_eq!(first, "a");
        source.unpace();
        let started = tokio::time::Instant::now();
        assert_eq!(drain(&mut source).await, vec!["b", "c", "d"]);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn live_source_skips_empty_deltas_and_stops_at_completion() {
        let mut source = FragmentSource::from_reply(
            UpstreamReply::Streaming(Box::pin(stream::iter(vec![
                Ok(ProviderEvent::TextDelta { text: "a".into() }),
                Ok(ProviderEvent::TextDelta { text: String::new() }),
                Ok(ProviderEvent::TextDelta { text: "b".into() }),
                Ok(ProviderEvent::Completed { finish_reason: None }),
                Ok(ProviderEvent::TextDelta { text: "late".into() }),
            ]))),
            Pacing::default(),
        );
        assert_eq!(drain(&mut source).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn live_source_without_end_marker_reports_protocol_error() {
        let mut source = FragmentSource::from_reply(
            UpstreamReply::Streaming(Box::pin(stream::iter(vec![Ok(
                ProviderEvent::TextDelta { text: "a".into() },
            )]))),
            Pacing::default(),
        );
        assert!(matches!(source.next_fragment().await, Some(Ok(_))));
        assert!(matches!(
            source.next_fragment().await,
            Some(Err(ProviderError::Protocol { .. }))
        ));
        assert!(source.next_fragment().await.is_none());
    }

    #[tokio::test]
    async fn sink_closes_after_terminal_event() {
        let (mut sink, mut rx, _abort) = sink(8);
        sink.emit(WireEvent::TextDelta { seq: 0, text: "hi".into() })
            .await
            .expect("delta");
        sink.emit(WireEvent::Complete {
            result: Completion::Text { text: "hi".into() },
        })
        .await
        .expect("complete");
        assert_eq!(
            sink.emit(WireEvent::TextDelta { seq: 1, text: "late".into() }).await,
            Err(Disconnected)
        );
        assert!(sink.is_closed());

        assert!(matches!(rx.recv().await, Some(WireEvent::TextDelta { .. })));
        assert!(matches!(rx.recv().await, Some(WireEvent::Complete { .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_resolves_when_consumer_drops_or_aborts() {
        let (mut sink_a, rx, _abort) = sink(1);
        drop(rx);
        sink_a.cancelled().await;
        assert!(sink_a.is_closed());

        let (mut sink_b, _rx, abort) = sink(1);
        abort.send(true).expect("abort");
        sink_b.cancelled().await;
        assert_eq!(
            sink_b.emit(WireEvent::TextDelta { seq: 0, text: "x".into() }).await,
            Err(Disconnected)
        );
    }
}
