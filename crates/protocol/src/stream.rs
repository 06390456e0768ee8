use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use super::event::{StreamEvent, decode_line};
use super::framer::LineFramer;

/// Lazy, finite, non-restartable sequence of decoded events over a byte stream.
///
/// Each upstream chunk is framed into lines, each line decoded; undecodable lines are
/// skipped. An upstream error is yielded once and ends the sequence. The unterminated
/// tail left when the upstream finishes is discarded.
pub struct EventStream<S> {
    chunks: S,
    framer: Option<LineFramer>,
    ready: VecDeque<StreamEvent>,
    lines_seen: u64,
}

impl<S, E> EventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(chunks: S) -> Self {
        Self {
            chunks,
            framer: Some(LineFramer::new()),
            ready: VecDeque::new(),
            lines_seen: 0,
        }
    }

    /// Count of complete lines framed so far, payload or not.
    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }

    fn absorb(&mut self, chunk: &[u8]) {
        let Some(framer) = self.framer.as_mut() else {
            return;
        };
        for line in framer.feed(chunk) {
            self.lines_seen += 1;
            if let Some(event) = decode_line(&line) {
                self.ready.push_back(event);
            }
        }
    }

    fn close(&mut self) {
        if let Some(framer) = self.framer.take()
            && let Some(tail) = framer.finish()
        {
            tracing::debug!(tail_len = tail.len(), "discarding unterminated trailing line");
        }
    }
}

impl<S, E> Stream for EventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<StreamEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.framer.is_none() {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.chunks).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.absorb(&chunk),
                Poll::Ready(Some(Err(error))) => {
                    this.close();
                    this.ready.clear();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => this.close(),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::stream;

    use super::*;

    const TRANSCRIPT: &str = concat!(
        ": keep-alive\n\n",
        "data: {\"type\":\"status\",\"content\":\"summarizing context\"}\n\n",
        "data: {\"type\":\"context_debug\",\"tokens\":512}\n\n",
        "data: {\"type\":\"token\",\"content\":\"Grüße \"}\n\n",
        "data: {\"broken\n\n",
        "data: {\"type\":\"token\",\"content\":\"🚀!\"}\n\n",
        "data: {\"type\":\"done\",\"conversation_id\":\"conv_42\",\"model\":\"m1\",\"latency_ms\":9}\n\n",
        "data: {\"type\":\"token\",\"content\":\"tail"
    );

    async fn collect_in_pieces(piece_len: usize) -> Vec<StreamEvent> {
        let chunks = TRANSCRIPT
            .as_bytes()
            .chunks(piece_len)
            .map(|piece| Ok::<_, std::io::Error>(Bytes::copy_from_slice(piece)))
            .collect::<Vec<_>>();

        EventStream::new(stream::iter(chunks))
            .filter_map(|item| async move { item.ok() })
            .collect()
            .await
    }

    #[tokio::test]
    async fn event_sequence_is_independent_of_chunk_boundaries() {
        let whole = collect_in_pieces(TRANSCRIPT.len()).await;
        assert_eq!(whole.len(), 5);
        assert_eq!(
            whole[2],
            StreamEvent::Token {
                content: "Grüße ".to_string()
            }
        );
        assert!(matches!(whole[4], StreamEvent::Done(_)));

        for piece_len in [1, 2, 3, 5, 7, 13, 64] {
            assert_eq!(collect_in_pieces(piece_len).await, whole, "piece length {piece_len}");
        }
    }

    #[tokio::test]
    async fn upstream_error_ends_the_sequence() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"token\",\"content\":\"a\"}\n")),
            Err("connection reset"),
            Ok(Bytes::from_static(b"data: {\"type\":\"token\",\"content\":\"b\"}\n")),
        ];
        let items = EventStream::new(stream::iter(chunks)).collect::<Vec<_>>().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err("connection reset"));
    }
}
