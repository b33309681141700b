//! The streaming render loop: bytes in, tokens out to a [`TokenSink`].

use std::io::Write;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::sse::{self, SseFrame};

/// Longest SSE line accepted before the stream is considered broken.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Receives content deltas as they are decoded.
pub trait TokenSink {
    /// `accumulated` already includes `token`.
    fn on_token(&mut self, token: &str, accumulated: &str);
}

/// Prints tokens as they arrive; used by the one-shot `ask` command.
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TokenSink for WriterSink<W> {
    fn on_token(&mut self, token: &str, _accumulated: &str) {
        let _ = self.writer.write_all(token.as_bytes());
        let _ = self.writer.flush();
    }
}

/// Per-request state. Created when a request starts and dropped with it.
#[derive(Debug, Default)]
pub struct StreamState {
    pub accumulated_text: String,
    pub aborted: bool,
}

impl StreamState {
    fn push(&mut self, token: &str) {
        self.accumulated_text.push_str(token);
    }
}

/// Decode an SSE byte stream into `sink` until `[DONE]`, EOF or cancellation.
///
/// Lines are reassembled across chunk boundaries before decoding. Malformed
/// frames are skipped. Cancellation returns [`ChatError::Cancelled`] after the
/// sink has seen every token decoded so far; dropping `bytes` on return
/// closes the upstream connection.
pub async fn pump<S, E, K>(bytes: S, sink: &mut K, cancel: &CancellationToken) -> Result<String, ChatError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
    K: TokenSink + ?Sized,
{
    let reader = StreamReader::new(Box::pin(bytes.map(|chunk| chunk.map_err(std::io::Error::other))));
    // Split on raw bytes; a line that is not UTF-8 is decoded lossily and
    // then skipped by the frame decoder like any other malformed frame.
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
    let mut lines = FramedRead::new(reader, codec);
    let mut state = StreamState::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                state.aborted = true;
                break;
            }
            next = lines.next() => next,
        };

        let line = match next {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(ChatError::Stream(e.to_string())),
        };

        match sse::decode_line(&String::from_utf8_lossy(&line)) {
            Ok(SseFrame::Token(token)) => {
                state.push(&token);
                sink.on_token(&token, &state.accumulated_text);
            }
            Ok(SseFrame::Skip) => {}
            Ok(SseFrame::Done) => break,
            Err(e) => tracing::debug!("Skipping SSE line: {}", e),
        }
    }

    if state.aborted {
        tracing::info!("Stream stopped after {} chars", state.accumulated_text.len());
        return Err(ChatError::Cancelled);
    }

    Ok(state.accumulated_text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::stream;

    /// Records every token in order.
    #[derive(Default)]
    pub(crate) struct Collector {
        pub tokens: Vec<String>,
        pub snapshots: Vec<String>,
    }

    impl TokenSink for Collector {
        fn on_token(&mut self, token: &str, accumulated: &str) {
            self.tokens.push(token.to_string());
            self.snapshots.push(accumulated.to_string());
        }
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        let owned: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from(p.to_string()))).collect();
        stream::iter(owned)
    }

    const HI_STREAM: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\ndata: [DONE]\n\n";

    #[tokio::test]
    async fn emits_tokens_in_order_and_accumulates() {
        let mut sink = Collector::default();
        let text = pump(chunks(&[HI_STREAM]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "Hi!");
        assert_eq!(sink.tokens, vec!["Hi", "!"]);
        assert_eq!(sink.snapshots, vec!["Hi", "Hi!"]);
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let mut sink = Collector::default();
        let parts: Vec<&str> = vec![
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"Hi\"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\nda",
            "ta: [DONE]\n\n",
        ];
        let text = pump(chunks(&parts), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "Hi!");
        assert_eq!(sink.tokens, vec!["Hi", "!"]);
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks_survive() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo ✓\"}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('✓').unwrap() + 1;
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];

        let mut sink = Collector::default();
        let text = pump(stream::iter(parts), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "héllo ✓");
    }

    #[tokio::test]
    async fn malformed_frame_does_not_abort_the_stream() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: not-json\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n\n";
        let mut sink = Collector::default();
        let text = pump(chunks(&[body]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "ab");
        assert_eq!(sink.tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn invalid_utf8_frame_is_skipped() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")),
            Ok(Bytes::from_static(b"data: \xff\xfe garbage\n\n")),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n\n")),
        ];

        let mut sink = Collector::default();
        let text = pump(stream::iter(parts), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "ab");
        assert_eq!(sink.tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn oversized_line_ends_the_stream() {
        let long = format!("data: {}\n", "x".repeat(MAX_LINE_LENGTH + 1));
        let mut sink = Collector::default();
        let err = pump(chunks(&[&long]), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Stream(_)));
    }

    #[tokio::test]
    async fn nothing_after_done_is_read() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n";
        let mut sink = Collector::default();
        let text = pump(chunks(&[body]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "x");
    }

    #[tokio::test]
    async fn eof_without_done_completes_normally() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}";
        let mut sink = Collector::default();
        let text = pump(chunks(&[body]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "partial");
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_text() {
        let mut sink = Collector::default();
        let text = pump(chunks(&["data: [DONE]\n\n"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert!(text.is_empty());
        assert!(sink.tokens.is_empty());
    }

    #[tokio::test]
    async fn cancellation_keeps_tokens_already_delivered() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Bytes, std::io::Error>>();
        let body = tokio_stream_from(rx);
        let cancel = CancellationToken::new();

        tx.send(Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
        )))
        .unwrap();

        let pump_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut sink = Collector::default();
            let result = pump(body, &mut sink, &pump_cancel).await;
            (result, sink)
        });

        // Wait until the first token has been seen, then stop.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let (result, sink) = handle.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(sink.tokens, vec!["par"]);
        drop(tx);
    }

    #[tokio::test]
    async fn broken_transport_is_a_stream_error() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut sink = Collector::default();
        let err = pump(stream::iter(parts), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Stream(_)));
        assert_eq!(sink.tokens, vec!["a"]);
    }

    #[test]
    fn writer_sink_prints_tokens_verbatim() {
        let mut sink = WriterSink::new(Vec::new());
        sink.on_token("Hi", "Hi");
        sink.on_token("!", "Hi!");
        assert_eq!(sink.into_inner(), b"Hi!");
    }

    fn tokio_stream_from<T: Send + 'static>(
        mut rx: tokio::sync::mpsc::UnboundedReceiver<T>,
    ) -> impl Stream<Item = T> {
        stream::poll_fn(move |cx| rx.poll_recv(cx))
    }
}
