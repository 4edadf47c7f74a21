//! Chunked event reader.
//!
//! Consumes a byte stream of newline-delimited `data: <JSON>` records and
//! delivers the decoded [`Chunk`]s either through a [`ChunkHandler`]
//! ([`read_chunks`]) or as a pull stream ([`chunk_stream`]). Both stop after
//! the first chunk with `is_final: true`.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::{Stream, stream};
use tracing::{debug, trace, warn};

use crate::decoder::{DecodedLine, LineDecoder};
use crate::errors::StreamError;
use crate::types::Chunk;

/// Boxed byte stream produced by a [`ChunkSource`](crate::transport::ChunkSource).
pub type ByteStream =
    Pin<Box<dyn Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Reading,
    Eof,
    Done,
}

/// Pull-based reader over a byte stream.
///
/// `next_chunk` yields chunks in arrival order, then `None` after the final
/// chunk. A transport failure or a stream that ends without a final chunk
/// yields exactly one `Err` before `None`.
pub struct ChunkReader<S> {
    bytes: Pin<Box<S>>,
    decoder: LineDecoder,
    pending: VecDeque<Chunk>,
    state: ReaderState,
    delivered: u64,
    malformed: u64,
}

impl<S, B, E> ChunkReader<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<StreamError>,
{
    pub fn new(bytes: S) -> Self {
        Self {
            bytes: Box::pin(bytes),
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            state: ReaderState::Reading,
            delivered: 0,
            malformed: 0,
        }
    }

    /// Chunks handed out so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// `data: ` lines skipped because they could not be decoded.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Chunk, StreamError>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                self.delivered += 1;
                if chunk.is_final {
                    self.state = ReaderState::Done;
                    self.pending.clear();
                }
                return Some(Ok(chunk));
            }

            match self.state {
                ReaderState::Done => return None,
                ReaderState::Eof => {
                    self.state = ReaderState::Done;
                    return Some(Err(StreamError::EndedWithoutFinal {
                        chunks: self.delivered,
                    }));
                }
                ReaderState::Reading => {}
            }

            match self.bytes.next().await {
                Some(Ok(buf)) => {
                    let lines = self.decoder.push_chunk(buf.as_ref());
                    self.absorb(lines);
                }
                Some(Err(e)) => {
                    self.state = ReaderState::Done;
                    return Some(Err(e.into()));
                }
                None => {
                    if let Some(tail) = self.decoder.finish() {
                        self.absorb(vec![tail]);
                    }
                    self.state = ReaderState::Eof;
                }
            }
        }
    }

    fn absorb(&mut self, lines: Vec<DecodedLine>) {
        for line in lines {
            match line {
                DecodedLine::Chunk(chunk) => {
                    let is_final = chunk.is_final;
                    self.pending.push_back(chunk);
                    if is_final {
                        // anything after the final marker is dropped
                        break;
                    }
                }
                DecodedLine::Malformed { reason } => {
                    self.malformed += 1;
                    warn!(%reason, "skipping malformed streaming record");
                }
                DecodedLine::Ignored => trace!("ignoring non-data line"),
            }
        }
    }
}

/// Adapts a byte stream into a stream of chunks.
pub fn chunk_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<Chunk, StreamError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<StreamError>,
{
    stream::unfold(ChunkReader::new(bytes), |mut reader| async move {
        let item = reader.next_chunk().await?;
        Some((item, reader))
    })
}

/// Consumer callbacks for [`read_chunks`].
pub trait ChunkHandler {
    /// Called once per decoded chunk, in arrival order.
    fn on_chunk(&mut self, chunk: Chunk);
    /// Called once after the final chunk was delivered.
    fn on_complete(&mut self);
    /// Called once when the stream fails.
    fn on_error(&mut self, error: StreamError);
}

/// Closure-backed [`ChunkHandler`].
pub struct Callbacks<C, D, F> {
    on_chunk: C,
    on_complete: D,
    on_error: F,
}

/// Builds a handler from three closures.
pub fn callbacks<C, D, F>(on_chunk: C, on_complete: D, on_error: F) -> Callbacks<C, D, F>
where
    C: FnMut(Chunk),
    D: FnMut(),
    F: FnMut(StreamError),
{
    Callbacks {
        on_chunk,
        on_complete,
        on_error,
    }
}

impl<C, D, F> ChunkHandler for Callbacks<C, D, F>
where
    C: FnMut(Chunk),
    D: FnMut(),
    F: FnMut(StreamError),
{
    fn on_chunk(&mut self, chunk: Chunk) {
        (self.on_chunk)(chunk)
    }

    fn on_complete(&mut self) {
        (self.on_complete)()
    }

    fn on_error(&mut self, error: StreamError) {
        (self.on_error)(error)
    }
}

/// How a read ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A chunk with `is_final: true` was delivered.
    Completed,
    /// The stream failed; the error was passed to `on_error`.
    Failed(StreamError),
}

/// Outcome of [`read_chunks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSummary {
    pub chunks: u64,
    pub malformed: u64,
    pub termination: Termination,
}

impl ReadSummary {
    pub fn is_completed(&self) -> bool {
        self.termination == Termination::Completed
    }
}

/// Drives a byte stream to completion, invoking `handler` for each chunk.
///
/// Exactly one of `on_complete` or `on_error` is called, after all
/// `on_chunk` calls.
pub async fn read_chunks<S, B, E, H>(bytes: S, handler: &mut H) -> ReadSummary
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<StreamError>,
    H: ChunkHandler + ?Sized,
{
    let mut reader = ChunkReader::new(bytes);
    let termination = loop {
        match reader.next_chunk().await {
            Some(Ok(chunk)) => {
                let is_final = chunk.is_final;
                trace!(chunk_index = chunk.chunk_index, chunk_type = %chunk.chunk_type, "chunk received");
                handler.on_chunk(chunk);
                if is_final {
                    handler.on_complete();
                    break Termination::Completed;
                }
            }
            Some(Err(error)) => {
                handler.on_error(error.clone());
                break Termination::Failed(error);
            }
            None => {
                let error = StreamError::EndedWithoutFinal {
                    chunks: reader.delivered(),
                };
                handler.on_error(error.clone());
                break Termination::Failed(error);
            }
        }
    };
    let summary = ReadSummary {
        chunks: reader.delivered(),
        malformed: reader.malformed(),
        termination,
    };
    debug!(
        chunks = summary.chunks,
        malformed = summary.malformed,
        completed = summary.is_completed(),
        "chunk stream finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        chunks: Vec<Chunk>,
        completions: usize,
        errors: Vec<StreamError>,
    }

    impl ChunkHandler for Recorder {
        fn on_chunk(&mut self, chunk: Chunk) {
            self.chunks.push(chunk);
        }

        fn on_complete(&mut self) {
            self.completions += 1;
        }

        fn on_error(&mut self, error: StreamError) {
            self.errors.push(error);
        }
    }

    type Buffers = stream::Iter<std::vec::IntoIter<Result<Vec<u8>, StreamError>>>;

    fn buffers(parts: &[&str]) -> Buffers {
        let owned: Vec<Result<Vec<u8>, StreamError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    fn record(index: u64, is_final: bool) -> String {
        format!(
            "data: {{\"chunk_index\":{index},\"chunk_type\":\"partial\",\"data\":{{\"n\":{index}}},\"is_final\":{is_final}}}\n"
        )
    }

    async fn run(parts: &[&str]) -> (Recorder, ReadSummary) {
        let mut recorder = Recorder::default();
        let summary = read_chunks(buffers(parts), &mut recorder).await;
        (recorder, summary)
    }

    #[tokio::test]
    async fn n_records_then_final_yields_n_plus_one_chunks_and_one_completion() {
        let mut body = String::new();
        for i in 0..5 {
            body.push_str(&record(i, false));
        }
        body.push_str(&record(5, true));
        let (recorder, summary) = run(&[&body]).await;

        let indices: Vec<u64> = recorder.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(recorder.completions, 1);
        assert!(recorder.errors.is_empty());
        assert!(summary.is_completed());
        assert_eq!(summary.chunks, 6);
    }

    #[tokio::test]
    async fn two_line_example_yields_partial_then_complete() {
        let body = concat!(
            "data: {\"chunk_index\":0,\"chunk_type\":\"partial\",\"data\":{\"x\":1},\"is_final\":false}\n",
            "data: {\"chunk_index\":1,\"chunk_type\":\"complete\",\"data\":{\"x\":2},\"is_final\":true}\n",
        );
        let (recorder, _) = run(&[body]).await;
        assert_eq!(recorder.chunks.len(), 2);
        assert_eq!(recorder.chunks[0].chunk_index, 0);
        assert_eq!(recorder.chunks[0].data, serde_json::json!({"x":1}));
        assert_eq!(recorder.chunks[1].chunk_index, 1);
        assert_eq!(recorder.chunks[1].chunk_type, "complete");
        assert_eq!(recorder.completions, 1);
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn blank_and_unprefixed_lines_trigger_no_callbacks() {
        let body = format!(
            "\n\n: comment\nevent: update\nid: 7\n{}   \n{}",
            record(0, false),
            record(1, true)
        );
        let (recorder, summary) = run(&[&body]).await;
        assert_eq!(recorder.chunks.len(), 2);
        assert_eq!(summary.malformed, 0);
    }

    #[tokio::test]
    async fn malformed_json_is_skipped_and_later_lines_still_processed() {
        let body = format!(
            "{}data: {{broken\ndata: [1,2,3]\n{}",
            record(0, false),
            record(1, true)
        );
        let (recorder, summary) = run(&[&body]).await;
        let indices: Vec<u64> = recorder.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(summary.malformed, 2);
        assert_eq!(recorder.completions, 1);
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn final_record_with_null_fields_still_completes() {
        let body = format!(
            "{}data: {{\"chunk_type\":null,\"chunk_index\":null,\"data\":{{\"done\":true}},\"is_final\":true}}\n",
            record(0, false)
        );
        let (recorder, summary) = run(&[&body]).await;
        assert_eq!(recorder.chunks.len(), 2);
        assert_eq!(recorder.chunks[1].data, serde_json::json!({"done":true}));
        assert_eq!(recorder.completions, 1);
        assert!(recorder.errors.is_empty());
        assert_eq!(summary.malformed, 0);
        assert!(summary.is_completed());
    }

    #[tokio::test]
    async fn transport_error_before_final_reports_one_error_and_no_completion() {
        let first = record(0, false);
        let items: Vec<Result<Vec<u8>, StreamError>> = vec![
            Ok(first.into_bytes()),
            Err(StreamError::transport("connection reset")),
            Ok(record(1, true).into_bytes()),
        ];
        let mut recorder = Recorder::default();
        let summary = read_chunks(stream::iter(items), &mut recorder).await;

        assert_eq!(recorder.chunks.len(), 1);
        assert_eq!(recorder.completions, 0);
        assert_eq!(
            recorder.errors,
            vec![StreamError::transport("connection reset")]
        );
        assert!(matches!(summary.termination, Termination::Failed(StreamError::Transport { .. })));
    }

    #[tokio::test]
    async fn io_errors_convert_to_transport_errors() {
        let items: Vec<Result<&'static [u8], std::io::Error>> = vec![Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "aborted",
        ))];
        let mut recorder = Recorder::default();
        read_chunks(stream::iter(items), &mut recorder).await;
        assert!(matches!(
            recorder.errors.as_slice(),
            [StreamError::Transport { message }] if message.contains("aborted")
        ));
    }

    #[tokio::test]
    async fn data_after_final_marker_is_never_delivered() {
        let body = format!("{}{}", record(0, true), record(1, false));
        let items: Vec<Result<Vec<u8>, StreamError>> = vec![
            Ok(body.into_bytes()),
            Err(StreamError::transport("should not be read")),
        ];
        let mut recorder = Recorder::default();
        let summary = read_chunks(stream::iter(items), &mut recorder).await;
        assert_eq!(recorder.chunks.len(), 1);
        assert_eq!(recorder.completions, 1);
        assert!(recorder.errors.is_empty());
        assert!(summary.is_completed());
    }

    #[tokio::test]
    async fn end_of_stream_without_final_reports_ended_without_final() {
        let body = format!("{}{}", record(0, false), record(1, false));
        let (recorder, summary) = run(&[&body]).await;
        assert_eq!(recorder.chunks.len(), 2);
        assert_eq!(recorder.completions, 0);
        assert_eq!(
            recorder.errors,
            vec![StreamError::EndedWithoutFinal { chunks: 2 }]
        );
        assert_eq!(
            summary.termination,
            Termination::Failed(StreamError::EndedWithoutFinal { chunks: 2 })
        );
    }

    #[tokio::test]
    async fn final_record_without_trailing_newline_completes() {
        let last = record(1, true);
        let body = format!("{}{}", record(0, false), last.trim_end());
        let (recorder, summary) = run(&[&body]).await;
        assert_eq!(recorder.chunks.len(), 2);
        assert!(summary.is_completed());
    }

    #[tokio::test]
    async fn records_split_across_buffers_are_parsed_once() {
        let body = format!("{}{}", record(0, false), record(1, true));
        let bytes = body.as_bytes();
        let parts: Vec<Result<Vec<u8>, StreamError>> =
            bytes.chunks(7).map(|c| Ok(c.to_vec())).collect();
        let mut recorder = Recorder::default();
        read_chunks(stream::iter(parts), &mut recorder).await;
        let indices: Vec<u64> = recorder.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(recorder.completions, 1);
    }

    #[tokio::test]
    async fn fresh_readers_replay_identical_sequences() {
        let body = format!(
            "{}data: nope\n{}{}",
            record(0, false),
            record(1, false),
            record(2, true)
        );
        let (first, first_summary) = run(&[&body[..10], &body[10..]]).await;
        let (second, second_summary) = run(&[&body[..10], &body[10..]]).await;
        assert_eq!(first.chunks, second.chunks);
        assert_eq!(first_summary, second_summary);
    }

    #[tokio::test]
    async fn closure_callbacks_receive_events() {
        let body = format!("{}{}", record(0, false), record(1, true));
        let mut seen = Vec::new();
        let mut completed = 0;
        let mut failed = 0;
        let mut handler = callbacks(
            |chunk: Chunk| seen.push(chunk.chunk_index),
            || completed += 1,
            |_err: StreamError| failed += 1,
        );
        read_chunks(buffers(&[&body]), &mut handler).await;
        drop(handler);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(completed, 1);
        assert_eq!(failed, 0);
    }

    #[tokio::test]
    async fn chunk_stream_ends_after_final() {
        let body = format!("{}{}{}", record(0, false), record(1, true), record(2, false));
        let items: Vec<Result<Chunk, StreamError>> =
            chunk_stream(buffers(&[&body])).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn chunk_stream_yields_single_terminal_error() {
        let items: Vec<Result<Chunk, StreamError>> =
            chunk_stream(buffers(&[&record(0, false)])).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1],
            Err(StreamError::EndedWithoutFinal { chunks: 1 })
        );
    }
}
