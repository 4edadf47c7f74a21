use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument as _, debug, info_span};

use crate::config::Credential;
use crate::errors::{ClientError, StreamError};
use crate::reader::ChunkReader;
use crate::transport::ChunkSource;
use crate::types::{Chunk, StreamingRequest};

/// Handle used to stop a running subscription.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The transport stream is dropped and the subscription ends with
    /// `ChunkEvent::Error` carrying `StreamError::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Events emitted by a [`ChunkSubscription`].
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkEvent {
    /// A decoded chunk, in arrival order.
    Chunk { stream_id: uuid::Uuid, chunk: Chunk },
    /// Terminal success after the final chunk.
    Completed { stream_id: uuid::Uuid, chunks: u64 },
    /// Terminal failure.
    Error {
        stream_id: uuid::Uuid,
        error: StreamError,
    },
}

impl ChunkEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// A streaming call running on its own task.
///
/// Use `next_event()` to consume events as they arrive and `finish()` to
/// collect every chunk once the stream terminates.
pub struct ChunkSubscription {
    stream_id: uuid::Uuid,
    rx: mpsc::Receiver<ChunkEvent>,
    final_rx: oneshot::Receiver<Result<Vec<Chunk>, StreamError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl ChunkSubscription {
    /// Spawns a task that opens `request` on `source` and reads it to the end.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        source: Arc<dyn ChunkSource>,
        request: StreamingRequest,
        credential: Option<Credential>,
        capacity: usize,
    ) -> Result<Self, ClientError> {
        request.validate()?;
        if capacity == 0 {
            return Err(ClientError::Validation(
                "stream buffer capacity must be greater than 0".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);
        let stream_id = uuid::Uuid::new_v4();

        tokio::spawn(
            stream_task(source, request, credential, stream_id, tx, final_tx, abort_rx)
                .instrument(info_span!("chunk_stream", %stream_id)),
        );

        Ok(Self {
            stream_id,
            rx,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            saw_terminal: false,
        })
    }

    pub fn stream_id(&self) -> uuid::Uuid {
        self.stream_id
    }

    /// Returns a handle that can cancel the subscription.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next event.
    ///
    /// Returns `None` after the terminal event has been consumed.
    pub async fn next_event(&mut self) -> Option<ChunkEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(ChunkEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains remaining events and returns every chunk of the stream.
    ///
    /// Safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<Vec<Chunk>, StreamError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(StreamError::transport(format!(
                "stream task {} ended without a result",
                self.stream_id
            ))),
        }
    }
}

async fn stream_task(
    source: Arc<dyn ChunkSource>,
    request: StreamingRequest,
    credential: Option<Credential>,
    stream_id: uuid::Uuid,
    tx: mpsc::Sender<ChunkEvent>,
    final_tx: oneshot::Sender<Result<Vec<Chunk>, StreamError>>,
    mut abort_rx: watch::Receiver<bool>,
) {
    let opened = tokio::select! {
        _ = cancelled(&mut abort_rx) => Err(StreamError::Cancelled),
        opened = source.open(&request, credential.as_ref()) => opened,
    };
    let bytes = match opened {
        Ok(bytes) => bytes,
        Err(error) => {
            fail(&tx, &mut abort_rx, final_tx, stream_id, error).await;
            return;
        }
    };
    debug!("chunk stream opened");

    let mut reader = ChunkReader::new(bytes);
    let mut chunks: Vec<Chunk> = Vec::new();
    loop {
        let next = tokio::select! {
            _ = cancelled(&mut abort_rx) => Some(Err(StreamError::Cancelled)),
            next = reader.next_chunk() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                let is_final = chunk.is_final;
                chunks.push(chunk.clone());
                if !send_event(&tx, &mut abort_rx, ChunkEvent::Chunk { stream_id, chunk }).await {
                    debug!("subscriber dropped or stream aborted; stopping stream");
                    let _ = final_tx.send(Err(StreamError::Cancelled));
                    return;
                }
                if is_final {
                    let count = chunks.len() as u64;
                    let sent = send_event(
                        &tx,
                        &mut abort_rx,
                        ChunkEvent::Completed {
                            stream_id,
                            chunks: count,
                        },
                    )
                    .await;
                    debug!(chunks = count, "chunk stream completed");
                    let _ = final_tx.send(if sent {
                        Ok(chunks)
                    } else {
                        Err(StreamError::Cancelled)
                    });
                    return;
                }
            }
            Some(Err(error)) => {
                fail(&tx, &mut abort_rx, final_tx, stream_id, error).await;
                return;
            }
            None => {
                let error = StreamError::EndedWithoutFinal {
                    chunks: reader.delivered(),
                };
                fail(&tx, &mut abort_rx, final_tx, stream_id, error).await;
                return;
            }
        }
    }
}

async fn fail(
    tx: &mpsc::Sender<ChunkEvent>,
    abort_rx: &mut watch::Receiver<bool>,
    final_tx: oneshot::Sender<Result<Vec<Chunk>, StreamError>>,
    stream_id: uuid::Uuid,
    error: StreamError,
) {
    debug!(%error, "chunk stream failed");
    let _ = send_event(
        tx,
        abort_rx,
        ChunkEvent::Error {
            stream_id,
            error: error.clone(),
        },
    )
    .await;
    let _ = final_tx.send(Err(error));
}

/// Resolves once an abort was requested; pends forever if the handle is gone.
async fn cancelled(abort_rx: &mut watch::Receiver<bool>) {
    let handle_dropped = abort_rx.wait_for(|aborted| *aborted).await.is_err();
    if handle_dropped {
        std::future::pending::<()>().await;
    }
}

/// Sends `event`, giving up when the subscriber is gone or an abort arrives
/// while the buffer is full.
async fn send_event(
    tx: &mpsc::Sender<ChunkEvent>,
    abort_rx: &mut watch::Receiver<bool>,
    event: ChunkEvent,
) -> bool {
    tokio::select! {
        biased;
        sent = tx.send(event) => sent.is_ok(),
        _ = cancelled(abort_rx) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ByteStream;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        calls: Arc<AtomicUsize>,
        behavior: FakeBehavior,
    }

    enum FakeBehavior {
        OpenError(StreamError),
        Body(Vec<Result<&'static str, StreamError>>),
        Pending,
    }

    #[async_trait::async_trait]
    impl ChunkSource for FakeSource {
        async fn open(
            &self,
            _request: &StreamingRequest,
            _credential: Option<&Credential>,
        ) -> Result<ByteStream, StreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                FakeBehavior::OpenError(err) => Err(err.clone()),
                FakeBehavior::Body(parts) => {
                    let items: Vec<Result<bytes::Bytes, StreamError>> = parts
                        .iter()
                        .map(|p| {
                            p.clone()
                                .map(|text| bytes::Bytes::from_static(text.as_bytes()))
                        })
                        .collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                FakeBehavior::Pending => Ok(Box::pin(stream::pending::<
                    Result<bytes::Bytes, StreamError>,
                >())),
            }
        }
    }

    fn source(behavior: FakeBehavior) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            calls: Arc::new(AtomicUsize::new(0)),
            behavior,
        })
    }

    fn subscribe(source: Arc<FakeSource>) -> ChunkSubscription {
        ChunkSubscription::spawn(source, StreamingRequest::user("hello"), None, 16)
            .expect("spawn")
    }

    #[tokio::test]
    async fn emits_chunks_then_completed() {
        let mut sub = subscribe(source(FakeBehavior::Body(vec![
            Ok("data: {\"chunk_index\":0,\"data\":\"a\"}\n"),
            Ok("data: {\"chunk_index\":1,\"data\":\"b\",\"is_final\":true}\n"),
        ])));

        let mut indices = Vec::new();
        let mut completed = None;
        while let Some(event) = sub.next_event().await {
            match event {
                ChunkEvent::Chunk { chunk, .. } => indices.push(chunk.chunk_index),
                ChunkEvent::Completed { chunks, .. } => completed = Some(chunks),
                ChunkEvent::Error { error, .. } => panic!("unexpected error: {error}"),
            }
        }
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(completed, Some(2));
        assert_eq!(sub.finish().await.expect("finish").len(), 2);
    }

    #[tokio::test]
    async fn finish_without_consuming_collects_all_chunks() {
        let sub = subscribe(source(FakeBehavior::Body(vec![
            Ok("data: {\"chunk_index\":0}\ndata: {\"chunk_index\":1}\n"),
            Ok("data: {\"chunk_index\":2,\"is_final\":true}\n"),
        ])));
        let chunks = sub.finish().await.expect("finish");
        let indices: Vec<u64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn open_failure_is_terminal_error() {
        let fake = source(FakeBehavior::OpenError(StreamError::Http {
            status: 502,
            body: "bad gateway".into(),
        }));
        let calls = fake.calls.clone();
        let mut sub = subscribe(fake);
        let event = sub.next_event().await.expect("event");
        assert!(matches!(
            event,
            ChunkEvent::Error {
                error: StreamError::Http { status: 502, .. },
                ..
            }
        ));
        assert!(matches!(
            sub.finish().await,
            Err(StreamError::Http { status: 502, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_mid_stream_is_terminal_error() {
        let sub = subscribe(source(FakeBehavior::Body(vec![
            Ok("data: {\"chunk_index\":0}\n"),
            Err(StreamError::transport("reset")),
        ])));
        assert_eq!(
            sub.finish().await,
            Err(StreamError::transport("reset"))
        );
    }

    #[tokio::test]
    async fn missing_final_marker_is_terminal_error() {
        let sub = subscribe(source(FakeBehavior::Body(vec![Ok(
            "data: {\"chunk_index\":0}\n",
        )])));
        assert_eq!(
            sub.finish().await,
            Err(StreamError::EndedWithoutFinal { chunks: 1 })
        );
    }

    #[tokio::test]
    async fn abort_emits_cancelled() {
        let mut sub = subscribe(source(FakeBehavior::Pending));
        sub.abort_handle().abort();

        let mut saw_cancel = false;
        while let Some(event) = sub.next_event().await {
            if let ChunkEvent::Error {
                error: StreamError::Cancelled,
                ..
            } = event
            {
                saw_cancel = true;
            }
        }
        assert!(saw_cancel);
        assert_eq!(sub.finish().await, Err(StreamError::Cancelled));
    }

    #[tokio::test]
    async fn abort_stops_a_task_blocked_on_a_full_buffer() {
        let fake = source(FakeBehavior::Body(vec![
            Ok("data: {\"chunk_index\":0}\n"),
            Ok("data: {\"chunk_index\":1}\n"),
            Ok("data: {\"chunk_index\":2}\n"),
            Ok("data: {\"chunk_index\":3,\"is_final\":true}\n"),
        ]));
        let mut sub = ChunkSubscription::spawn(fake, StreamingRequest::user("hello"), None, 1)
            .expect("spawn");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sub.abort_handle().abort();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut indices = Vec::new();
        while let Some(event) = sub.next_event().await {
            if let ChunkEvent::Chunk { chunk, .. } = event {
                indices.push(chunk.chunk_index);
            }
        }
        assert_eq!(indices, vec![0]);
        assert_eq!(sub.finish().await, Err(StreamError::Cancelled));
    }

    #[tokio::test]
    async fn spawn_rejects_invalid_requests() {
        let err = ChunkSubscription::spawn(
            source(FakeBehavior::Pending),
            StreamingRequest::new(vec![]),
            None,
            16,
        );
        assert!(matches!(err, Err(ClientError::Validation(_))));

        let err = ChunkSubscription::spawn(
            source(FakeBehavior::Pending),
            StreamingRequest::user("hi"),
            None,
            0,
        );
        assert!(matches!(err, Err(ClientError::Validation(msg)) if msg.contains("capacity")));
    }
}
