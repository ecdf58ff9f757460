//! Producer/consumer plumbing that turns one answer into a frame stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::orchestrator::QueryHandler;
use crate::types::query::QueryRequest;

use super::frame::StreamFrame;

/// Default number of frames buffered between producer and consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Streams answers from a [`QueryHandler`] as frames.
#[derive(Clone)]
pub struct StreamFramer {
    handler: Arc<dyn QueryHandler>,
    capacity: usize,
}

impl StreamFramer {
    /// Creates a framer over a handler.
    pub fn new<H>(handler: Arc<H>) -> Self
    where
        H: QueryHandler + 'static,
    {
        Self {
            handler,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Sets the channel capacity; zero is raised to one.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Starts answering `request` and returns its frames.
    ///
    /// The work runs on a spawned task, so this must be called inside a
    /// Tokio runtime. Cancelling `cancel`, or dropping the returned stream,
    /// stops the work.
    pub fn stream(&self, request: QueryRequest, cancel: CancellationToken) -> FrameStream {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let token = cancel.child_token();
        let span = tracing::info_span!(
            "stream",
            user_id = %request.user_id,
            chat_type = %request.chat_type.as_str(),
        );

        let producer = produce(Arc::clone(&self.handler), request, token.clone(), sender);
        tokio::spawn(producer.instrument(span));

        FrameStream {
            receiver,
            finished: false,
            _guard: token.drop_guard(),
        }
    }
}

impl std::fmt::Debug for StreamFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFramer")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

async fn produce(
    handler: Arc<dyn QueryHandler>,
    request: QueryRequest,
    cancel: CancellationToken,
    sender: mpsc::Sender<StreamFrame>,
) {
    let start = StreamFrame::start(request.preferred_provider.clone());
    if sender.send(start).await.is_err() {
        tracing::debug!("Stream consumer went away before start");
        return;
    }

    let frames = match handler.handle_query(request, cancel).await {
        Ok(response) => StreamFrame::for_response(&response),
        Err(e) => {
            tracing::warn!(code = e.code(), error = %e, "Query failed, ending stream with error");
            vec![StreamFrame::error(&e)]
        }
    };

    for frame in frames {
        if sender.send(frame).await.is_err() {
            tracing::debug!("Stream consumer went away");
            return;
        }
    }
}

/// Frames of one streamed answer.
///
/// Yields nothing after a terminal frame. Dropping the stream cancels the
/// work behind it.
pub struct FrameStream {
    receiver: mpsc::Receiver<StreamFrame>,
    finished: bool,
    _guard: DropGuard,
}

impl FrameStream {
    /// Adapts the stream to SSE-encoded bytes.
    pub fn into_sse_stream(self) -> SseStream<Self> {
        SseStream::new(self)
    }

    /// Waits for every remaining frame.
    pub async fn collect_frames(self) -> Vec<StreamFrame> {
        self.collect().await
    }
}

impl Stream for FrameStream {
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                if frame.is_terminal() {
                    self.finished = true;
                    self.receiver.close();
                }
                Poll::Ready(Some(frame))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Encodes each frame of an inner stream as `data: <JSON>\n\n`.
    pub struct SseStream<S> {
        #[pin]
        inner: S,
    }
}

impl<S> SseStream<S> {
    /// Wraps a frame stream.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = StreamFrame>,
{
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .inner
            .poll_next(cx)
            .map(|frame| frame.map(|frame| Bytes::from(frame.to_sse())))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
