//! Frame sequences produced by the streaming framer, read back off the wire.

mod common;

use std::sync::Arc;

use common::{answering, orchestrator};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use provider_orchestrator::mocks::MockAdapter;
use provider_orchestrator::streaming::{decode_frames, FrameDecoder, DEGRADED_HINT};
use provider_orchestrator::{ErrorKind, ProviderId, QueryRequest, StreamFrame, StreamFramer};
use tokio_util::sync::CancellationToken;

fn kinds(frames: &[StreamFrame]) -> Vec<&'static str> {
    frames.iter().map(StreamFrame::kind).collect()
}

async fn wire_bytes(framer: &StreamFramer, request: QueryRequest) -> Vec<u8> {
    framer
        .stream(request, CancellationToken::new())
        .into_sse_stream()
        .fold(Vec::new(), |mut body, chunk| async move {
            body.extend_from_slice(&chunk);
            body
        })
        .await
}

#[tokio::test]
async fn test_successful_answer_on_the_wire() {
    let framer = StreamFramer::new(Arc::new(orchestrator(&[answering(
        ProviderId::Groq,
        "Water boils at 100 \u{b0}C at sea level.",
    )])));
    let request = QueryRequest::new("u1", "When does water boil?").preferred_provider("groq");

    let body = wire_bytes(&framer, request).await;
    let frames = decode_frames(&body).unwrap();

    assert_eq!(kinds(&frames), vec!["start", "metadata", "content", "end"]);

    match &frames[1] {
        StreamFrame::Metadata { data } => {
            assert_eq!(data.provider.as_str(), "groq");
            assert_eq!(data.model, "groq-mock-model");
            assert!(!data.fallback_used);
            assert!(!data.cached);
            assert_eq!(data.query_type, "general");
            assert_eq!(data.hint, None);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
    assert_eq!(
        frames[2],
        StreamFrame::content("Water boils at 100 \u{b0}C at sea level.")
    );
}

#[tokio::test]
async fn test_degraded_answer_carries_hint() {
    let groq = Arc::new(MockAdapter::failing(ProviderId::Groq, ErrorKind::AuthFailed));
    let framer = StreamFramer::new(Arc::new(orchestrator(&[groq])));

    let frames = framer
        .stream(QueryRequest::new("u1", "hello"), CancellationToken::new())
        .collect_frames()
        .await;

    assert_eq!(kinds(&frames), vec!["start", "metadata", "content", "end"]);
    match &frames[1] {
        StreamFrame::Metadata { data } => {
            assert_eq!(data.provider.as_str(), "system");
            assert!(data.fallback_used);
            assert_eq!(data.hint.as_deref(), Some(DEGRADED_HINT));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_request_streams_single_error() {
    let groq = answering(ProviderId::Groq, "unused");
    let framer = StreamFramer::new(Arc::new(orchestrator(&[Arc::clone(&groq)])));

    let frames = framer
        .stream(
            QueryRequest::new("u1", "hi").preferred_provider("nobody"),
            CancellationToken::new(),
        )
        .collect_frames()
        .await;

    assert_eq!(kinds(&frames), vec!["start", "error"]);
    match &frames[1] {
        StreamFrame::Error { code, error } => {
            assert_eq!(code, "invalid_request");
            assert!(error.contains("nobody"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
    assert_eq!(groq.call_count(), 0);
}

#[tokio::test]
async fn test_decoder_survives_arbitrary_chunking() {
    let framer = StreamFramer::new(Arc::new(orchestrator(&[answering(
        ProviderId::Mistral,
        "Bonjour, \u{e7}a va? \u{1f600}",
    )])));
    let body = wire_bytes(&framer, QueryRequest::new("u1", "salut")).await;
    let expected = decode_frames(&body).unwrap();

    for size in [1, 2, 3, 7, 64] {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in body.chunks(size) {
            frames.extend(decoder.decode(chunk).unwrap());
        }
        frames.extend(decoder.finish().unwrap());

        assert_eq!(frames, expected, "chunk size {size}");
    }
}

#[tokio::test]
async fn test_exactly_one_terminal_frame() {
    let framer = StreamFramer::new(Arc::new(orchestrator(&[answering(ProviderId::Groq, "x")])));

    for _ in 0..5 {
        let frames = framer
            .stream(QueryRequest::new("u1", "again"), CancellationToken::new())
            .collect_frames()
            .await;

        let starts = frames.iter().filter(|f| f.kind() == "start").count();
        let terminals = frames.iter().filter(|f| f.is_terminal()).count();
        assert_eq!(starts, 1);
        assert_eq!(terminals, 1);
        assert!(frames.last().is_some_and(StreamFrame::is_terminal));
    }
}
