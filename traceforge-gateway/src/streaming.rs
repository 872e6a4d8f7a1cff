use bytes::Bytes;
use futures::Stream;
use serde_json::{json, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use traceforge_adapters::ByteStream;
use traceforge_core::error::GatewayError;

/// What the handler needs back once an accumulated stream has finished, to
/// build the aggregated `Trace` (§4.1 "Streaming").
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub accumulated_body: Vec<u8>,
    pub first_chunk_latency_ms: Option<u64>,
    pub stream_duration_ms: u64,
    /// `Some` iff the upstream stream ended with an error — carries the
    /// error's display text for the error trace, since `GatewayError`
    /// itself isn't `Clone`-shared across the oneshot boundary.
    pub error: Option<String>,
}

/// Tees a forwarded upstream byte stream into an accumulator while timing
/// it, handing a `StreamSummary` to `on_done` exactly once — whether the
/// stream finishes normally, errors, or is dropped early by the client.
///
/// A manual `Stream` impl rather than `async-stream`: the teacher's
/// dependency stack doesn't carry that crate, and `ByteStream` is already
/// `Unpin` (it's a `Pin<Box<dyn Stream + Send>>`), so polling it directly
/// here needs no extra pinning machinery.
pub struct AccumulatingStream {
    inner: ByteStream,
    accumulated: Vec<u8>,
    started: Instant,
    first_chunk_at: Option<Instant>,
    on_done: Option<oneshot::Sender<StreamSummary>>,
    error: Option<String>,
}

impl AccumulatingStream {
    pub fn new(inner: ByteStream, on_done: oneshot::Sender<StreamSummary>) -> Self {
        Self {
            inner,
            accumulated: Vec::new(),
            started: Instant::now(),
            first_chunk_at: None,
            on_done: Some(on_done),
            error: None,
        }
    }

    fn finish(&mut self) {
        if let Some(tx) = self.on_done.take() {
            let summary = StreamSummary {
                accumulated_body: std::mem::take(&mut self.accumulated),
                first_chunk_latency_ms: self
                    .first_chunk_at
                    .map(|t| t.saturating_duration_since(self.started).as_millis() as u64),
                stream_duration_ms: self.started.elapsed().as_millis() as u64,
                error: self.error.take(),
            };
            let _ = tx.send(summary);
        }
    }
}

impl Stream for AccumulatingStream {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if this.first_chunk_at.is_none() {
                    this.first_chunk_at = Some(Instant::now());
                }
                this.accumulated.extend_from_slice(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.error = Some(e.to_string());
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for AccumulatingStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Wraps a single buffered response body as one synthetic SSE chunk,
/// followed by `data: [DONE]`, for adapters that don't natively stream
/// (§4.1, Anthropic/Gemini/Ollama's native SSE dialects aren't translated
/// chunk-by-chunk here — see DESIGN.md).
pub fn synthesize_single_chunk_sse(body: &Value) -> Bytes {
    let chunk = format!("data: {}\n\ndata: [DONE]\n\n", body);
    Bytes::from(chunk.into_bytes())
}

/// Reassembles a forwarded OpenAI-compatible SSE byte stream (the only
/// dialect actually chunk-forwarded — see `Adapter::supports_streaming`)
/// into a single chat-completion-shaped body, so a streamed trace or VCR
/// cassette replays the same way a buffered one does.
pub fn aggregate_sse(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);

    let mut id = Value::Null;
    let mut model = Value::Null;
    let mut created = Value::Null;
    let mut finish_reason = Value::Null;
    let mut usage = Value::Null;
    let mut content = String::new();

    for line in text.lines() {
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data == "[DONE]" {
            continue;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else { continue };

        if id.is_null() {
            id = chunk.get("id").cloned().unwrap_or(Value::Null);
        }
        if model.is_null() {
            model = chunk.get("model").cloned().unwrap_or(Value::Null);
        }
        if created.is_null() {
            created = chunk.get("created").cloned().unwrap_or(Value::Null);
        }
        if let Some(delta) = chunk.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            content.push_str(delta);
        }
        if let Some(fr) = chunk.pointer("/choices/0/finish_reason") {
            if !fr.is_null() {
                finish_reason = fr.clone();
            }
        }
        if let Some(u) = chunk.get("usage") {
            if !u.is_null() {
                usage = u.clone();
            }
        }
    }

    let mut body = json!({
        "id": id,
        "object": "chat.completion",
        "model": model,
        "created": created,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish_reason,
        }],
    });
    if !usage.is_null() {
        body["usage"] = usage;
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use serde_json::json;

    #[tokio::test]
    async fn accumulates_all_chunks_and_reports_completion() {
        let chunks: Vec<Result<Bytes, GatewayError>> = vec![
            Ok(Bytes::from_static(b"data: chunk1\n\n")),
            Ok(Bytes::from_static(b"data: chunk2\n\n")),
        ];
        let inner: ByteStream = Box::pin(stream::iter(chunks));
        let (tx, rx) = oneshot::channel();
        let mut acc = AccumulatingStream::new(inner, tx);

        while (acc.next().await).is_some() {}
        drop(acc);

        let summary = rx.await.unwrap();
        assert_eq!(summary.accumulated_body, b"data: chunk1\n\ndata: chunk2\n\n");
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn reports_error_on_upstream_failure() {
        let chunks: Vec<Result<Bytes, GatewayError>> =
            vec![Err(GatewayError::Transport("boom".into()))];
        let inner: ByteStream = Box::pin(stream::iter(chunks));
        let (tx, rx) = oneshot::channel();
        let mut acc = AccumulatingStream::new(inner, tx);
        while (acc.next().await).is_some() {}
        drop(acc);

        let summary = rx.await.unwrap();
        assert!(summary.error.is_some());
    }

    #[test]
    fn synthesized_sse_chunk_contains_done_sentinel() {
        let body = json!({"choices": []});
        let bytes = synthesize_single_chunk_sse(&body);
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn aggregate_sse_reassembles_deltas_into_one_message() {
        let stream = concat!(
            "data: {\"id\": \"chatcmpl-1\", \"model\": \"gpt-4\", \"created\": 1, ",
            "\"choices\": [{\"delta\": {\"content\": \"Hel\"}, \"finish_reason\": null}]}\n\n",
            "data: {\"choices\": [{\"delta\": {\"content\": \"lo\"}, \"finish_reason\": null}]}\n\n",
            "data: {\"choices\": [{\"delta\": {}, \"finish_reason\": \"stop\"}], ",
            "\"usage\": {\"total_tokens\": 7}}\n\n",
            "data: [DONE]\n\n",
        );
        let body = aggregate_sse(stream.as_bytes());
        assert_eq!(body["choices"][0]["message"]["content"], json!("Hello"));
        assert_eq!(body["choices"][0]["finish_reason"], json!("stop"));
        assert_eq!(body["model"], json!("gpt-4"));
        assert_eq!(body["usage"]["total_tokens"], json!(7));
    }

    #[test]
    fn aggregate_sse_tolerates_empty_stream() {
        let body = aggregate_sse(b"");
        assert_eq!(body["choices"][0]["message"]["content"], json!(""));
    }
}
