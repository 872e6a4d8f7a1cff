pub mod chat;
pub mod completions;
pub mod embeddings;
pub mod health;
pub mod metrics;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use traceforge_adapters::{Adapter, DispatchResult};
use traceforge_core::error::GatewayError;
use traceforge_core::fingerprint::{fingerprint, FingerprintInput, MatchMode};
use traceforge_core::provider_router::{select_provider, ProviderType};
use traceforge_core::session::{self, SessionContext};
use traceforge_core::trace::Trace;

use crate::state::AppState;
use crate::streaming::{aggregate_sse, synthesize_single_chunk_sse, AccumulatingStream, StreamSummary};

/// What part of the body feeds the request fingerprint and gets recorded
/// as the "content" half of a trace — differs per endpoint (`messages` for
/// chat, `prompt` for completions, `input` for embeddings).
fn content_field<'a>(endpoint: &str, body: &'a Value) -> &'a Value {
    static EMPTY: Value = Value::Null;
    let field = match endpoint {
        "/v1/chat/completions" => "messages",
        "/v1/completions" => "prompt",
        "/v1/embeddings" => "input",
        _ => return &EMPTY,
    };
    body.get(field).unwrap_or(&EMPTY)
}

fn match_mode_from_config(raw: &str) -> MatchMode {
    if raw.eq_ignore_ascii_case("exact") {
        MatchMode::Exact
    } else {
        MatchMode::Fuzzy
    }
}

fn header_name(name: &str) -> HeaderName {
    HeaderName::from_bytes(name.as_bytes()).expect("static header name is a valid token")
}

/// Stamps the session-propagation response headers (§4.6) onto `resp`,
/// regardless of whether the request succeeded.
fn apply_session_headers(resp: &mut Response, session_ctx: &SessionContext, trace_id: uuid::Uuid) {
    let headers = resp.headers_mut();
    if let Ok(v) = session_ctx.session_id.parse() {
        headers.insert(header_name(session::HDR_RESP_SESSION_ID), v);
    }
    if let Ok(v) = trace_id.to_string().parse() {
        headers.insert(header_name(session::HDR_RESP_TRACE_ID), v);
    }
    if let Ok(v) = session_ctx.next_step().to_string().parse() {
        headers.insert(header_name(session::HDR_RESP_NEXT_STEP), v);
    }
}

fn error_response(err: GatewayError, session_ctx: &SessionContext, trace_id: uuid::Uuid) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = (status, axum::Json(err.to_body())).into_response();
    apply_session_headers(&mut resp, session_ctx, trace_id);
    resp
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

/// Extracts the fields the fingerprint and trace metadata need out of an
/// arbitrary request body, tolerating absent optional fields.
struct RequestFacts<'a> {
    model: &'a str,
    content: &'a Value,
}

fn request_facts<'a>(endpoint: &str, body: &'a Value) -> RequestFacts<'a> {
    RequestFacts {
        model: body.get("model").and_then(Value::as_str).unwrap_or(""),
        content: content_field(endpoint, body),
    }
}

fn build_fingerprint(provider: &str, body: &Value, facts: &RequestFacts<'_>, match_mode: MatchMode) -> String {
    let input = FingerprintInput {
        provider,
        model: facts.model,
        messages_or_prompt: facts.content,
        tools: body.get("tools"),
        temperature: body.get("temperature").and_then(Value::as_f64),
        max_tokens: body.get("max_tokens").and_then(Value::as_u64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        frequency_penalty: body.get("frequency_penalty").and_then(Value::as_f64),
        presence_penalty: body.get("presence_penalty").and_then(Value::as_f64),
        stop: body.get("stop"),
    };
    fingerprint(&input, match_mode)
}

fn tokens_used(response: &Value) -> Option<u64> {
    response.pointer("/usage/total_tokens").and_then(Value::as_u64)
}

/// Builds and records the `Trace` for one completed (non-streaming, or
/// already-accumulated) request. Storage failures are logged, never
/// propagated to the client — the upstream result has already been decided.
async fn record_trace(state: &AppState, mut trace: Trace, session_ctx: &SessionContext) {
    trace.session_id = Some(session_ctx.session_id.clone());
    trace.step_index = Some(session_ctx.step_index);
    trace.parent_trace_id = session_ctx.parent_trace_id;
    trace.state_snapshot = session_ctx.state_snapshot.clone();
    trace.step_id = session_ctx.step_id.clone();
    trace.parent_step_id = session_ctx.parent_step_id.clone();
    trace.organization_id = session_ctx.organization_id.clone();
    trace.service_id = session_ctx.service_id.clone();

    if let Err(e) = state.recorder.record(trace).await {
        tracing::warn!(error = %e, "failed to persist trace");
    }
}

/// Picks the adapter for this request: embeddings always resolve to the
/// opaque OpenAI-compatible passthrough (§4.1), everything else goes
/// through the provider router.
fn resolve_provider(
    state: &AppState,
    endpoint: &str,
    model: &str,
) -> (ProviderType, Option<traceforge_core::config::ProviderEntry>) {
    if endpoint == "/v1/embeddings" {
        let entry = state
            .config
            .providers
            .iter()
            .find(|p| p.enabled && p.provider_type.eq_ignore_ascii_case("openai"))
            .cloned();
        return (ProviderType::OpenAi, entry);
    }
    let selected = select_provider(model, &state.config.providers);
    (selected.provider_type, selected.entry)
}

/// The full request lifecycle described in §4.1: validate, route, rate
/// limit, VCR entry, dispatch (or replay), VCR exit, trace, response
/// headers. Shared by the chat/completions/embeddings handlers, which
/// differ only in their endpoint path and schema validator.
pub(crate) async fn handle_llm_request(
    state: AppState,
    client_ip: SocketAddr,
    endpoint: &'static str,
    validate: fn(&Value) -> Result<(), GatewayError>,
    headers: HeaderMap,
    body: Value,
) -> Response {
    let header_map = lowercase_headers(&headers);
    let session_ctx = SessionContext::from_headers(&header_map);
    let started = Instant::now();

    if let Err(e) = validate(&body) {
        let trace = Trace::new_error(endpoint, body.clone(), started.elapsed().as_millis() as u64, e.to_string());
        let trace_id = trace.id;
        record_trace(&state, trace, &session_ctx).await;
        return error_response(e, &session_ctx, trace_id);
    }

    let facts = request_facts(endpoint, &body);
    let (provider_type, provider_entry) = resolve_provider(&state, endpoint, facts.model);

    if !state.rate_limiter.check_and_record(client_ip.ip(), provider_type) {
        let e = GatewayError::RateLimited;
        let trace = Trace::new_error(endpoint, body.clone(), started.elapsed().as_millis() as u64, e.to_string());
        let trace_id = trace.id;
        record_trace(&state, trace, &session_ctx).await;
        return error_response(e, &session_ctx, trace_id);
    }

    // Resolved ahead of the VCR entry so replayed and live-dispatched
    // traces both carry the same annotated endpoint (§3: "annotated with
    // provider when normalized") — a missing adapter is reported later,
    // only if live dispatch actually needs one.
    let adapter = state.adapter_for(provider_type);
    let traced_endpoint =
        adapter.as_ref().map(|a| a.trace_endpoint(endpoint, &body)).unwrap_or_else(|| endpoint.to_string());

    let match_mode = match_mode_from_config(&state.config.vcr.match_mode);
    let fp = build_fingerprint(provider_type.as_str(), &body, &facts, match_mode);

    let cassette = match state.vcr.should_replay(provider_type.as_str(), &fp) {
        Ok(c) => c,
        Err(e) => {
            let trace =
                Trace::new_error(traced_endpoint, body.clone(), started.elapsed().as_millis() as u64, e.to_string());
            let trace_id = trace.id;
            record_trace(&state, trace, &session_ctx).await;
            return error_response(e, &session_ctx, trace_id);
        }
    };

    if let Some(cassette) = cassette {
        let duration_ms = started.elapsed().as_millis() as u64;
        let trace = Trace::new_success(
            traced_endpoint,
            body.clone(),
            cassette.response.body.clone(),
            duration_ms,
            Some(facts.model.to_string()),
            tokens_used(&cassette.response.body),
        );
        let trace_id = trace.id;
        record_trace(&state, trace, &session_ctx).await;

        let status = StatusCode::from_u16(cassette.response.status).unwrap_or(StatusCode::OK);
        let mut resp = (status, axum::Json(cassette.response.body)).into_response();
        for (k, v) in &cassette.response.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(k.as_bytes()), v.parse()) {
                resp.headers_mut().insert(name, value);
            }
        }
        apply_session_headers(&mut resp, &session_ctx, trace_id);
        return resp;
    }

    let Some(adapter) = adapter else {
        let e = GatewayError::Provider { status: 500, message: "no adapter configured for provider".into() };
        let trace = Trace::new_error(endpoint, body.clone(), started.elapsed().as_millis() as u64, e.to_string());
        let trace_id = trace.id;
        record_trace(&state, trace, &session_ctx).await;
        return error_response(e, &session_ctx, trace_id);
    };

    let wants_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let model_owned = facts.model.to_string();

    if wants_stream && adapter.supports_streaming() {
        let provider_label = provider_type.as_str().to_string();
        return handle_streaming_dispatch(
            state,
            adapter,
            provider_entry,
            endpoint,
            traced_endpoint,
            body,
            model_owned,
            provider_label,
            fp,
            session_ctx,
            started,
        )
        .await;
    }

    // A `stream=true` request against a non-streaming-capable adapter
    // falls back to one buffered call, synthesized as a single SSE chunk
    // below rather than forwarded chunk-by-chunk.
    let dispatch_result = adapter.dispatch(endpoint, &body, provider_entry.as_ref(), &session_ctx).await;

    match dispatch_result {
        Ok(DispatchResult { status, body: resp_body, upstream_duration_ms }) => {
            if let Err(e) = state.vcr.record(
                provider_type.as_str(),
                &fp,
                body.clone(),
                status,
                Default::default(),
                resp_body.clone(),
            ) {
                tracing::warn!(error = %e, "VCR record failed");
            }

            let trace = Trace::new_success(
                traced_endpoint,
                body.clone(),
                resp_body.clone(),
                upstream_duration_ms,
                Some(facts.model.to_string()),
                tokens_used(&resp_body),
            );
            let trace_id = trace.id;
            record_trace(&state, trace, &session_ctx).await;

            let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let mut resp = if wants_stream {
                let sse = synthesize_single_chunk_sse(&resp_body);
                let mut r = Response::new(Body::from(sse));
                *r.status_mut() = status_code;
                r.headers_mut().insert(
                    header_name("content-type"),
                    "text/event-stream".parse().expect("static content-type is valid"),
                );
                r
            } else {
                (status_code, axum::Json(resp_body)).into_response()
            };
            apply_session_headers(&mut resp, &session_ctx, trace_id);
            resp
        }
        Err(e) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let trace = Trace::new_error(traced_endpoint, body.clone(), duration_ms, e.to_string());
            let trace_id = trace.id;
            record_trace(&state, trace, &session_ctx).await;
            error_response(e, &session_ctx, trace_id)
        }
    }
}

/// True upstream-streamed dispatch: the client gets a forwarded byte
/// stream immediately, while an `AccumulatingStream` tees it for the trace
/// that gets recorded once the stream ends (§4.1 "Streaming").
#[allow(clippy::too_many_arguments)]
async fn handle_streaming_dispatch(
    state: AppState,
    adapter: std::sync::Arc<dyn traceforge_adapters::Adapter>,
    provider_entry: Option<traceforge_core::config::ProviderEntry>,
    endpoint: &'static str,
    traced_endpoint: String,
    body: Value,
    model: String,
    provider: String,
    fingerprint: String,
    session_ctx: SessionContext,
    started: Instant,
) -> Response {
    let upstream = adapter.dispatch_stream(endpoint, &body, provider_entry.as_ref(), &session_ctx).await;

    let byte_stream = match upstream {
        Ok(s) => s,
        Err(e) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let trace = Trace::new_error(traced_endpoint, body.clone(), duration_ms, e.to_string());
            let trace_id = trace.id;
            record_trace(&state, trace, &session_ctx).await;
            return error_response(e, &session_ctx, trace_id);
        }
    };

    let (tx, rx) = tokio::sync::oneshot::channel::<StreamSummary>();
    let accumulating = AccumulatingStream::new(byte_stream, tx);

    let trace_id = uuid::Uuid::new_v4();

    let mut resp = Response::new(Body::from_stream(accumulating));
    resp.headers_mut().insert(
        header_name("content-type"),
        "text/event-stream".parse().expect("static content-type is valid"),
    );
    apply_session_headers(&mut resp, &session_ctx, trace_id);

    let recorder_state = state.clone();
    let session_for_task = session_ctx.clone();
    tokio::spawn(async move {
        let Ok(summary) = rx.await else { return };
        let duration_ms = summary.stream_duration_ms;
        let trace = if let Some(err) = summary.error {
            Trace::new_error(traced_endpoint, body.clone(), duration_ms, err)
        } else {
            let aggregated = aggregate_sse(&summary.accumulated_body);
            if let Err(e) = recorder_state.vcr.record(
                &provider,
                &fingerprint,
                body.clone(),
                200,
                Default::default(),
                aggregated.clone(),
            ) {
                tracing::warn!(error = %e, "VCR record failed");
            }
            Trace::new_success(
                traced_endpoint,
                body.clone(),
                aggregated.clone(),
                duration_ms,
                Some(model.clone()),
                tokens_used(&aggregated),
            )
            .with_first_chunk_latency_ms(summary.first_chunk_latency_ms)
        };
        record_trace(&recorder_state, trace, &session_for_task).await;
    });

    resp
}
