use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;

use crate::handlers::handle_llm_request;
use crate::state::AppState;
use crate::validation::validate_chat_request;

pub async fn chat_completions(
    State(state): State<AppState>,
    ConnectInfo(client_ip): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    handle_llm_request(state, client_ip, "/v1/chat/completions", validate_chat_request, headers, body).await
}
