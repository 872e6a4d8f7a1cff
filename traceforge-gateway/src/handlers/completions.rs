use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;

use crate::handlers::handle_llm_request;
use crate::state::AppState;
use crate::validation::validate_completions_request;

pub async fn completions(
    State(state): State<AppState>,
    ConnectInfo(client_ip): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    handle_llm_request(state, client_ip, "/v1/completions", validate_completions_request, headers, body).await
}
