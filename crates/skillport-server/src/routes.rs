use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use skillport_core::types::ToolOutput;

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "skills": state.index.len(),
        "embedding": state.index.provider().kind().as_str(),
    }))
}

// ── Tools ───────────────────────────────────────────────────────────────

pub fn tool_routes() -> Router<AppState> {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
}

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "tools": state.tool_registry.schemas() }))
}

/// The request body is the tool's argument object; an empty body means `{}`.
async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<ToolOutput>) {
    if state.tool_registry.get(&name).is_none() {
        let output = state.tool_registry.execute(&name, None, Value::Null).await;
        return (StatusCode::NOT_FOUND, Json(output));
    }

    let args = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(args) => args,
            Err(e) => {
                let output = ToolOutput::error(None, format!("Error: invalid JSON body: {}", e));
                return (StatusCode::BAD_REQUEST, Json(output));
            }
        }
    };

    tracing::debug!("HTTP tool call: {}", name);
    let output = state.tool_registry.execute(&name, None, args).await;
    (StatusCode::OK, Json(output))
}
