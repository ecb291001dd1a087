//! HTTP/SSE transport for the MCP tool surface.
//!
//! The duplex is split across two endpoints:
//!
//! - `GET /events` opens the long-lived server-to-client stream. The first
//!   event (`endpoint`) tells the client where to POST; every JSON-RPC
//!   response is then delivered as a `message` event on this stream.
//! - `POST /messages?session_id=<id>` carries the client-to-server half.
//!   The HTTP response is just an acknowledgement; tool results travel
//!   over the event stream.
//! - `GET /health` reports liveness.

use crate::config::ServerConfig;
use crate::protocol::{
    methods, ContentBlock, ErrorCode, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolsCapability, ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use crate::tools::{ToolContext, ToolRegistry};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared application state behind the router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub tools: Arc<ToolRegistry>,
    pub tool_ctx: ToolContext,
    sessions: Arc<Mutex<HashMap<String, mpsc::Sender<JsonRpcResponse>>>>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>, tools: Arc<ToolRegistry>, tool_ctx: ToolContext) -> Self {
        Self {
            config,
            tools,
            tool_ctx,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(events))
        .route("/messages", post(messages))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
    }))
}

/// Open an event stream and announce the per-session message endpoint.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().simple().to_string();
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);
    {
        let mut sessions = state.sessions.lock().expect("session map lock poisoned");
        sessions.insert(session_id.clone(), tx);
    }
    info!(session = %session_id, "event stream opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?session_id={session_id}"));

    let responses = ReceiverStream::new(rx).map(|response| {
        let payload = serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"jsonrpc":"2.0","error":{{"code":-32603,"message":"{e}"}}}}"#));
        Event::default().event("message").data(payload)
    });

    let stream = tokio_stream::once(endpoint)
        .chain(responses)
        .map(Ok::<_, Infallible>);

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: String,
}

/// Client half of the duplex: decode, dispatch, push the response onto the
/// session's event stream.
async fn messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> impl IntoResponse {
    let sender = {
        let sessions = state.sessions.lock().expect("session map lock poisoned");
        sessions.get(&query.session_id).cloned()
    };
    let Some(sender) = sender else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown session" })),
        );
    };

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            let response = JsonRpcResponse::error(
                None,
                JsonRpcError::new(ErrorCode::ParseError, format!("invalid JSON: {e}")),
            );
            deliver(&state, &query.session_id, &sender, response).await;
            return (StatusCode::ACCEPTED, Json(json!({ "ok": true })));
        }
    };

    debug!(session = %query.session_id, method = %request.method, "request received");
    let response = handle_request(&state, request).await;
    if !response.is_empty_notification_ack() {
        deliver(&state, &query.session_id, &sender, response).await;
    }
    (StatusCode::ACCEPTED, Json(json!({ "ok": true })))
}

async fn deliver(
    state: &AppState,
    session_id: &str,
    sender: &mpsc::Sender<JsonRpcResponse>,
    response: JsonRpcResponse,
) {
    if sender.send(response).await.is_err() {
        // Client went away; drop the session.
        warn!(session = session_id, "event stream closed, dropping session");
        let mut sessions = state.sessions.lock().expect("session map lock poisoned");
        sessions.remove(session_id);
    }
}

async fn handle_request(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    if request.jsonrpc != JSONRPC_VERSION {
        return JsonRpcResponse::error(
            request.id,
            JsonRpcError::new(
                ErrorCode::InvalidRequest,
                format!("invalid JSON-RPC version: {}", request.jsonrpc),
            ),
        );
    }

    match request.method.as_str() {
        methods::INITIALIZE => {
            let result = InitializeResult {
                protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: false,
                    }),
                },
                server_info: ServerInfo {
                    name: state.config.service_name.clone(),
                    version: state.config.service_version.clone(),
                },
            };
            JsonRpcResponse::success(
                request.id,
                serde_json::to_value(result).expect("initialize result serializes"),
            )
        }
        methods::INITIALIZED => JsonRpcResponse {
            // Notification: no response goes out.
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            result: None,
            error: None,
        },
        methods::PING => JsonRpcResponse::success(request.id, json!({})),
        methods::TOOLS_LIST => {
            let result = ToolsListResult {
                tools: state.tools.list_tools(),
            };
            JsonRpcResponse::success(
                request.id,
                serde_json::to_value(result).expect("tool list serializes"),
            )
        }
        methods::TOOLS_CALL => call_tool(state, request).await,
        other => JsonRpcResponse::error(
            request.id,
            JsonRpcError::new(ErrorCode::MethodNotFound, format!("unknown method: {other}")),
        ),
    }
}

async fn call_tool(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    let params: ToolCallParams = match request.params {
        Some(p) => match serde_json::from_value(p) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        ErrorCode::InvalidParams,
                        format!("invalid tool call params: {e}"),
                    ),
                )
            }
        },
        None => {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::InvalidParams, "missing tool call params"),
            )
        }
    };

    info!(tool = %params.name, "tool call");

    // Tools are synchronous and may touch the filesystem (uploads); keep
    // them off the async workers.
    let tools = state.tools.clone();
    let ctx = state.tool_ctx.clone();
    let name = params.name.clone();
    let outcome = tokio::task::spawn_blocking(move || tools.call_tool(&name, params.arguments, &ctx))
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(join_error) => {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    ErrorCode::InternalError,
                    format!("tool execution panicked: {join_error}"),
                ),
            )
        }
    };

    let tool_result = match result {
        Ok(value) => ToolCallResult {
            content: vec![ContentBlock::text(
                serde_json::to_string(&value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
            )],
            is_error: false,
        },
        Err(e) => ToolCallResult {
            content: vec![ContentBlock::text(format!("Error: {e}"))],
            is_error: true,
        },
    };

    JsonRpcResponse::success(
        request.id,
        serde_json::to_value(tool_result).expect("tool result serializes"),
    )
}
