use crate::AppState;
use crate::agent::{AgentRequest, AgentResponse};
use crate::control_handler::handle_control_socket;
use axum::{
    Json, Router,
    body::to_bytes,
    extract::{Request, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use fincache_proto::{ControlMessage, ControlReply};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Path of the control channel; everything else is intercepted
pub const CONTROL_PATH: &str = "/__fincache/control";

// Request bodies are buffered so they can be replayed to the upstream
const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(
            CONTROL_PATH,
            get(handle_control_websocket).post(handle_control_post),
        )
        .fallback(handle_intercept)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_control_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("📡 WebSocket upgrade request for {}", CONTROL_PATH);
    ws.on_upgrade(move |socket| handle_control_socket(socket, state))
}

async fn handle_control_post(
    State(state): State<AppState>,
    Json(message): Json<ControlMessage>,
) -> impl IntoResponse {
    debug!("Control POST: {:?}", message);
    let reply = state.control.handle(message).await;
    let status = match reply {
        ControlReply::Error { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::OK,
    };
    (status, Json(reply))
}

async fn handle_intercept(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => {
            error!("❌ Failed to read request body for {}: {}", parts.uri, e);
            return (StatusCode::BAD_REQUEST, format!("Failed to read request body: {}", e))
                .into_response();
        }
    };
    let request = match AgentRequest::new(parts.method, parts.uri, parts.headers, body) {
        Ok(request) => request,
        Err(e) => {
            error!("❌ Rejected request: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match state.engine.handle(&request).await {
        Ok(served) => served.response.into_response(),
        Err(e) => {
            error!("❌ {} {} failed: {}", request.method, request.target(), e);
            bad_gateway(&e.to_string()).into_response()
        }
    }
}

fn bad_gateway(reason: &str) -> AgentResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    AgentResponse::new(
        StatusCode::BAD_GATEWAY,
        headers,
        format!("Upstream unavailable: {}", reason),
    )
}
