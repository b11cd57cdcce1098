//! HTTP routes: streaming generation, stop, and memory reset

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use parley_engine::{Account, ChatEngine, Error, GenerateCmd, Message, WireFrame};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Header carrying the authenticated account uid
pub const ACCOUNT_HEADER: &str = "x-account-uid";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/{conversation_uid}/stop", post(stop))
        .route("/chat/{conversation_uid}/message/clear", post(clear_memory))
        .with_state(state)
}

/// Engine errors as JSON responses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::ModelNotConfigured(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// The caller, taken from the account header
pub struct Caller(pub Account);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .map(|uid| Caller(Account::new(uid)))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": format!("missing {ACCOUNT_HEADER} header") })),
                )
                    .into_response()
            })
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Default, Deserialize)]
struct ChatParams {
    workspace_uid: Option<String>,
}

fn sse_event(frame: WireFrame) -> Event {
    let event = Event::default().event(frame.event());
    match frame.data() {
        Some(data) => event.data(data),
        None => event,
    }
}

async fn chat(
    State(state): State<AppState>,
    Caller(account): Caller,
    Query(params): Query<ChatParams>,
    Json(cmd): Json<GenerateCmd>,
) -> Result<Response, ApiError> {
    let generation = state
        .engine
        .generate(&account, params.workspace_uid.as_deref(), cmd)
        .await?;

    let frames = generation
        .into_frames()
        .map(|frame| Ok::<_, Infallible>(sse_event(frame)));

    let mut response = Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

#[derive(Serialize)]
struct StopResponse {
    stopped: bool,
}

async fn stop(
    State(state): State<AppState>,
    Caller(account): Caller,
    Path(conversation_uid): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let stopped = state
        .engine
        .stop_generate(&account, &conversation_uid)
        .await?;
    Ok(Json(StopResponse { stopped }))
}

async fn clear_memory(
    State(state): State<AppState>,
    Caller(account): Caller,
    Path(conversation_uid): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .engine
        .clear_memory(&account, &conversation_uid)
        .await?;
    Ok(Json(messages))
}
