//! HTTP surface: `POST /generate`, `POST /stream`, `GET /health`.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::StreamExt;
use http::{StatusCode, header};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::model::AggregatedResponse;
use crate::orchestrator::Orchestrator;
use crate::sse::encode_stream;
use crate::validation::{INVALID_GENERATION, UNREADABLE_BODY, parse_body};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Cancelled on shutdown; every open stream listens on a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Generate,
    Stream,
}

/// A route failure rendered as `{error, details?}`.
#[derive(Debug)]
pub struct ApiError {
    route: Route,
    err: CoreError,
}

impl ApiError {
    fn generate(err: CoreError) -> Self {
        Self {
            route: Route::Generate,
            err,
        }
    }

    fn stream(err: CoreError) -> Self {
        Self {
            route: Route::Stream,
            err,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.err {
            CoreError::Validation { message, details } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "details": details }),
            ),
            CoreError::QuotaExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Token limit exceeded" }),
            ),
            other => {
                warn!(error = %other, kind = other.kind(), "request failed");
                let message = match self.route {
                    Route::Generate => "Generation failed",
                    Route::Stream => "Failed to process request",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(handle_generate))
        .route("/stream", post(handle_stream))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then cancel open streams and drain.
pub async fn run<F>(listener: TcpListener, state: AppState, shutdown: F) -> CoreResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = state.shutdown.clone();
    let app = create_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutting down");
            token.cancel();
        })
        .await?;
    Ok(())
}

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "provider": state.orchestrator.provider_name() }))
}

async fn handle_generate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AggregatedResponse>, ApiError> {
    let value = parse_body(&body, INVALID_GENERATION).map_err(ApiError::generate)?;
    let resp = state
        .orchestrator
        .generate(&value)
        .await
        .map_err(ApiError::generate)?;
    Ok(Json(resp))
}

async fn handle_stream(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let value = parse_body(&body, UNREADABLE_BODY).map_err(ApiError::stream)?;
    let cancel = state.shutdown.child_token();
    let chunks = match state.orchestrator.stream(&value, cancel.clone()).await {
        Ok(chunks) => chunks,
        Err(e @ CoreError::Validation { .. }) => return Err(ApiError::stream(e)),
        // The upstream refused before streaming: report it in-band like any
        // later failure.
        Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
    };

    let sse = Sse::new(encode_stream(chunks, cancel)).keep_alive(KeepAlive::default());
    Ok(([(header::CONNECTION, "keep-alive")], sse).into_response())
}
