//! HTTP status API over [`QueryService`].

use std::net::SocketAddr;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use inbound_id::ExecutableId;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::HttpServerConfig;
use crate::error::RuntimeError;
use crate::query::{ExecutableQuery, QueryService};

pub fn router(query: QueryService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/inbound", get(list))
        .route("/inbound/{id}", get(get_one))
        .with_state(query)
}

pub fn spawn_http_server(
    config: HttpServerConfig,
    query: QueryService,
    shutdown_tx: broadcast::Sender<()>,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        return None;
    }
    let app = router(query);
    Some(tokio::spawn(async move {
        let addr = config.bind;
        if let Err(err) = serve(addr, app, shutdown_tx).await {
            tracing::error!("http server error: {err}");
        }
    }))
}

async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), RuntimeError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RuntimeError::Http(format!("bind {addr}: {e}")))?;
    tracing::info!("inbound status API listening on http://{}", addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| RuntimeError::Http(format!("serve {addr}: {e}")))
}

#[derive(Debug)]
enum ApiError {
    Invalid(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Invalid(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
        };
        let body = serde_json::json!({ "code": code, "message": message });
        (status, Json(body)).into_response()
    }
}

async fn health(State(query): State<QueryService>) -> impl IntoResponse {
    let health = query.aggregate_health();
    let status = if health.is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn list(
    State(query): State<QueryService>,
    Query(filter): Query<ExecutableQuery>,
) -> impl IntoResponse {
    Json(query.query(&filter))
}

async fn get_one(
    State(query): State<QueryService>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: ExecutableId = id
        .parse()
        .map_err(|e| ApiError::Invalid(format!("invalid executable id: {e}")))?;
    query
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("executable {id} not found")))
}
