//! HTTP front end for the sync protocol

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use lix_core::prelude::*;
use lix_core::sync::NewLixResponse;

type Handler = Arc<LspHandler<MemoryLspStorage>>;

/// A [`LixError`] rendered as an HTTP status with the message as body
struct ApiError(LixError);

impl From<LixError> for ApiError {
    fn from(error: LixError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LixError::LixNotFound(_) => StatusCode::NOT_FOUND,
            LixError::LixAlreadyExists(_) => StatusCode::CONFLICT,
            LixError::Storage(_) | LixError::InvalidTable(_) | LixError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

pub fn router(handler: Handler) -> Router {
    Router::new()
        .route("/lsp/new", post(new_lix))
        .route("/lsp/lix/:id/query", post(query))
        .with_state(handler)
}

async fn new_lix(
    State(handler): State<Handler>,
    body: Bytes,
) -> std::result::Result<Json<NewLixResponse>, ApiError> {
    Ok(Json(handler.new_lix(&body).await?))
}

async fn query(
    State(handler): State<Handler>,
    Path(id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> std::result::Result<Json<QueryResponse>, ApiError> {
    Ok(Json(handler.query(&id, request).await?))
}

/// Serve an in-memory lix server until ctrl-c
pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Lix server listening");

    let handler = Arc::new(LspHandler::new(MemoryLspStorage::new()));
    axum::serve(listener, router(handler))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
