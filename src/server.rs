use std::net::SocketAddr;

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    Router,
};
use tracing::info;

pub const LIVENESS_BODY: &str = "Contract event watcher is running\n";

/// Every method and path answers the same: there is no routing, only a liveness probe.
pub fn liveness_router() -> Router {
    Router::new().fallback(liveness)
}

async fn liveness() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        LIVENESS_BODY,
    )
}

pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server is listening on port {}", listener.local_addr()?.port());
    axum::serve(listener, liveness_router()).await
}
