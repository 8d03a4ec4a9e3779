use axum::{routing::get, Json, Router};
use log::info;
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router() -> Router {
    Router::new().route("/api/health", get(health))
}

pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Health endpoint on http://{}/api/health", addr);
    }
    axum::serve(listener, router()).await
}
