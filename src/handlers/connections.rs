use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Live streaming connections, oldest first.
pub async fn list_connections(state: web::Data<AppState>) -> HttpResponse {
    let connections = state.registry.snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": connections.len(),
        "connections": connections
    }))
}
