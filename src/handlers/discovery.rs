use actix_web::HttpResponse;
use serde_json::json;

/// Static description of the public endpoints.
pub async fn describe_endpoints() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Audio Ingestion Server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "websocket": "/ws/audio",
            "upload": "/upload/audio",
            "stream": "/stream/audio",
            "stored_stream": "/stream/audio/{name}",
            "health": "/health"
        }
    }))
}
