pub mod config;
pub mod connections;
pub mod discovery;
pub mod relay;
pub mod upload;

use crate::error::{AppError, AppResult};
use crate::{health, websocket};
use actix_multipart::{Field, Multipart};
use actix_web::web;
use futures_util::StreamExt;

/// Name of the multipart field that carries the audio file.
pub const FILE_FIELD: &str = "file";

/// Every route the service exposes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(discovery::describe_endpoints))
        .route("/ws/audio", web::get().to(websocket::audio_stream))
        .route("/upload/audio", web::post().to(upload::upload_audio))
        .route("/stream/audio", web::post().to(relay::relay_upload))
        .route("/stream/audio/{name}", web::get().to(relay::relay_stored))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/connections", web::get().to(connections::list_connections))
                .route("/config", web::get().to(config::get_config))
                .route("/config", web::put().to(config::update_config)),
        )
        // Also provide health check at root level for convenience
        .route("/health", web::get().to(health::health_check));
}

/// Advance `payload` to the file field, draining any fields before it.
pub(crate) async fn file_field(payload: &mut Multipart) -> AppResult<Field> {
    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .is_some_and(|name| name == FILE_FIELD);
        if is_file {
            return Ok(field);
        }

        while let Some(chunk) = field.next().await {
            chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
        }
    }

    Err(AppError::BadRequest(format!(
        "Missing multipart field '{}'",
        FILE_FIELD
    )))
}

/// Declared file name and content type of a multipart field.
pub(crate) fn field_metadata(field: &Field) -> (Option<String>, Option<String>) {
    let filename = field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .map(str::to_string);
    let content_type = field.content_type().map(|mime| mime.to_string());
    (filename, content_type)
}
