//! Chunked relay endpoints.
//!
//! Both endpoints answer with a streaming body cut into fixed-size windows.
//! The window size defaults to `relay.chunk_size` and can be overridden per
//! request with `?chunk_size=N`.

use super::{field_metadata, file_field};
use crate::error::AppResult;
use crate::ingest::stats::bump;
use crate::ingest::{check_chunk_size, open_relay, upload, IngestError};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::io::Cursor;
use tracing::info;

/// Media type used when the upload does not declare one.
pub const DEFAULT_RELAY_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    pub chunk_size: Option<i64>,
}

impl RelayQuery {
    /// Requested window size, validated, falling back to the configured default.
    fn chunk_size(&self, state: &AppState) -> Result<i64, IngestError> {
        let size = self
            .chunk_size
            .unwrap_or(state.get_config().relay.chunk_size as i64);
        check_chunk_size(size)?;
        Ok(size)
    }
}

/// Echo an uploaded file back as a chunked stream.
///
/// ## Endpoint: `POST /stream/audio`
///
/// The file (multipart field "file") is buffered completely, then relayed with
/// its declared content type, or `audio/wav` if none was given. Nothing is stored.
pub async fn relay_upload(
    state: web::Data<AppState>,
    query: web::Query<RelayQuery>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let chunk_size = query.chunk_size(&state)?;

    let field = file_field(&mut payload).await?;
    let (filename, content_type) = field_metadata(&field);
    let content = upload::read_to_end(field, state.get_config().upload.max_bytes).await?;

    info!(
        filename = ?filename,
        size = content.len(),
        chunk_size,
        "Relaying uploaded file"
    );

    let relay = open_relay(Box::new(Cursor::new(content)), chunk_size)?;
    bump(&state.stats.relays_opened, 1);

    Ok(HttpResponse::Ok()
        .content_type(content_type.unwrap_or_else(|| DEFAULT_RELAY_CONTENT_TYPE.to_string()))
        .streaming(relay.into_stream()))
}

/// Relay a stored payload from the sink.
///
/// ## Endpoint: `GET /stream/audio/{name}`
///
/// `name` is a storage name as returned by `/upload/audio`, or a chunk name
/// written by a streaming connection.
pub async fn relay_stored(
    state: web::Data<AppState>,
    name: web::Path<String>,
    query: web::Query<RelayQuery>,
) -> AppResult<HttpResponse> {
    let chunk_size = query.chunk_size(&state)?;
    let name = name.into_inner();

    let source = state
        .sink
        .read(&name)
        .await
        .map_err(IngestError::SinkRead)?;
    let relay = open_relay(source, chunk_size)?;
    bump(&state.stats.relays_opened, 1);

    info!(name = %name, chunk_size, "Relaying stored payload");

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .streaming(relay.into_stream()))
}

#[cfg(test)]
mod tests {
    use crate::handlers::configure_routes;
    use crate::handlers::test_support::{memory_state, multipart_body, multipart_content_type};
    use crate::sink::Sink;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};
    use bytes::Bytes;

    fn relay_request(uri: &str, body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn test_relay_echoes_upload() {
        let (state, sink) = memory_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
        let body = multipart_body("file", Some("take.wav"), None, &payload);
        let resp = test::call_service(&app, relay_request("/stream/audio", body).to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/wav");
        let echoed = test::read_body(resp).await;
        assert_eq!(echoed.as_ref(), &payload[..]);
        assert!(sink.is_empty().await);
    }

    #[actix_web::test]
    async fn test_relay_keeps_declared_content_type() {
        let (state, _) = memory_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let body = multipart_body("file", Some("take.ogg"), Some("audio/ogg"), b"OggS");
        let resp = test::call_service(
            &app,
            relay_request("/stream/audio?chunk_size=2", body).to_request(),
        )
        .await;

        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/ogg");
        assert_eq!(test::read_body(resp).await.as_ref(), b"OggS");
    }

    #[actix_web::test]
    async fn test_relay_rejects_bad_chunk_size() {
        let (state, _) = memory_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        for uri in ["/stream/audio?chunk_size=0", "/stream/audio?chunk_size=-1"] {
            let body = multipart_body("file", Some("take.wav"), None, b"data");
            let resp = test::call_service(&app, relay_request(uri, body).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            let json: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(json["error"]["type"], "invalid_configuration");
        }
    }

    #[actix_web::test]
    async fn test_relay_stored_payload() {
        let (state, sink) = memory_state();
        sink.write("take.raw", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/stream/audio/take.raw?chunk_size=3")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await.as_ref(), b"0123456789");
        assert_eq!(state.stats.snapshot().relays_opened, 1);
    }

    #[actix_web::test]
    async fn test_relay_missing_payload() {
        let (state, _) = memory_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/stream/audio/missing.raw")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["error"]["type"], "not_found");
    }
}
