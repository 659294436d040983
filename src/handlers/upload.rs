use super::{field_metadata, file_field};
use crate::{error::AppResult, state::AppState};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};

/// Store a complete audio file.
///
/// ## Endpoint: `POST /upload/audio`
///
/// ## Request:
/// Multipart form data with the file in a field named "file"
///
/// ## Response:
/// ```json
/// {
///   "filename": "audio_20250101_120000_123456_1a2b3c4d_take1.wav",
///   "size": 48044,
///   "content_type": "audio/wav"
/// }
/// ```
pub async fn upload_audio(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let field = file_field(&mut payload).await?;
    let (filename, content_type) = field_metadata(&field);

    let result = state
        .upload_handler()
        .handle_upload(field, content_type.as_deref(), filename.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(result))
}
