//! # Bounded Upload Handler
//!
//! Accepts one complete payload, buffers it in memory and hands it to the sink
//! as a single write. A payload that does not arrive in full is never written.
//!
//! ## Storage Names:
//! `audio_<utc timestamp>_<8 hex chars>_<sanitized declared name>`
//!
//! The random fragment makes two uploads with the same declared name, in the
//! same microsecond, land under different names.

use super::error::IngestError;
use super::stats::{bump, IngestStats};
use crate::sink::Sink;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";
const FALLBACK_NAME: &str = "upload.bin";
const MAX_NAME_LEN: usize = 128;

/// Result of a stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    #[serde(rename = "filename")]
    pub storage_name: String,
    pub size: usize,
    pub content_type: String,
}

#[derive(Clone)]
pub struct UploadHandler {
    sink: Arc<dyn Sink>,
    stats: Arc<IngestStats>,
    max_bytes: Option<usize>,
}

impl UploadHandler {
    pub fn new(sink: Arc<dyn Sink>, stats: Arc<IngestStats>, max_bytes: Option<usize>) -> Self {
        Self {
            sink,
            stats,
            max_bytes,
        }
    }

    /// Buffer `content`, store it, and describe what was stored.
    pub async fn handle_upload<S, E>(
        &self,
        content: S,
        content_type: Option<&str>,
        declared_name: Option<&str>,
    ) -> Result<UploadResult, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let result = self.store(content, content_type, declared_name).await;
        match &result {
            Ok(stored) => {
                bump(&self.stats.uploads_stored, 1);
                bump(&self.stats.upload_bytes, stored.size as u64);
                info!(
                    filename = %stored.storage_name,
                    size = stored.size,
                    content_type = %stored.content_type,
                    "Upload stored"
                );
            }
            Err(err) => {
                bump(&self.stats.uploads_failed, 1);
                warn!(declared_name = ?declared_name, error = %err, "Upload failed");
            }
        }
        result
    }

    async fn store<S, E>(
        &self,
        content: S,
        content_type: Option<&str>,
        declared_name: Option<&str>,
    ) -> Result<UploadResult, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let payload = read_to_end(content, self.max_bytes).await?;
        let storage_name = storage_name(declared_name.unwrap_or_default());
        let size = payload.len();

        self.sink
            .write(&storage_name, payload)
            .await
            .map_err(IngestError::SinkWrite)?;

        Ok(UploadResult {
            storage_name,
            size,
            content_type: content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or(DEFAULT_UPLOAD_CONTENT_TYPE)
                .to_string(),
        })
    }
}

/// Collect a body stream into one buffer.
///
/// A stream error means the body was cut off; `max_bytes` is checked as data
/// arrives so an oversized body is rejected without buffering all of it.
pub async fn read_to_end<S, E>(mut content: S, max_bytes: Option<usize>) -> Result<Bytes, IngestError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut buffer = BytesMut::new();
    while let Some(piece) = content.next().await {
        let piece = piece.map_err(|e| IngestError::IncompleteUpload(e.to_string()))?;
        if let Some(limit) = max_bytes {
            if buffer.len() + piece.len() > limit {
                return Err(IngestError::UploadTooLarge { limit });
            }
        }
        buffer.extend_from_slice(&piece);
    }
    Ok(buffer.freeze())
}

/// Reduce a client-supplied file name to something safe to use as a flat name.
pub fn sanitize_name(declared: &str) -> String {
    let last_segment = declared.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut clean = String::with_capacity(last_segment.len().min(MAX_NAME_LEN));
    for c in last_segment.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        // Runs of dots collapse so the result never contains "..".
        if c == '.' && (clean.is_empty() || clean.ends_with('.')) {
            continue;
        }
        clean.push(c);
        if clean.len() == MAX_NAME_LEN {
            break;
        }
    }

    if clean.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        clean
    }
}

/// Unique sink name for an upload declared as `declared`.
pub fn storage_name(declared: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "audio_{}_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S_%6f"),
        &id[..8],
        sanitize_name(declared)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ByteSource, MemorySink, SinkError, SinkResult};
    use async_trait::async_trait;
    use futures_util::stream;
    use std::io;

    fn handler(sink: Arc<MemorySink>, max_bytes: Option<usize>) -> UploadHandler {
        UploadHandler::new(sink, Arc::new(IngestStats::new()), max_bytes)
    }

    fn body(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn write(&self, _name: &str, _bytes: Bytes) -> SinkResult<()> {
            Err(SinkError::Io(io::Error::new(io::ErrorKind::Other, "disk full")))
        }

        async fn read(&self, name: &str) -> SinkResult<ByteSource> {
            Err(SinkError::NotFound(name.to_string()))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_upload_is_stored_whole() {
        let sink = Arc::new(MemorySink::new());
        let result = handler(sink.clone(), None)
            .handle_upload(body(&[b"RIFF", b"....", b"WAVE"]), Some("audio/wav"), Some("take1.wav"))
            .await
            .unwrap();

        assert_eq!(result.size, 12);
        assert_eq!(result.content_type, "audio/wav");
        assert!(result.storage_name.starts_with("audio_"));
        assert!(result.storage_name.ends_with("_take1.wav"));
        assert_eq!(sink.len().await, 1);
        assert_eq!(
            sink.get(&result.storage_name).await.unwrap(),
            Bytes::from_static(b"RIFF....WAVE")
        );
    }

    #[tokio::test]
    async fn test_zero_byte_upload() {
        let sink = Arc::new(MemorySink::new());
        let result = handler(sink.clone(), None)
            .handle_upload(body(&[]), None, Some("silence.wav"))
            .await
            .unwrap();

        assert_eq!(result.size, 0);
        assert_eq!(result.content_type, DEFAULT_UPLOAD_CONTENT_TYPE);
        assert_eq!(sink.get(&result.storage_name).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_same_declared_name_gets_distinct_storage() {
        let sink = Arc::new(MemorySink::new());
        let uploads = handler(sink.clone(), None);

        let first = uploads
            .handle_upload(body(&[b"first"]), None, Some("take.wav"))
            .await
            .unwrap();
        let second = uploads
            .handle_upload(body(&[b"second"]), None, Some("take.wav"))
            .await
            .unwrap();

        assert_ne!(first.storage_name, second.storage_name);
        assert_eq!(sink.get(&first.storage_name).await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(sink.get(&second.storage_name).await.unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_truncated_body_writes_nothing() {
        let sink = Arc::new(MemorySink::new());
        let stats = Arc::new(IngestStats::new());
        let uploads = UploadHandler::new(sink.clone(), stats.clone(), None);

        let parts: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "body cut off")),
        ];
        let err = uploads
            .handle_upload(stream::iter(parts), None, Some("take.wav"))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::IncompleteUpload(_)));
        assert!(sink.is_empty().await);
        assert_eq!(stats.snapshot().uploads_failed, 1);
    }

    #[tokio::test]
    async fn test_size_cap() {
        let sink = Arc::new(MemorySink::new());
        let uploads = handler(sink.clone(), Some(8));

        let err = uploads
            .handle_upload(body(&[b"12345", b"67890"]), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UploadTooLarge { limit: 8 }));
        assert!(sink.is_empty().await);

        let ok = uploads
            .handle_upload(body(&[b"1234", b"5678"]), None, None)
            .await
            .unwrap();
        assert_eq!(ok.size, 8);
    }

    #[tokio::test]
    async fn test_sink_failure() {
        let uploads = UploadHandler::new(Arc::new(FailingSink), Arc::new(IngestStats::new()), None);
        let err = uploads
            .handle_upload(body(&[b"data"]), None, Some("take.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SinkWrite(SinkError::Io(_))));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("take1.wav"), "take1.wav");
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("C:\\Users\\me\\voice memo.m4a"), "voice_memo.m4a");
        assert_eq!(sanitize_name(".hidden"), "hidden");
        assert_eq!(sanitize_name("a..b.wav"), "a.b.wav");
        assert_eq!(sanitize_name(""), "upload.bin");
        assert_eq!(sanitize_name("dir/"), "upload.bin");
        assert_eq!(sanitize_name("..."), "upload.bin");
        assert_eq!(sanitize_name(&"x".repeat(300)).len(), 128);
    }

    #[test]
    fn test_storage_names_are_valid_sink_names() {
        for declared in ["take.wav", "../x", "", "a b c", "..."] {
            let name = storage_name(declared);
            assert!(crate::sink::validate_name(&name).is_ok(), "{name}");
        }
    }
}
