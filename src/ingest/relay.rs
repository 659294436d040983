//! # Chunked Relay
//!
//! Re-exposes a byte source as a sequence of fixed-size windows. Every window
//! except the last is exactly `chunk_size` bytes, whatever segmentation the
//! source happens to deliver.
//!
//! ## Rust Concepts:
//! - **Pull-based**: nothing is read until [`RelayStream::next`] is awaited
//! - **`try_unfold`**: turns the pull loop into a `Stream` for response bodies
//! - **Single pass**: a relay owns its source; once drained it stays drained

use super::error::IngestError;
use crate::sink::{ByteSource, SinkError};
use bytes::Bytes;
use futures_util::{stream, Stream};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Largest window a relay will allocate.
pub const MAX_RELAY_CHUNK_SIZE: usize = 16 * 1024 * 1024;

pub struct RelayStream {
    source: ByteSource,
    chunk_size: usize,
    finished: bool,
    windows: u64,
    bytes: u64,
}

/// Validate a requested window size.
pub fn check_chunk_size(chunk_size: i64) -> Result<usize, IngestError> {
    if chunk_size <= 0 {
        return Err(IngestError::InvalidConfiguration(format!(
            "chunk_size must be positive, got {chunk_size}"
        )));
    }
    usize::try_from(chunk_size)
        .ok()
        .filter(|size| *size <= MAX_RELAY_CHUNK_SIZE)
        .ok_or_else(|| {
            IngestError::InvalidConfiguration(format!(
                "chunk_size must be at most {MAX_RELAY_CHUNK_SIZE}, got {chunk_size}"
            ))
        })
}

/// Open a relay over `source` with `chunk_size`-byte windows.
///
/// The size is validated here, before any byte is read.
pub fn open_relay(source: ByteSource, chunk_size: i64) -> Result<RelayStream, IngestError> {
    let chunk_size = check_chunk_size(chunk_size)?;

    debug!(chunk_size, "Relay opened");
    Ok(RelayStream {
        source,
        chunk_size,
        finished: false,
        windows: 0,
        bytes: 0,
    })
}

impl RelayStream {
    /// Next window, or `None` at end of stream.
    ///
    /// Once `None` (or an error) has been returned, every later call returns
    /// `None` without touching the source again.
    pub async fn next(&mut self) -> Result<Option<Bytes>, IngestError> {
        if self.finished {
            return Ok(None);
        }

        let mut window = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.source.read(&mut window[filled..]).await {
                Ok(0) => {
                    self.finished = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(err) => {
                    self.finished = true;
                    return Err(IngestError::SinkRead(SinkError::Io(err)));
                }
            }
        }

        if filled == 0 {
            debug!(windows = self.windows, bytes = self.bytes, "Relay drained");
            return Ok(None);
        }

        window.truncate(filled);
        self.windows += 1;
        self.bytes += filled as u64;
        Ok(Some(Bytes::from(window)))
    }

    /// Adapt into a `Stream`, e.g. for `HttpResponse::streaming`.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, IngestError>> {
        stream::try_unfold(self, |mut relay| async move {
            Ok(relay.next().await?.map(|window| (window, relay)))
        })
    }
}
