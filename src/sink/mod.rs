//! # Byte Sink
//!
//! The ingestion core never touches storage directly. Everything it persists goes
//! through the [`Sink`] capability: "write these bytes under this name" and
//! "give me back a reader for that name".
//!
//! ## Backends:
//! - **memory**: [`MemorySink`], a map plus write-order log (tests, ephemeral runs)
//! - **filesystem**: [`FilesystemSink`], one file per name in a flat directory
//!
//! Both backends refuse to overwrite an existing name. Every name the service
//! generates is unique, so an overwrite attempt always means a bug upstream.

pub mod error;
pub mod filesystem;
pub mod memory;

pub use error::{SinkError, SinkResult};
pub use filesystem::FilesystemSink;
pub use memory::MemorySink;

use crate::config::{StorageBackend, StorageConfig};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// A readable handle on a stored object.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Persistence capability consumed by the chunk receiver, upload handler and relay.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Persist `bytes` under `name`. Fails if `name` is already taken.
    async fn write(&self, name: &str, bytes: Bytes) -> SinkResult<()>;

    /// Open a reader over the object stored under `name`.
    async fn read(&self, name: &str) -> SinkResult<ByteSource>;

    /// Short backend label for diagnostics.
    fn backend(&self) -> &'static str;
}

/// Build the sink selected by configuration.
pub async fn from_config(config: &StorageConfig) -> SinkResult<Arc<dyn Sink>> {
    match config.backend {
        StorageBackend::Filesystem => {
            let sink = FilesystemSink::new(&config.root).await?;
            Ok(Arc::new(sink))
        }
        StorageBackend::Memory => Ok(Arc::new(MemorySink::new())),
    }
}

/// Flat-name validation shared by the backends.
///
/// Names are generated by the service, so anything that looks like a path is
/// rejected outright instead of being resolved.
pub(crate) fn validate_name(name: &str) -> SinkResult<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0')
    {
        return Err(SinkError::InvalidName(name.to_string()));
    }
    Ok(())
}
