//! Local filesystem sink.

use super::{validate_name, ByteSource, Sink, SinkError, SinkResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Sink that stores every object as one file in a flat directory.
#[derive(Debug)]
pub struct FilesystemSink {
    root: PathBuf,
}

impl FilesystemSink {
    /// Create the sink, creating `root` if it does not exist yet.
    pub async fn new(root: impl AsRef<Path>) -> SinkResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn object_path(&self, name: &str) -> SinkResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl Sink for FilesystemSink {
    #[instrument(skip(self, bytes), fields(backend = "filesystem", size = bytes.len()))]
    async fn write(&self, name: &str, bytes: Bytes) -> SinkResult<()> {
        let path = self.object_path(name)?;
        if fs::try_exists(&path).await? {
            return Err(SinkError::AlreadyExists(name.to_string()));
        }

        // Readers must never observe a half-written object. Publishing with a
        // hard link fails if the name appeared meanwhile; rename would replace it.
        let temp_path = self.root.join(format!(".{}.tmp.{}", name, Uuid::new_v4().simple()));
        let published = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::hard_link(&temp_path, &path).await
        }
        .await;

        if let Err(err) = fs::remove_file(&temp_path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %temp_path.display(), "Failed to remove temp file: {}", err);
            }
        }

        match published {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(SinkError::AlreadyExists(name.to_string()))
            }
            Err(err) => Err(SinkError::Io(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn read(&self, name: &str) -> SinkResult<ByteSource> {
        let path = self.object_path(name)?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SinkError::NotFound(name.to_string())
            } else {
                SinkError::Io(e)
            }
        })?;
        Ok(Box::new(file))
    }

    fn backend(&self) -> &'static str {
        "filesystem"
    }
}
