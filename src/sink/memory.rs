//! In-memory sink.

use super::{validate_name, ByteSource, Sink, SinkError, SinkResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryInner {
    objects: HashMap<String, Bytes>,
    /// Names in the order their writes completed.
    order: Vec<String>,
}

/// Sink backed by a map in process memory.
///
/// Keeps the order writes arrived in, which is what the ordering tests assert on.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: RwLock<MemoryInner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored names, oldest write first.
    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Contents stored under `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Bytes> {
        self.inner.read().await.objects.get(name).cloned()
    }

    /// Stored objects, oldest write first.
    pub async fn entries(&self) -> Vec<(String, Bytes)> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|name| inner.objects.get(name).map(|b| (name.clone(), b.clone())))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, name: &str, bytes: Bytes) -> SinkResult<()> {
        validate_name(name)?;
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(name) {
            return Err(SinkError::AlreadyExists(name.to_string()));
        }
        inner.objects.insert(name.to_string(), bytes);
        inner.order.push(name.to_string());
        Ok(())
    }

    async fn read(&self, name: &str) -> SinkResult<ByteSource> {
        let bytes = self
            .get(name)
            .await
            .ok_or_else(|| SinkError::NotFound(name.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
