//! # Chunk Receiver
//!
//! Per-connection receive loop: every binary frame that arrives on a streaming
//! connection is written to the sink and answered with an acknowledgment.
//!
//! ## Per-connection State Machine:
//! `OPEN → (receiving chunks)* → CLOSED`
//!
//! ## Loop Rules:
//! - **Chunk**: written to the sink under `stream_<connection>_<seq>.raw`, then acked
//! - **Empty frame / end of stream**: normal close
//! - **Transport error**: abnormal close, logged as a warning
//! - **Sink failure**: abnormal close; nothing is retried
//!
//! Acknowledgments go out through a bounded channel with a short timeout. A
//! slow consumer loses acks, never chunks, and never stalls the loop for longer
//! than the timeout.

use super::error::IngestError;
use super::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use super::stats::{bump, IngestStats};
use crate::sink::Sink;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, info, warn};

/// One binary message received on a streaming connection.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub connection: ConnectionId,
    /// Position of this chunk on its connection, starting at 0.
    pub seq: u64,
    pub bytes: Bytes,
    pub received_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(connection: ConnectionId, seq: u64, bytes: Bytes) -> Self {
        Self {
            connection,
            seq,
            bytes,
            received_at: Utc::now(),
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Sink name for this chunk. Zero-padded so names sort in arrival order.
    pub fn storage_name(&self) -> String {
        format!("stream_{}_{:08}.raw", self.connection, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Received,
}

/// Acknowledgment sent back after a chunk has been handed to the sink.
///
/// Serializes as `{"status": "received", "bytes": 4096, "timestamp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub status: AckStatus,
    pub bytes: usize,
    pub timestamp: String,
}

impl Acknowledgment {
    pub fn received(bytes: usize, at: DateTime<Utc>) -> Self {
        Self {
            status: AckStatus::Received,
            bytes,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// What one connection did over its lifetime.
#[derive(Debug)]
pub struct StreamSummary {
    pub connection: ConnectionId,
    pub chunks: u64,
    pub bytes: u64,
    pub acks_delivered: u64,
    pub acks_dropped: u64,
    /// Why the loop ended. [`IngestError::ConnectionClosed`] for a clean close.
    pub end: IngestError,
}

impl StreamSummary {
    fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            chunks: 0,
            bytes: 0,
            acks_delivered: 0,
            acks_dropped: 0,
            end: IngestError::ConnectionClosed,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        !self.end.is_normal_close()
    }
}

/// Receives chunks for streaming connections and forwards them to the sink.
///
/// Cheap to clone; every connection's loop gets its own copy.
#[derive(Clone)]
pub struct ChunkReceiver {
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn Sink>,
    stats: Arc<IngestStats>,
    ack_timeout: Duration,
}

impl ChunkReceiver {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sink: Arc<dyn Sink>,
        stats: Arc<IngestStats>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sink,
            stats,
            ack_timeout,
        }
    }

    /// Register a new connection.
    pub fn open(&self) -> ConnectionHandle {
        let handle = self.registry.register();
        bump(&self.stats.connections_total, 1);
        info!(
            connection = %handle.id(),
            total_connections = self.registry.count(),
            "Client connected"
        );
        handle
    }

    /// Persist one chunk and build its acknowledgment.
    pub async fn accept(&self, chunk: &Chunk) -> Result<Acknowledgment, IngestError> {
        self.sink
            .write(&chunk.storage_name(), chunk.bytes.clone())
            .await
            .map_err(IngestError::SinkWrite)?;

        bump(&self.stats.chunks_received, 1);
        bump(&self.stats.bytes_received, chunk.len() as u64);
        debug!(
            connection = %chunk.connection,
            seq = chunk.seq,
            bytes = chunk.len(),
            received_at = %chunk.received_at,
            "Chunk stored"
        );

        Ok(Acknowledgment::received(chunk.len(), Utc::now()))
    }

    /// Serve one connection until its frame stream ends.
    ///
    /// `frames` yields each inbound binary message in arrival order; an `Err`
    /// item means the transport failed. The connection is unregistered before
    /// this returns, whatever the outcome.
    pub async fn run<S>(
        &self,
        handle: ConnectionHandle,
        mut frames: S,
        acks: mpsc::Sender<Acknowledgment>,
    ) -> StreamSummary
    where
        S: Stream<Item = Result<Bytes, IngestError>> + Unpin,
    {
        let mut summary = StreamSummary::new(handle.id());

        summary.end = loop {
            let bytes = match frames.next().await {
                None => break IngestError::ConnectionClosed,
                Some(Ok(bytes)) if bytes.is_empty() => break IngestError::ConnectionClosed,
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => break err,
            };

            let chunk = Chunk::new(handle.id(), summary.chunks, bytes);
            let ack = match self.accept(&chunk).await {
                Ok(ack) => ack,
                Err(err) => break err,
            };
            summary.chunks += 1;
            summary.bytes += chunk.len() as u64;

            if self.deliver(&acks, ack, &chunk).await {
                summary.acks_delivered += 1;
            } else {
                summary.acks_dropped += 1;
            }
        };

        self.close(&handle, &summary);
        summary
    }

    /// Best-effort acknowledgment delivery. Returns whether the ack went out.
    async fn deliver(
        &self,
        acks: &mpsc::Sender<Acknowledgment>,
        ack: Acknowledgment,
        chunk: &Chunk,
    ) -> bool {
        match acks.send_timeout(ack, self.ack_timeout).await {
            Ok(()) => {
                bump(&self.stats.acks_delivered, 1);
                true
            }
            Err(SendTimeoutError::Timeout(_)) => {
                bump(&self.stats.acks_dropped, 1);
                debug!(
                    connection = %chunk.connection,
                    seq = chunk.seq,
                    timeout_ms = self.ack_timeout.as_millis() as u64,
                    "Acknowledgment timed out, dropped"
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                bump(&self.stats.acks_dropped, 1);
                debug!(connection = %chunk.connection, seq = chunk.seq, "Acknowledgment channel closed");
                false
            }
        }
    }

    fn close(&self, handle: &ConnectionHandle, summary: &StreamSummary) {
        self.registry.unregister(handle);

        if summary.is_abnormal() {
            bump(&self.stats.abnormal_disconnects, 1);
            warn!(
                connection = %summary.connection,
                chunks = summary.chunks,
                bytes = summary.bytes,
                acks_dropped = summary.acks_dropped,
                reason = %summary.end,
                total_connections = self.registry.count(),
                "Client disconnected abnormally"
            );
        } else {
            info!(
                connection = %summary.connection,
                chunks = summary.chunks,
                bytes = summary.bytes,
                acks_dropped = summary.acks_dropped,
                total_connections = self.registry.count(),
                "Client disconnected"
            );
        }
    }
}
