//! # Audio Ingestion Core
//!
//! Transport-independent ingestion logic. The WebSocket actor and the HTTP
//! handlers are thin adapters over the types in here.
//!
//! ## Components:
//! - **registry**: live connections and their identities
//! - **receiver**: per-connection chunk loop with best-effort acknowledgments
//! - **upload**: single bounded payloads stored as one unit
//! - **relay**: fixed-size windows over a byte source
//! - **stats**: process-wide ingestion counters

pub mod error;
pub mod receiver;
pub mod registry;
pub mod relay;
pub mod stats;
pub mod upload;

pub use error::IngestError;
pub use receiver::{AckStatus, Acknowledgment, Chunk, ChunkReceiver, StreamSummary};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use relay::{check_chunk_size, open_relay, RelayStream, MAX_RELAY_CHUNK_SIZE};
pub use stats::{IngestStats, IngestStatsSnapshot};
pub use upload::{UploadHandler, UploadResult};
