//! # WebSocket Audio Streaming Handler
//!
//! Clients connect to `/ws/audio` and send audio as binary messages. Every
//! message is one chunk: it is stored, then acknowledged with a JSON text frame.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the client upgrades; the connection is registered
//! 2. **Audio Streaming**: binary messages, any size up to `stream.max_frame_bytes`
//! 3. **Acknowledgments**: `{"status":"received","bytes":4096,"timestamp":"..."}` per chunk
//! 4. **End**: a close frame or an empty binary message ends the stream
//!
//! Text messages are not audio; they get an error notice and are otherwise ignored.
//!
//! ## Rust Concepts:
//! - **Actor + task split**: the actor owns the socket, a tokio task runs the
//!   receive loop; they talk over two bounded channels
//! - **Back-pressure**: when the frame queue is full the actor waits on the send
//!   with `ctx.wait`, which stops it reading from the socket
//! - **Two stream handlers**: one for socket messages, one for outgoing acks

use crate::config::StreamConfig;
use crate::ingest::{Acknowledgment, ChunkReceiver, ConnectionHandle, IngestError};
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Server → client messages other than acknowledgments.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNotice {
    Error { code: String, message: String },
}

impl ServerNotice {
    fn text_not_supported() -> Self {
        ServerNotice::Error {
            code: "unsupported_message".to_string(),
            message: "Text messages are not accepted; send audio as binary messages".to_string(),
        }
    }
}

type FrameSender = mpsc::Sender<Result<Bytes, IngestError>>;

/// How the receive loop ended, reported back to the actor.
#[derive(Debug)]
struct StreamEnd {
    abnormal: bool,
    reason: String,
}

#[derive(Debug, PartialEq)]
enum Fragment {
    /// Nothing to do yet.
    Pending,
    Complete(Bytes),
    /// Start of a text message, or a continuation without a start.
    Unsupported,
    TooLarge,
}

/// Reassembles fragmented binary messages.
#[derive(Debug)]
struct Fragments {
    partial: Option<BytesMut>,
    in_text: bool,
    limit: usize,
}

impl Fragments {
    fn new(limit: usize) -> Self {
        Self {
            partial: None,
            in_text: false,
            limit,
        }
    }

    fn push(&mut self, item: Item) -> Fragment {
        match item {
            Item::FirstBinary(bytes) => {
                self.in_text = false;
                self.partial = Some(BytesMut::from(&bytes[..]));
                self.check_limit()
            }
            Item::FirstText(_) => {
                self.partial = None;
                self.in_text = true;
                Fragment::Unsupported
            }
            // The rest of a text message was already answered at its start.
            Item::Continue(_) if self.in_text => Fragment::Pending,
            Item::Last(_) if self.in_text => {
                self.in_text = false;
                Fragment::Pending
            }
            Item::Continue(bytes) => match self.partial.as_mut() {
                Some(partial) => {
                    partial.extend_from_slice(&bytes);
                    self.check_limit()
                }
                None => Fragment::Unsupported,
            },
            Item::Last(bytes) => match self.partial.take() {
                Some(mut partial) => {
                    partial.extend_from_slice(&bytes);
                    if partial.len() > self.limit {
                        Fragment::TooLarge
                    } else {
                        Fragment::Complete(partial.freeze())
                    }
                }
                None => Fragment::Unsupported,
            },
        }
    }

    fn check_limit(&mut self) -> Fragment {
        match &self.partial {
            Some(partial) if partial.len() > self.limit => {
                self.partial = None;
                Fragment::TooLarge
            }
            _ => Fragment::Pending,
        }
    }
}

/// One streaming connection.
pub struct AudioStreamSocket {
    receiver: ChunkReceiver,
    handle: Option<ConnectionHandle>,
    frames: Option<FrameSender>,
    ended: Option<oneshot::Receiver<StreamEnd>>,
    fragments: Fragments,
    ping_interval: Duration,
    frame_queue_capacity: usize,
    ack_queue_capacity: usize,
}

impl AudioStreamSocket {
    pub fn new(receiver: ChunkReceiver, config: &StreamConfig) -> Self {
        Self {
            receiver,
            handle: None,
            frames: None,
            ended: None,
            fragments: Fragments::new(config.max_frame_bytes),
            ping_interval: config.ping_interval(),
            frame_queue_capacity: config.frame_queue_capacity,
            ack_queue_capacity: config.ack_queue_capacity,
        }
    }

    /// Queue one inbound item for the receive loop.
    ///
    /// If the queue is full the actor stops processing socket input until the
    /// loop has caught up.
    fn forward(&mut self, item: Result<Bytes, IngestError>, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(frames) = self.frames.as_ref() else {
            return;
        };

        match frames.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                let frames = frames.clone();
                ctx.wait(
                    async move {
                        // Closed here means the loop already ended; the ack
                        // stream finishing will close the socket.
                        let _ = frames.send(item).await;
                    }
                    .into_actor(self),
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Receive loop already finished, dropping frame");
            }
        }
    }

    fn send_notice(&self, notice: &ServerNotice, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(notice) {
            Ok(json) => ctx.text(json),
            Err(err) => warn!("Failed to serialize notice: {}", err),
        }
    }

    fn connection_label(&self) -> String {
        self.handle
            .as_ref()
            .map(|h| h.id().to_string())
            .unwrap_or_default()
    }
}

impl Actor for AudioStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let handle = self.receiver.open();
        let (frame_tx, frame_rx) = mpsc::channel(self.frame_queue_capacity);
        let (ack_tx, ack_rx) = mpsc::channel::<Acknowledgment>(self.ack_queue_capacity);
        let (end_tx, end_rx) = oneshot::channel();

        ctx.add_stream(ReceiverStream::new(ack_rx));

        let receiver = self.receiver.clone();
        let loop_handle = handle.clone();
        tokio::spawn(async move {
            let summary = receiver
                .run(loop_handle, ReceiverStream::new(frame_rx), ack_tx.clone())
                .await;
            let _ = end_tx.send(StreamEnd {
                abnormal: summary.is_abnormal(),
                reason: summary.end.to_string(),
            });
            // The ack stream ends once this last sender is gone, after every
            // queued ack and the end report.
            drop(ack_tx);
        });

        // Keep-alive only. A silent client is never disconnected.
        ctx.run_interval(self.ping_interval, |_act, ctx| {
            ctx.ping(b"");
        });

        self.handle = Some(handle);
        self.frames = Some(frame_tx);
        self.ended = Some(end_rx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Dropping the sender ends the receive loop, which unregisters the connection.
        self.frames = None;
        debug!(connection = %self.connection_label(), "WebSocket actor stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.forward(Ok(data), ctx);
            }
            Ok(ws::Message::Continuation(item)) => match self.fragments.push(item) {
                Fragment::Complete(data) => self.forward(Ok(data), ctx),
                Fragment::Pending => {}
                Fragment::Unsupported => self.send_notice(&ServerNotice::text_not_supported(), ctx),
                Fragment::TooLarge => {
                    self.forward(
                        Err(IngestError::AbnormalDisconnect(
                            "fragmented message exceeds the frame size limit".to_string(),
                        )),
                        ctx,
                    );
                    ctx.close(Some(ws::CloseCode::Size.into()));
                    ctx.stop();
                }
            },
            Ok(ws::Message::Text(_)) => {
                debug!(connection = %self.connection_label(), "Text message ignored");
                self.send_notice(&ServerNotice::text_not_supported(), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(connection = %self.connection_label(), "Close frame received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                self.forward(Err(IngestError::AbnormalDisconnect(err.to_string())), ctx);
                ctx.stop();
            }
        }
    }
}

/// Outgoing acknowledgments produced by the receive loop.
impl StreamHandler<Acknowledgment> for AudioStreamSocket {
    fn handle(&mut self, ack: Acknowledgment, ctx: &mut Self::Context) {
        match serde_json::to_string(&ack) {
            Ok(json) => ctx.text(json),
            Err(err) => warn!("Failed to serialize acknowledgment: {}", err),
        }
    }

    /// The receive loop has ended; close the socket if the client has not.
    fn finished(&mut self, ctx: &mut Self::Context) {
        let end = self.ended.take().and_then(|mut rx| rx.try_recv().ok());
        let reason = match end {
            Some(end) if end.abnormal => ws::CloseReason {
                code: ws::CloseCode::Error,
                description: Some(end.reason),
            },
            _ => ws::CloseCode::Normal.into(),
        };
        ctx.close(Some(reason));
        ctx.stop();
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the request and hands the connection to an [`AudioStreamSocket`].
/// Settings are read once here; config changes apply to new connections.
pub async fn audio_stream(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    let config = state.get_config();
    let socket = AudioStreamSocket::new(state.chunk_receiver(), &config.stream);

    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(config.stream.max_frame_bytes)
        .start()
}
