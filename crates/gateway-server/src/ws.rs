//! Bridges an axum WebSocket to the narrow `FrameSource`/`FrameSink`
//! contracts `gateway-switch::connection` drives (spec §9: "no collaborator
//! may leak its transport types into the core"). This is the only file in
//! the workspace allowed to know about `axum::extract::ws`.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gateway_core::{InboundFrame, OutboundFrame};
use gateway_switch::connection::transport::{FrameSink, FrameSource, RecvOutcome};

/// Read half. A message too large or too malformed to be JSON at all is a
/// transport error (spec §7: fatal to the connection, no reply); a message
/// that is valid JSON but carries an unrecognized `type` discriminator is
/// an application-level condition the Connection already answers with
/// `error{INVALID_MESSAGE}` while staying open (spec §4.2).
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketSource {
    pub fn new(stream: SplitStream<WebSocket>, max_message_size: usize) -> Self {
        Self {
            stream,
            max_message_size,
        }
    }

    fn decode(raw: &[u8], max_message_size: usize) -> RecvOutcome {
        if raw.len() > max_message_size {
            tracing::info!(len = raw.len(), max_message_size, "frame exceeds size limit, closing");
            return RecvOutcome::Closed;
        }
        if serde_json::from_slice::<serde_json::Value>(raw).is_err() {
            tracing::info!("frame is not valid JSON, closing");
            return RecvOutcome::Closed;
        }
        match serde_json::from_slice::<InboundFrame>(raw) {
            Ok(frame) => RecvOutcome::Frame(frame),
            Err(_) => RecvOutcome::Invalid {
                received: String::from_utf8_lossy(raw).into_owned(),
            },
        }
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> RecvOutcome {
        loop {
            return match self.stream.next().await {
                None => RecvOutcome::Closed,
                Some(Err(err)) => {
                    tracing::info!(error = %err, "websocket read error, closing");
                    RecvOutcome::Closed
                }
                Some(Ok(Message::Close(_))) => RecvOutcome::Closed,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(bytes))) => Self::decode(&bytes, self.max_message_size),
                Some(Ok(Message::Text(text))) => Self::decode(text.as_bytes(), self.max_message_size),
            };
        }
    }
}

/// Write half. The Connection's writer task is the sole caller (spec §5:
/// "the writer is the sole mutator of the transport output").
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

impl WebSocketSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), std::io::Error> {
        self.sink
            .send(Message::Text(frame.to_json()))
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::BrokenPipe, err.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
