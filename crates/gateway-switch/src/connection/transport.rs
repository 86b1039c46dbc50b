//! The narrow capability surface a Connection needs from its wire transport
//! (spec §9: "no collaborator may leak its transport types into the core").
//!
//! `gateway-server` is the only crate that knows about WebSockets; it
//! implements these two traits over a split axum `WebSocket` and hands the
//! halves to [`crate::connection::connection::Connection::run`]. Splitting
//! read and write into separate traits (rather than one `Transport`) lets
//! the reader and writer tasks each own one half without sharing a lock,
//! matching spec §5's "the writer is the sole mutator of the transport
//! output; the reader is the sole reader of the transport input".

use async_trait::async_trait;
use gateway_core::{InboundFrame, OutboundFrame};

/// One inbound event the reader task observes.
#[derive(Debug)]
pub enum RecvOutcome {
    /// A frame parsed successfully.
    Frame(InboundFrame),
    /// The peer closed the connection, or a transport-level read error
    /// occurred; fatal to the Connection either way (spec §7).
    Closed,
    /// The payload was valid JSON but carried an unrecognized `type`
    /// discriminator (spec §4.2: "unknown type: emit `error{INVALID_MESSAGE}`,
    /// keep the connection"). Payloads that aren't JSON at all, or exceed
    /// `max_message_size`, are reported as [`RecvOutcome::Closed`] instead —
    /// those are transport-level parse failures (spec §7), fatal to the
    /// connection.
    Invalid { received: String },
}

#[async_trait]
pub trait FrameSource: Send {
    async fn recv(&mut self) -> RecvOutcome;
}

#[async_trait]
pub trait FrameSink: Send {
    /// Writes one frame. An error is treated as a transport failure (spec
    /// §7), fatal to the Connection.
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), std::io::Error>;

    /// Best-effort close of the underlying transport during CLOSING→CLOSED.
    async fn close(&mut self);
}
