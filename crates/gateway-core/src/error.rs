//! Gateway-wide error taxonomy.
//!
//! # Design summary
//! - **Why**: every ingress path (handshake, auth, registration, send_msg
//!   dispatch) needs a stable wire error code (spec §6) alongside a
//!   human-readable `Display` for logs; keeping one enum here means the
//!   wire `error_code` string and the internal diagnostic never drift apart.
//! - **What**: each variant owns the stable code constant it maps to; `code()`
//!   is the single place that performs that mapping, the same role the
//!   teacher's `From<SwitchError> for SparkError` plays for its own error
//!   family.

use thiserror::Error;

/// Stable wire error codes from spec §6. Kept as `&'static str` constants
/// rather than re-deriving them from the enum's variant name, so renaming a
/// Rust variant can never silently change the wire contract.
pub mod codes {
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const INVALID_DEVICE_ID: &str = "INVALID_DEVICE_ID";
    pub const MAX_DEVICES_EXCEEDED: &str = "MAX_DEVICES_EXCEEDED";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Gateway-wide error domain.
///
/// # Design summary
/// - **Why**: aggregates the handful of failure shapes spec §7 names as
///   fatal-to-the-connection so the connection state machine has one type
///   to match on when deciding "close with this wire error" vs. "log and
///   continue".
/// - **What**: all variants are `Send + Sync + 'static` and safe to embed in
///   a `tracing::error!` field; `code()` returns the stable wire string.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GatewayError {
    /// Upgrade or authentication deadline elapsed before the client
    /// completed the handshake.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The auth service rejected the bearer credential, or the call to it
    /// timed out.
    #[error("authentication failed: {reason}")]
    Unauthenticated { reason: String },

    /// `raw` does not match the case-insensitive UUID v4 shape required of
    /// a device id.
    #[error("device id `{raw}` is not a well-formed UUID v4")]
    InvalidDeviceId { raw: String },

    /// The session directory already holds five distinct devices for this
    /// user and `raw` is not among them.
    #[error("user already has the maximum of 5 registered devices")]
    MaxDevicesExceeded,

    /// Per-connection token bucket rejected a `send_msg` frame.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// An inbound frame's `type` discriminator did not match any known
    /// variant.
    #[error("unrecognized frame type: {received}")]
    InvalidMessage { received: String },

    /// Catch-all for collaborator failures (routing service, session
    /// directory) that must be surfaced to the client as `INTERNAL` without
    /// closing the connection.
    #[error("internal failure during `{context}`: {detail}")]
    Internal { context: String, detail: String },

    /// A bounded operation (auth call, directory call, routing call,
    /// mailbox enqueue) did not complete within its configured deadline.
    #[error("operation `{operation}` timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },
}

impl GatewayError {
    /// The stable wire error code for this variant, per spec §6.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::HandshakeTimeout => codes::INVALID_TOKEN,
            GatewayError::Unauthenticated { .. } => codes::INVALID_TOKEN,
            GatewayError::InvalidDeviceId { .. } => codes::INVALID_DEVICE_ID,
            GatewayError::MaxDevicesExceeded => codes::MAX_DEVICES_EXCEEDED,
            GatewayError::RateLimitExceeded => codes::RATE_LIMIT_EXCEEDED,
            GatewayError::InvalidMessage { .. } => codes::INVALID_MESSAGE,
            GatewayError::Internal { .. } => codes::INTERNAL,
            GatewayError::Timeout { .. } => codes::INTERNAL,
        }
    }

    /// Builds the `Internal` variant from a collaborator failure, tagging it
    /// with the call site for observability.
    pub fn internal(context: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        GatewayError::Internal {
            context: context.into(),
            detail: detail.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        GatewayError::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}
