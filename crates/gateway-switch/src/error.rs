use thiserror::Error;

use crate::connection::state::ConnectionState;

/// Connection-engine failure domain.
///
/// # Design summary
/// - **Why**: grounded in `spark_switch::error::SwitchError` — one enum per
///   crate's internal failure domain, distinct from the wire-facing
///   [`gateway_core::GatewayError`] so a state-machine violation (a bug) is
///   never confused with a client-caused condition (an expected error code).
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("invalid connection state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("mailbox is closed")]
    MailboxClosed,

    #[error("mailbox is full")]
    MailboxFull,

    #[error("directory lookup failed: {reason}")]
    DirectoryLookupFailed { reason: String },

    #[error("routing service call failed: {reason}")]
    RoutingFailed { reason: String },

    #[error("authentication rejected: {reason}")]
    Unauthenticated { reason: String },
}
