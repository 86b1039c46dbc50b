use thiserror::Error;

/// Session directory failure domain.
///
/// # Design summary
/// - **Why**: §4.3/§7 distinguish "register failed because the cap is
///   already full" (close the handshake with 429) from any other directory
///   failure (close with 500, or fail the in-flight Push call) — the
///   connection/push code needs to match on that distinction, not just on a
///   boxed `anyhow::Error`.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The user already has 5 distinct registered devices and the proposed
    /// device id is not among them.
    #[error("user already has the maximum of 5 registered devices")]
    MaxDevicesExceeded,

    /// `renew`/`unregister` targeted a user with no active lease.
    #[error("no active lease for user `{user_id}`")]
    NoActiveLease { user_id: String },

    /// The backing store (Redis, or the in-memory fake under a simulated
    /// fault) failed the call outright.
    #[error("session directory unavailable: {0}")]
    Unavailable(String),
}
