use thiserror::Error;

/// Membership cache failure domain.
#[derive(Debug, Error)]
pub enum MembershipError {
    /// The external membership source (user-service) failed the roster fetch.
    #[error("membership source unavailable: {0}")]
    SourceUnavailable(String),
}
